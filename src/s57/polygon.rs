// S-57 Polygon Assembly
// Links edge line strings into rings and nests them into shells and holes

use geo::{Area, Contains};
use geo_types::{Coord, LineString, Polygon};

use super::geometry::{Geometry, Point};

/// Build a Polygon or MultiPolygon from unordered edge line strings.
///
/// Edges are chained end to end, reversing where needed, until each ring
/// closes. Returns None when an edge chain cannot be closed or no ring is
/// formed. Ring nesting is decided by containment: a ring enclosed by an
/// odd number of rings is a hole of its smallest enclosing ring.
pub fn build_polygon_from_edges(edges: &[Vec<Point>], tolerance: f64) -> Option<Geometry> {
    let mut unused: Vec<&Vec<Point>> = edges
        .iter()
        .filter(|edge| {
            if edge.len() < 2 {
                log::debug!("Skipping degenerate edge with {} points", edge.len());
                false
            } else {
                true
            }
        })
        .collect();

    let mut rings: Vec<Vec<Point>> = Vec::new();
    while !unused.is_empty() {
        let mut ring = unused.remove(0).clone();

        while !is_closed(&ring, tolerance) {
            let Some(end) = ring.last().copied() else {
                return None;
            };
            let next = unused.iter().position(|edge| {
                edge[0].coincides(&end, tolerance) || edge[edge.len() - 1].coincides(&end, tolerance)
            });

            let Some(index) = next else {
                log::debug!("Unable to close ring of {} points", ring.len());
                return None;
            };

            let edge = unused.remove(index);
            if edge[0].coincides(&end, tolerance) {
                ring.extend(edge.iter().skip(1).copied());
            } else {
                ring.extend(edge.iter().rev().skip(1).copied());
            }
        }

        if ring.len() < 4 {
            log::debug!("Dropping ring with {} points", ring.len());
            continue;
        }
        rings.push(ring);
    }

    if rings.is_empty() {
        return None;
    }

    Some(nest_rings(rings))
}

fn is_closed(ring: &[Point], tolerance: f64) -> bool {
    ring.len() > 2 && ring[0].coincides(&ring[ring.len() - 1], tolerance)
}

fn to_geo(ring: &[Point]) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = ring.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    Polygon::new(LineString::from(coords), Vec::new())
}

/// Group rings into polygons by containment depth
fn nest_rings(rings: Vec<Vec<Point>>) -> Geometry {
    let shapes: Vec<Polygon<f64>> = rings.iter().map(|r| to_geo(r)).collect();
    let areas: Vec<f64> = shapes.iter().map(|s| s.unsigned_area()).collect();

    // Largest first so every parent is placed before its children
    let mut order: Vec<usize> = (0..rings.len()).collect();
    order.sort_by(|&a, &b| areas[b].total_cmp(&areas[a]));

    let mut parent: Vec<Option<usize>> = vec![None; rings.len()];
    let mut depth: Vec<usize> = vec![0; rings.len()];
    for (pos, &ring) in order.iter().enumerate() {
        let enclosing = order[..pos]
            .iter()
            .copied()
            .filter(|&candidate| shapes[candidate].contains(&shapes[ring]))
            .min_by(|&a, &b| areas[a].total_cmp(&areas[b]));
        if let Some(p) = enclosing {
            parent[ring] = Some(p);
            depth[ring] = depth[p] + 1;
        }
    }

    let mut polygons: Vec<Vec<Vec<Point>>> = Vec::new();
    let mut slot_of_shell: Vec<Option<usize>> = vec![None; rings.len()];
    for &ring in &order {
        if depth[ring] % 2 == 0 {
            slot_of_shell[ring] = Some(polygons.len());
            polygons.push(vec![rings[ring].clone()]);
        }
    }
    for &ring in &order {
        if depth[ring] % 2 == 1 {
            if let Some(slot) = parent[ring].and_then(|p| slot_of_shell[p]) {
                polygons[slot].push(rings[ring].clone());
            }
        }
    }

    if polygons.len() == 1 {
        Geometry::Polygon(polygons.remove(0))
    } else {
        Geometry::MultiPolygon(polygons)
    }
}
