// S-57 Feature Geometry
// Points, lines and areas assembled from vector primitives

use serde_json::json;

/// A coordinate, with an optional elevation or depth
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_z(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// Same horizontal position within `tolerance` on both axes
    pub fn coincides(&self, other: &Point, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.y - other.y).abs() <= tolerance
    }

    fn coordinates(&self) -> Vec<f64> {
        match self.z {
            Some(z) => vec![self.x, self.y, z],
            None => vec![self.x, self.y],
        }
    }
}

/// Geometry type declared by a feature definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Unknown,
    None,
    Point,
    MultiPoint,
    LineString,
    Polygon,
}

/// A ring list: the first ring is the shell, the rest are holes
pub type Rings = Vec<Vec<Point>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    MultiPoint(Vec<Point>),
    LineString(Vec<Point>),
    MultiLineString(Vec<Vec<Point>>),
    Polygon(Rings),
    MultiPolygon(Vec<Rings>),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Every vertex, in storage order
    pub fn points(&self) -> Box<dyn Iterator<Item = &Point> + '_> {
        match self {
            Geometry::Point(p) => Box::new(std::iter::once(p)),
            Geometry::MultiPoint(pts) | Geometry::LineString(pts) => Box::new(pts.iter()),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                Box::new(lines.iter().flatten())
            }
            Geometry::MultiPolygon(polys) => Box::new(polys.iter().flatten().flatten()),
        }
    }

    pub fn point_count(&self) -> usize {
        self.points().count()
    }

    /// Get bounding box [min_x, min_y, max_x, max_y]
    pub fn bounds(&self) -> Option<[f64; 4]> {
        let mut points = self.points().peekable();
        points.peek()?;

        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some([min_x, min_y, max_x, max_y])
    }

    /// Check if geometry is valid
    pub fn is_valid(&self) -> bool {
        match self {
            Geometry::Point(_) => true,
            Geometry::MultiPoint(pts) => !pts.is_empty(),
            Geometry::LineString(pts) => pts.len() >= 2,
            Geometry::MultiLineString(lines) => !lines.is_empty() && lines.iter().all(|l| l.len() >= 2),
            Geometry::Polygon(rings) => !rings.is_empty() && rings.iter().all(|r| r.len() >= 4),
            Geometry::MultiPolygon(polys) => {
                !polys.is_empty()
                    && polys.iter().all(|rings| !rings.is_empty() && rings.iter().all(|r| r.len() >= 4))
            }
        }
    }

    /// GeoJSON coordinate arrays
    pub fn to_coordinates(&self) -> serde_json::Value {
        let line = |pts: &Vec<Point>| pts.iter().map(Point::coordinates).collect::<Vec<_>>();
        let rings = |rings: &Rings| rings.iter().map(line).collect::<Vec<_>>();

        match self {
            Geometry::Point(p) => json!(p.coordinates()),
            Geometry::MultiPoint(pts) | Geometry::LineString(pts) => json!(line(pts)),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => json!(rings(lines)),
            Geometry::MultiPolygon(polys) => json!(polys.iter().map(rings).collect::<Vec<_>>()),
        }
    }

    /// GeoJSON geometry object
    pub fn to_geojson(&self) -> serde_json::Value {
        json!({
            "type": self.type_name(),
            "coordinates": self.to_coordinates(),
        })
    }
}

/// Approximate a circular arc through `vertex_count` points.
///
/// The arc runs from `start` around `center` to `end`; coincident start and
/// end give a full circle.
pub fn stroke_arc(start: Point, center: Point, end: Point, vertex_count: usize) -> Vec<Point> {
    let (start_angle, end_angle) = if start.x == end.x && start.y == end.y {
        (0.0, 360.0)
    } else {
        let mut start_angle = (start.y - center.y).atan2(start.x - center.x).to_degrees();
        let end_angle = (end.y - center.y).atan2(end.x - center.x).to_degrees();
        while start_angle < end_angle {
            start_angle += 360.0;
        }
        (start_angle, end_angle)
    };

    let radius = ((start.x - center.x).powi(2) + (start.y - center.y).powi(2)).sqrt();
    let count = vertex_count.max(2);
    let slice = (end_angle - start_angle) / (count - 1) as f64;

    (0..count)
        .map(|i| {
            let angle = (start_angle + i as f64 * slice).to_radians();
            Point::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect()
}
