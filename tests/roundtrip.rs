// Round trip tests
// Cells written with S57Writer and read back through S57Reader

use std::path::Path;
use std::sync::Arc;

use vortexnav_s57::iso8211::{Module, Record, Value};
use vortexnav_s57::s57::{
    generate_object_class_defn, generate_primitive_defn, ClassCatalog, DsidParams, DspmParams,
    Feature, FieldValue, Geometry, Point, PrimitiveKind, ReaderOptions, S57Error, S57Reader,
    S57Writer, EMPTY_NUMBER_MARKER, RCNM_VC, RUIN_DELETE, RUIN_INSERT, RUIN_MODIFY,
};

fn catalog() -> Arc<ClassCatalog> {
    Arc::new(ClassCatalog::builtin().unwrap())
}

fn new_cell(path: &Path, updn: &str) -> S57Writer {
    let mut writer = S57Writer::create(path).unwrap();
    writer.set_catalog(catalog());
    writer
        .write_dsid(&DsidParams {
            dsnm: "TESTCELL.000".to_string(),
            updn: updn.to_string(),
            ..DsidParams::default()
        })
        .unwrap();
    writer.write_dspm(&DspmParams::default()).unwrap();
    writer
}

fn node(kind: PrimitiveKind, rcid: i64, geometry: Geometry) -> Feature {
    let mut feature = Feature::new(Arc::new(generate_primitive_defn(kind)));
    feature.set_field("RCID", FieldValue::Integer(rcid));
    feature.set_geometry(geometry);
    feature
}

fn edge(rcid: i64, start: i64, end: i64, interior: &[(f64, f64)]) -> Feature {
    let mut feature = Feature::new(Arc::new(generate_primitive_defn(PrimitiveKind::Edge)));
    feature.set_field("RCID", FieldValue::Integer(rcid));
    feature.set_field("NAME_RCID_0", FieldValue::Integer(start));
    feature.set_field("NAME_RCID_1", FieldValue::Integer(end));
    feature.set_geometry(Geometry::LineString(
        interior.iter().map(|&(x, y)| Point::new(x, y)).collect(),
    ));
    feature
}

fn class_feature(objl: i32, rcid: i64, prim: i64, rcids: &[i64]) -> Feature {
    let options = ReaderOptions {
        return_linkages: true,
        ..ReaderOptions::default()
    };
    let defn = generate_object_class_defn(&catalog(), objl, &options).unwrap();
    let mut feature = Feature::new(Arc::new(defn));
    for (name, value) in [
        ("RCID", rcid),
        ("PRIM", prim),
        ("GRUP", 2),
        ("OBJL", objl as i64),
        ("AGEN", 540),
        ("FIDN", 1000 + rcid),
        ("FIDS", 1),
    ] {
        feature.set_field(name, FieldValue::Integer(value));
    }
    feature.set_field("NAME_RCID", FieldValue::IntegerList(rcids.to_vec()));
    feature
}

fn open(path: &Path, options: ReaderOptions) -> S57Reader {
    S57Reader::open(path, options, Some(catalog())).unwrap()
}

fn class_features(reader: &mut S57Reader) -> Vec<Feature> {
    reader
        .features()
        .map(Result::unwrap)
        .filter(|f| f.defn().name() != "DSID")
        .collect()
}

fn vrid_update(writer: &mut S57Writer, rcid: i64, rver: i64, ruin: i32) -> Record {
    let mut record = writer.make_record().unwrap();
    record
        .add_field(writer.field_defn("VRID").unwrap())
        .push_row(vec![
            Value::Int(RCNM_VC as i64),
            Value::Int(rcid),
            Value::Int(rver),
            Value::Int(ruin as i64),
        ]);
    record
}

fn move_node(writer: &mut S57Writer, rcid: i64, rver: i64, to: Point) -> Record {
    let mut record = vrid_update(writer, rcid, rver, RUIN_MODIFY);
    record
        .add_field(writer.field_defn("SGCC").unwrap())
        .push_row(vec![Value::Int(3), Value::Int(1), Value::Int(1)]);
    writer.write_geometry(&mut record, &[to], false).unwrap();
    record
}

fn node_x(reader: &S57Reader, rcid: i32) -> Option<i64> {
    reader
        .vector_index(PrimitiveKind::ConnectedNode)
        .get(rcid)?
        .int_subfield("SG2D", 0, "XCOO", 0)
}

#[test]
fn test_point_feature_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&path, "0");
    writer
        .write_complete_feature(&node(
            PrimitiveKind::IsolatedNode,
            1,
            Geometry::Point(Point::new(100.0, 200.0)),
        ))
        .unwrap();
    let mut light = class_feature(75, 1, 1, &[1]);
    light.set_field("OBJNAM", FieldValue::String("Harbour light".to_string()));
    light.set_field("HEIGHT", FieldValue::Real(12.5));
    writer.write_complete_feature(&light).unwrap();
    writer.close().unwrap();

    let mut reader = open(&path, ReaderOptions::default());
    reader.ingest().unwrap();
    assert_eq!(reader.dataset_name(), "TESTCELL.000");
    assert_eq!(reader.comf(), 10_000_000);

    let node_record = reader
        .vector_index(PrimitiveKind::IsolatedNode)
        .get(1)
        .unwrap();
    assert_eq!(node_record.int_subfield("SG2D", 0, "XCOO", 0), Some(1_000_000_000));
    assert_eq!(node_record.int_subfield("SG2D", 0, "YCOO", 0), Some(2_000_000_000));

    let header = reader.read_next_feature(None).unwrap().unwrap();
    assert_eq!(header.defn().name(), "DSID");
    assert_eq!(header.field_as_string("DSID_DSNM").as_deref(), Some("TESTCELL.000"));
    assert_eq!(header.field_as_integer("DSPM_COMF"), Some(10_000_000));

    let feature = reader.read_next_feature(None).unwrap().unwrap();
    assert_eq!(feature.defn().name(), "LIGHTS");
    assert_eq!(feature.fid(), 0);
    assert_eq!(feature.geometry(), Some(&Geometry::Point(Point::new(100.0, 200.0))));
    assert_eq!(feature.field_as_string("OBJNAM").as_deref(), Some("Harbour light"));
    assert_eq!(feature.field_as_real("HEIGHT"), Some(12.5));
    assert_eq!(feature.field_as_string("LNAM").as_deref(), Some("021C000003E90001"));
    assert!(reader.read_next_feature(None).unwrap().is_none());

    assert_eq!(reader.get_extent(false).unwrap(), Some([100.0, 200.0, 100.0, 200.0]));
}

#[test]
fn test_empty_numbers_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&path, "0");
    writer
        .write_complete_feature(&node(
            PrimitiveKind::IsolatedNode,
            1,
            Geometry::Point(Point::new(1.0, 2.0)),
        ))
        .unwrap();
    let mut light = class_feature(75, 1, 1, &[1]);
    light.set_field("SCAMIN", FieldValue::Integer(EMPTY_NUMBER_MARKER as i64));
    light.set_field("HEIGHT", FieldValue::Integer(EMPTY_NUMBER_MARKER as i64));
    writer.write_complete_feature(&light).unwrap();
    writer.close().unwrap();

    let mut reader = open(
        &path,
        ReaderOptions {
            preserve_empty_numbers: true,
            ..ReaderOptions::default()
        },
    );
    let features = class_features(&mut reader);
    assert_eq!(features.len(), 1);
    assert_eq!(
        features[0].field_as_integer("SCAMIN"),
        Some(EMPTY_NUMBER_MARKER as i64)
    );
    assert_eq!(
        features[0].field_as_real("HEIGHT"),
        Some(EMPTY_NUMBER_MARKER as f64)
    );

    let mut reader = open(&path, ReaderOptions::default());
    let features = class_features(&mut reader);
    assert!(!features[0].is_field_set("SCAMIN"));
    assert!(!features[0].is_field_set("HEIGHT"));
}

#[test]
fn test_soundings_are_split() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&path, "0");
    writer
        .write_complete_feature(&node(
            PrimitiveKind::IsolatedNode,
            2,
            Geometry::MultiPoint(vec![
                Point::with_z(1.5, 2.25, 5.5),
                Point::with_z(1.75, 2.5, 12.3),
                Point::with_z(2.0, 2.75, 7.0),
            ]),
        ))
        .unwrap();
    writer
        .write_complete_feature(&class_feature(129, 1, 1, &[2]))
        .unwrap();
    writer.close().unwrap();

    let mut reader = open(
        &path,
        ReaderOptions {
            split_multipoint: true,
            add_soundg_depth: true,
            ..ReaderOptions::default()
        },
    );
    let soundings = class_features(&mut reader);
    assert_eq!(soundings.len(), 3);
    assert!(soundings.iter().all(|f| f.fid() == 0 && f.defn().name() == "SOUNDG"));

    let depths: Vec<f64> = soundings
        .iter()
        .map(|f| f.field_as_real("DEPTH").unwrap())
        .collect();
    assert_eq!(depths, vec![5.5, 12.3, 7.0]);
    assert_eq!(
        soundings[0].geometry(),
        Some(&Geometry::Point(Point::with_z(1.5, 2.25, 5.5)))
    );

    // Unsplit, the same feature is one multipoint
    let mut reader = open(&path, ReaderOptions::default());
    let soundings = class_features(&mut reader);
    assert_eq!(soundings.len(), 1);
    assert!(matches!(soundings[0].geometry(), Some(Geometry::MultiPoint(points)) if points.len() == 3));
}

#[test]
fn test_area_with_hole() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&path, "0");
    for (rcid, x, y) in [(1, 0.0, 0.0), (2, 10.0, 10.0), (3, 2.0, 2.0)] {
        writer
            .write_complete_feature(&node(
                PrimitiveKind::ConnectedNode,
                rcid,
                Geometry::Point(Point::new(x, y)),
            ))
            .unwrap();
    }
    writer.write_complete_feature(&edge(11, 1, 2, &[(0.0, 10.0)])).unwrap();
    writer.write_complete_feature(&edge(12, 2, 1, &[(10.0, 0.0)])).unwrap();
    writer
        .write_complete_feature(&edge(13, 3, 3, &[(2.0, 4.0), (4.0, 4.0), (4.0, 2.0)]))
        .unwrap();
    writer
        .write_complete_feature(&class_feature(308, 1, 3, &[11, 12, 13]))
        .unwrap();
    writer.close().unwrap();

    let mut reader = open(&path, ReaderOptions::default());
    let features = class_features(&mut reader);
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].defn().name(), "M_QUAL");

    match features[0].geometry() {
        Some(Geometry::Polygon(rings)) => {
            assert_eq!(rings.len(), 2);
            assert_eq!(rings[0].len(), 5);
            assert!(rings[0].contains(&Point::new(10.0, 0.0)));
            assert_eq!(rings[1].len(), 5);
            assert!(rings[1].iter().all(|p| p.x <= 4.0 && p.y <= 4.0));
        }
        other => panic!("expected polygon, got {:?}", other),
    }
}

#[test]
fn test_line_continuity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&path, "0");
    for (rcid, x, y) in [(1, 0.0, 0.0), (2, 1.0, 1.0), (3, 2.0, 0.0), (4, 5.0, 5.0), (5, 6.0, 6.0)] {
        writer
            .write_complete_feature(&node(
                PrimitiveKind::ConnectedNode,
                rcid,
                Geometry::Point(Point::new(x, y)),
            ))
            .unwrap();
    }
    writer.write_complete_feature(&edge(21, 1, 2, &[(0.5, 0.0)])).unwrap();
    writer.write_complete_feature(&edge(22, 2, 3, &[(1.5, 0.0)])).unwrap();
    writer.write_complete_feature(&edge(23, 4, 5, &[(5.5, 5.0)])).unwrap();

    writer
        .write_complete_feature(&class_feature(43, 1, 2, &[21, 22]))
        .unwrap();
    writer
        .write_complete_feature(&class_feature(43, 2, 2, &[21, 23]))
        .unwrap();
    let mut reversed = class_feature(43, 3, 2, &[22, 21]);
    reversed.set_field("ORNT", FieldValue::IntegerList(vec![2, 2]));
    writer.write_complete_feature(&reversed).unwrap();
    writer.close().unwrap();

    let mut reader = open(&path, ReaderOptions::default());
    let features = class_features(&mut reader);
    assert_eq!(features.len(), 3);

    let pts = |coords: &[(f64, f64)]| -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    };

    assert_eq!(
        features[0].geometry(),
        Some(&Geometry::LineString(pts(&[
            (0.0, 0.0),
            (0.5, 0.0),
            (1.0, 1.0),
            (1.5, 0.0),
            (2.0, 0.0)
        ])))
    );
    assert_eq!(
        features[1].geometry(),
        Some(&Geometry::MultiLineString(vec![
            pts(&[(0.0, 0.0), (0.5, 0.0), (1.0, 1.0)]),
            pts(&[(5.0, 5.0), (5.5, 5.0), (6.0, 6.0)]),
        ]))
    );
    assert_eq!(
        features[2].geometry(),
        Some(&Geometry::LineString(pts(&[
            (2.0, 0.0),
            (1.5, 0.0),
            (1.0, 1.0),
            (0.5, 0.0),
            (0.0, 0.0)
        ])))
    );
}

#[test]
fn test_catalog_lookup() {
    let catalog = catalog();
    assert_eq!(catalog.select_class(75).unwrap().acronym, "LIGHTS");
    assert_eq!(catalog.select_class_by_acronym("soundg").unwrap().code, 129);
    assert_eq!(catalog.find_attr_by_acronym("OBJNAM"), Some(116));
    assert_eq!(catalog.attr_acronym(174), Some("VALDCO"));
    assert!(catalog.select_class(9999).is_none());
}

#[test]
fn test_update_chain_stops_at_gap() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&base, "0");
    writer
        .write_complete_feature(&node(
            PrimitiveKind::ConnectedNode,
            1,
            Geometry::Point(Point::new(1.0, 1.0)),
        ))
        .unwrap();
    writer.close().unwrap();

    let mut first = new_cell(&dir.path().join("TESTCELL.001"), "1");
    let record = move_node(&mut first, 1, 2, Point::new(2.0, 2.0));
    first.write_record(&record).unwrap();
    let mut record = vrid_update(&mut first, 7, 1, RUIN_INSERT);
    first
        .write_geometry(&mut record, &[Point::new(7.0, 7.0)], false)
        .unwrap();
    first.write_record(&record).unwrap();
    first.close().unwrap();

    // Sequence number 2 is missing, so 3 is never applied
    let mut third = new_cell(&dir.path().join("TESTCELL.003"), "3");
    let record = move_node(&mut third, 1, 3, Point::new(3.0, 3.0));
    third.write_record(&record).unwrap();
    third.close().unwrap();

    let mut reader = open(&base, ReaderOptions::default());
    reader.ingest().unwrap();

    assert_eq!(node_x(&reader, 1), Some(20_000_000));
    assert_eq!(node_x(&reader, 7), Some(70_000_000));
    let rver = reader
        .vector_index(PrimitiveKind::ConnectedNode)
        .get(1)
        .and_then(|r| r.int_subfield("VRID", 0, "RVER", 0));
    assert_eq!(rver, Some(2));

    let header = reader.read_next_feature(None).unwrap().unwrap();
    assert_eq!(header.field_as_string("DSID_UPDN").as_deref(), Some("1"));
}

#[test]
fn test_modify_version_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&base, "0");
    for rcid in [1, 2] {
        writer
            .write_complete_feature(&node(
                PrimitiveKind::ConnectedNode,
                rcid,
                Geometry::Point(Point::new(rcid as f64, 1.0)),
            ))
            .unwrap();
    }
    writer.close().unwrap();

    let mut update = new_cell(&dir.path().join("TESTCELL.001"), "1");
    let record = move_node(&mut update, 1, 5, Point::new(9.0, 9.0));
    update.write_record(&record).unwrap();
    update.close().unwrap();

    let mut reader = open(
        &base,
        ReaderOptions {
            apply_updates: false,
            ..ReaderOptions::default()
        },
    );
    reader.ingest().unwrap();

    assert!(matches!(
        reader.find_and_apply_updates(None),
        Err(S57Error::UpdateError(_))
    ));
    assert_eq!(node_x(&reader, 1), Some(10_000_000));
    assert_eq!(node_x(&reader, 2), Some(20_000_000));
}

#[test]
fn test_delete_version_mismatch_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&base, "0");
    for rcid in [1, 2] {
        writer
            .write_complete_feature(&node(
                PrimitiveKind::ConnectedNode,
                rcid,
                Geometry::Point(Point::new(rcid as f64, 1.0)),
            ))
            .unwrap();
    }
    writer.close().unwrap();

    let mut update = new_cell(&dir.path().join("TESTCELL.001"), "1");
    let record = vrid_update(&mut update, 2, 9, RUIN_DELETE);
    update.write_record(&record).unwrap();
    let record = vrid_update(&mut update, 1, 2, RUIN_DELETE);
    update.write_record(&record).unwrap();
    update.close().unwrap();

    let mut reader = open(&base, ReaderOptions::default());
    reader.ingest().unwrap();

    assert!(node_x(&reader, 1).is_none());
    assert_eq!(node_x(&reader, 2), Some(20_000_000));
}

#[test]
fn test_updates_need_base_cell() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.001");
    new_cell(&path, "1").close().unwrap();

    let mut reader = open(&path, ReaderOptions::default());
    reader.ingest().unwrap();
    assert!(matches!(
        reader.find_and_apply_updates(None),
        Err(S57Error::UpdateError(_))
    ));
}

#[test]
fn test_primitive_layers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&path, "0");
    for (rcid, x) in [(1, 0.0), (2, 4.0)] {
        writer
            .write_complete_feature(&node(
                PrimitiveKind::ConnectedNode,
                rcid,
                Geometry::Point(Point::new(x, 0.0)),
            ))
            .unwrap();
    }
    writer.write_complete_feature(&edge(30, 1, 2, &[(2.0, 1.0)])).unwrap();
    writer.close().unwrap();

    let mut reader = open(
        &path,
        ReaderOptions {
            return_primitives: true,
            return_dsid: false,
            ..ReaderOptions::default()
        },
    );

    let features: Vec<Feature> = reader.features().map(Result::unwrap).collect();
    let layers: Vec<&str> = features.iter().map(|f| f.defn().name()).collect();
    assert_eq!(layers, vec!["ConnectedNode", "ConnectedNode", "Edge"]);

    let edge = &features[2];
    assert_eq!(edge.fid(), 30);
    assert_eq!(edge.field_as_integer("NAME_RCID_0"), Some(1));
    assert_eq!(edge.field_as_integer("NAME_RCID_1"), Some(2));
    assert_eq!(edge.field_as_integer("NAME_RCNM_1"), Some(RCNM_VC as i64));
    assert_eq!(
        edge.geometry(),
        Some(&Geometry::LineString(vec![Point::new(2.0, 1.0)]))
    );

    let target = reader.find_feature_defn("Edge").unwrap();
    reader.rewind();
    let only_edge = reader.read_next_feature(Some(&target)).unwrap().unwrap();
    assert_eq!(only_edge.fid(), 30);
    assert!(reader.read_next_feature(Some(&target)).unwrap().is_none());
}

#[test]
fn test_national_attributes_in_ucs2() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = S57Writer::create(&path).unwrap();
    writer.set_catalog(catalog());
    writer
        .write_dsid(&DsidParams {
            dsnm: "TESTCELL.000".to_string(),
            aall: 1,
            nall: 2,
            ..DsidParams::default()
        })
        .unwrap();
    writer.write_dspm(&DspmParams::default()).unwrap();
    writer
        .write_complete_feature(&node(
            PrimitiveKind::IsolatedNode,
            1,
            Geometry::Point(Point::new(11.9, 57.7)),
        ))
        .unwrap();
    let mut light = class_feature(75, 1, 1, &[1]);
    light.set_field("OBJNAM", FieldValue::String("Gothenburg light".to_string()));
    light.set_field("NOBJNM", FieldValue::String("Göteborgs fyr".to_string()));
    writer.write_complete_feature(&light).unwrap();
    writer.close().unwrap();

    let options = ReaderOptions {
        recode_by_dssi: true,
        ..ReaderOptions::default()
    };
    let mut reader = open(&path, options);
    let features = class_features(&mut reader);
    assert_eq!((reader.aall(), reader.nall()), (1, 2));
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].field_as_string("OBJNAM").as_deref(), Some("Gothenburg light"));
    assert_eq!(features[0].field_as_string("NOBJNM").as_deref(), Some("Göteborgs fyr"));

    let natf = reader.feature_index().get(1).unwrap().find_field("NATF").unwrap();
    assert!(natf.bytes_value("ATVL", 0).is_some());
    assert!(reader.feature_index().get(1).unwrap().find_field("ATTF").is_some());

    // Without recoding the UCS-2 bytes are not read as text
    let mut reader = open(&path, ReaderOptions::default());
    let features = class_features(&mut reader);
    assert_ne!(features[0].field_as_string("NOBJNM").as_deref(), Some("Göteborgs fyr"));
    assert_eq!(features[0].field_as_string("OBJNAM").as_deref(), Some("Gothenburg light"));
}

#[test]
fn test_out_of_range_coordinate_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");

    let mut writer = new_cell(&path, "0");
    let result = writer.write_complete_feature(&node(
        PrimitiveKind::IsolatedNode,
        1,
        Geometry::Point(Point::new(300.0, 10.0)),
    ));
    assert!(matches!(result, Err(S57Error::WriteError(_))));
    writer
        .write_complete_feature(&node(
            PrimitiveKind::IsolatedNode,
            2,
            Geometry::Point(Point::new(30.0, 10.0)),
        ))
        .unwrap();
    writer.close().unwrap();

    let mut reader = open(&path, ReaderOptions::default());
    reader.ingest().unwrap();
    let nodes = reader.vector_index(PrimitiveKind::IsolatedNode);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes.get(2).unwrap().int_subfield("SG2D", 0, "XCOO", 0), Some(300_000_000));
}

#[test]
fn test_header_of_cell_without_features() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("TESTCELL.000");
    new_cell(&path, "0").close().unwrap();

    let mut reader = open(&path, ReaderOptions::default());
    let header = reader.read_feature(0, None).unwrap().unwrap();
    assert_eq!(header.defn().name(), "DSID");
    assert_eq!(header.fid(), 0);
    assert!(reader.read_feature(1, None).unwrap().is_none());

    let mut reader = open(
        &path,
        ReaderOptions {
            return_dsid: false,
            ..ReaderOptions::default()
        },
    );
    assert!(reader.read_feature(0, None).unwrap().is_none());
}

#[test]
fn test_single_update_module_keeps_index_order() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("TESTCELL.000");
    let update = dir.path().join("TESTCELL.001");

    let mut writer = new_cell(&base, "0");
    writer
        .write_complete_feature(&node(
            PrimitiveKind::IsolatedNode,
            1,
            Geometry::Point(Point::new(1.0, 1.0)),
        ))
        .unwrap();
    let mut far = class_feature(75, 5, 1, &[1]);
    far.set_field("OBJNAM", FieldValue::String("Outer".to_string()));
    writer.write_complete_feature(&far).unwrap();
    writer.close().unwrap();

    let mut writer = new_cell(&update, "1");
    let mut near = class_feature(75, 2, 1, &[1]);
    near.set_field("OBJNAM", FieldValue::String("Inner".to_string()));
    writer.write_complete_feature(&near).unwrap();
    writer.close().unwrap();

    let mut reader = open(
        &base,
        ReaderOptions {
            apply_updates: false,
            ..ReaderOptions::default()
        },
    );
    reader.ingest().unwrap();
    assert_eq!(reader.feature_index().len(), 1);

    let mut module = Module::open(&update).unwrap();
    reader.apply_updates(&mut module).unwrap();

    let index = reader.feature_index();
    assert!(index.is_sorted());
    let keys: Vec<i32> = index.entries().iter().map(|e| e.key).collect();
    assert_eq!(keys, vec![2, 5]);

    let first = reader.read_feature(1, None).unwrap().unwrap();
    assert_eq!(first.field_as_string("OBJNAM").as_deref(), Some("Outer"));
    let lights = reader.find_feature_defn("LIGHTS").unwrap();
    let inner = reader.read_feature(0, Some(&lights)).unwrap().unwrap();
    assert_eq!(inner.field_as_string("OBJNAM").as_deref(), Some("Inner"));
}
