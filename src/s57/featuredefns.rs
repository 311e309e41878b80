// S-57 Feature Definitions
// Schemas for object classes, generic layers, primitives and the DSID header

use super::catalog::{AttributeType, ClassCatalog};
use super::feature::{FeatureDefn, FieldType};
use super::geometry::GeometryKind;
use super::options::ReaderOptions;
use super::{PrimitiveKind, DSID_LAYER, PRIM_A, PRIM_L, PRIM_P, SOUNDG_OBJL};

/// Add the fields every feature class carries
pub fn add_standard_fields(defn: &mut FeatureDefn, options: &ReaderOptions) {
    for name in ["RCID", "PRIM", "GRUP", "OBJL", "RVER", "AGEN", "FIDN", "FIDS"] {
        defn.add_field(name, FieldType::Integer);
    }

    if options.lnam_refs {
        defn.add_field("LNAM", FieldType::String);
        defn.add_field("LNAM_REFS", FieldType::StringList);
        defn.add_field("FFPT_RIND", FieldType::IntegerList);
    }

    if options.return_linkages {
        for name in ["NAME_RCNM", "NAME_RCID", "ORNT", "USAG", "MASK"] {
            defn.add_field(name, FieldType::IntegerList);
        }
    }
}

/// Generic layer for a primitive when no catalog is attached
pub fn generate_geom_defn(prim: i32, options: &ReaderOptions) -> FeatureDefn {
    let (name, kind) = match prim {
        PRIM_P => ("Point", GeometryKind::Point),
        PRIM_L => ("Line", GeometryKind::LineString),
        PRIM_A => ("Area", GeometryKind::Polygon),
        _ => ("Meta", GeometryKind::None),
    };
    let mut defn = FeatureDefn::new(name, kind);
    add_standard_fields(&mut defn, options);
    defn
}

/// Layer for object classes the catalog does not know
pub fn generate_generic_defn(options: &ReaderOptions) -> FeatureDefn {
    let mut defn = FeatureDefn::new("Generic", GeometryKind::Unknown);
    add_standard_fields(&mut defn, options);
    defn
}

/// Layer for one object class, or None if the catalog does not know it
pub fn generate_object_class_defn(
    catalog: &ClassCatalog,
    objl: i32,
    options: &ReaderOptions,
) -> Option<FeatureDefn> {
    let class = catalog.select_class(objl)?;

    let kind = match class.primitives.as_slice() {
        [] => GeometryKind::None,
        [single] if single.eq_ignore_ascii_case("Point") => {
            if objl == SOUNDG_OBJL && !options.split_multipoint {
                GeometryKind::MultiPoint
            } else {
                GeometryKind::Point
            }
        }
        [single] if single.eq_ignore_ascii_case("Line") => GeometryKind::LineString,
        [single] if single.eq_ignore_ascii_case("Area") => GeometryKind::Polygon,
        _ => GeometryKind::Unknown,
    };

    let mut defn = FeatureDefn::new(&class.acronym, kind);
    add_standard_fields(&mut defn, options);

    for acronym in class.attribute_list(None) {
        let Some(info) = catalog
            .find_attr_by_acronym(acronym)
            .and_then(|code| catalog.attr_info(code))
        else {
            log::debug!("Can't find attribute {} from class {}", acronym, class.acronym);
            continue;
        };

        let field_type = match info.attr_type {
            AttributeType::Enum | AttributeType::Integer => FieldType::Integer,
            AttributeType::Float => FieldType::Real,
            AttributeType::List | AttributeType::CodeString | AttributeType::FreeText => {
                FieldType::String
            }
        };
        defn.add_field(acronym, field_type);
    }

    if objl == SOUNDG_OBJL && options.add_soundg_depth {
        defn.add_field("DEPTH", FieldType::Real);
    }

    Some(defn)
}

/// Layer for one vector primitive kind
pub fn generate_primitive_defn(kind: PrimitiveKind) -> FeatureDefn {
    let geometry = match kind {
        PrimitiveKind::IsolatedNode | PrimitiveKind::ConnectedNode => GeometryKind::Point,
        PrimitiveKind::Edge => GeometryKind::LineString,
        PrimitiveKind::Face => GeometryKind::None,
    };

    let mut defn = FeatureDefn::new(kind.layer_name(), geometry);
    for name in ["RCNM", "RCID", "RVER", "RUIN"] {
        defn.add_field(name, FieldType::Integer);
    }
    defn.add_field("POSACC", FieldType::Real);
    defn.add_field("QUAPOS", FieldType::Integer);

    if kind == PrimitiveKind::Edge {
        for end in 0..2 {
            for name in ["NAME_RCNM", "NAME_RCID", "ORNT", "USAG", "TOPI", "MASK"] {
                defn.add_field(&format!("{}_{}", name, end), FieldType::Integer);
            }
        }
    }
    defn
}

/// Layer for the dataset header feature
pub fn generate_dsid_defn() -> FeatureDefn {
    let mut defn = FeatureDefn::new(DSID_LAYER, GeometryKind::None);

    let dsid = [
        ("DSID_EXPP", FieldType::Integer),
        ("DSID_INTU", FieldType::Integer),
        ("DSID_DSNM", FieldType::String),
        ("DSID_EDTN", FieldType::String),
        ("DSID_UPDN", FieldType::String),
        ("DSID_UADT", FieldType::String),
        ("DSID_ISDT", FieldType::String),
        ("DSID_STED", FieldType::Real),
        ("DSID_PRSP", FieldType::Integer),
        ("DSID_PSDN", FieldType::String),
        ("DSID_PRED", FieldType::String),
        ("DSID_PROF", FieldType::Integer),
        ("DSID_AGEN", FieldType::Integer),
        ("DSID_COMT", FieldType::String),
    ];
    for (name, field_type) in dsid {
        defn.add_field(name, field_type);
    }

    for name in [
        "DSSI_DSTR", "DSSI_AALL", "DSSI_NALL", "DSSI_NOMR", "DSSI_NOCR", "DSSI_NOGR", "DSSI_NOLR",
        "DSSI_NOIN", "DSSI_NOCN", "DSSI_NOED", "DSSI_NOFA",
    ] {
        defn.add_field(name, FieldType::Integer);
    }

    for name in [
        "DSPM_HDAT", "DSPM_VDAT", "DSPM_SDAT", "DSPM_CSCL", "DSPM_DUNI", "DSPM_HUNI", "DSPM_PUNI",
        "DSPM_COUN", "DSPM_COMF", "DSPM_SOMF",
    ] {
        defn.add_field(name, FieldType::Integer);
    }
    defn.add_field("DSPM_COMT", FieldType::String);

    defn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s57::PRIM_N;

    #[test]
    fn test_standard_fields_follow_options() {
        let mut options = ReaderOptions {
            lnam_refs: false,
            ..ReaderOptions::default()
        };
        let defn = generate_geom_defn(PRIM_P, &options);
        assert_eq!(defn.name(), "Point");
        assert_eq!(defn.field_count(), 8);

        options.lnam_refs = true;
        options.return_linkages = true;
        let defn = generate_geom_defn(PRIM_A, &options);
        assert_eq!(defn.geometry_kind(), GeometryKind::Polygon);
        assert_eq!(defn.field_type("LNAM_REFS"), Some(FieldType::StringList));
        assert_eq!(defn.field_type("MASK"), Some(FieldType::IntegerList));
        assert_eq!(generate_geom_defn(PRIM_N, &options).name(), "Meta");
    }

    #[test]
    fn test_object_class_defn() {
        let catalog = ClassCatalog::builtin().unwrap();
        let options = ReaderOptions::default();

        let depare = generate_object_class_defn(&catalog, 42, &options).unwrap();
        assert_eq!(depare.name(), "DEPARE");
        assert_eq!(depare.geometry_kind(), GeometryKind::Unknown);
        assert_eq!(depare.field_type("DRVAL1"), Some(FieldType::Real));
        assert_eq!(depare.field_type("SCAMIN"), Some(FieldType::Integer));
        assert_eq!(depare.field_type("QUASOU"), Some(FieldType::String));

        let soundg = generate_object_class_defn(&catalog, SOUNDG_OBJL, &options).unwrap();
        assert_eq!(soundg.geometry_kind(), GeometryKind::MultiPoint);
        assert!(soundg.field_index("DEPTH").is_none());

        assert!(generate_object_class_defn(&catalog, 9999, &options).is_none());
    }

    #[test]
    fn test_split_soundings_get_depth() {
        let catalog = ClassCatalog::builtin().unwrap();
        let options = ReaderOptions {
            split_multipoint: true,
            add_soundg_depth: true,
            ..ReaderOptions::default()
        };
        let soundg = generate_object_class_defn(&catalog, SOUNDG_OBJL, &options).unwrap();
        assert_eq!(soundg.geometry_kind(), GeometryKind::Point);
        assert_eq!(soundg.field_type("DEPTH"), Some(FieldType::Real));
    }

    #[test]
    fn test_primitive_and_dsid_defns() {
        let edge = generate_primitive_defn(PrimitiveKind::Edge);
        assert_eq!(edge.name(), "Edge");
        assert!(edge.field_index("TOPI_1").is_some());
        assert!(generate_primitive_defn(PrimitiveKind::IsolatedNode)
            .field_index("NAME_RCID_0")
            .is_none());

        let dsid = generate_dsid_defn();
        assert_eq!(dsid.field_type("DSID_STED"), Some(FieldType::Real));
        assert_eq!(dsid.field_type("DSPM_COMF"), Some(FieldType::Integer));
    }
}
