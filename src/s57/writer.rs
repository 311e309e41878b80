// S-57 Writer
// Encodes header records, vector primitives and feature records into a new cell

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::iso8211::{
    encode_ucs2, DataStructCode, DataTypeCode, Field, FieldDefn, ModuleWriter, Record,
    SubfieldFormat, Value,
};

use super::catalog::ClassCatalog;
use super::feature::{Feature, FieldValue};
use super::geometry::{Geometry, Point};
use super::{
    PrimitiveKind, S57Error, EMPTY_NUMBER_MARKER, PRIM_P, RCNM_DSID, RCNM_DSPM, RCNM_FE, RCNM_VE,
    RCNM_VI,
};

/// Largest encoded ATTF payload accepted for one feature
const ATTF_STAGING_LIMIT: usize = 5000;

/// RCID written for features that carry none (all bits set)
const UNSET_RCID: i64 = u32::MAX as i64;

/// Byte position of each hex pair of a printed LNAM within the FFPT LNAM bytes
const LNAM_BYTE_ORDER: [usize; 8] = [1, 0, 5, 4, 3, 2, 7, 6];

/// Field definitions of a conventional S-57 transfer file
pub fn s57_field_defns() -> Vec<FieldDefn> {
    use DataStructCode::{Array, Elementary, Vector};
    use DataTypeCode::{CharString, ImplicitPoint, MixedDataType};
    use SubfieldFormat::{Bits, Real, Signed, Text, Unsigned};

    let b11 = Unsigned(1);
    let b12 = Unsigned(2);
    let b14 = Unsigned(4);
    let b24 = Signed(4);
    let a = Text(None);

    vec![
        FieldDefn::new("0000", "", Elementary, CharString),
        FieldDefn::new("0001", "ISO 8211 Record Identifier", Elementary, ImplicitPoint)
            .subfield("", Unsigned(2)),
        FieldDefn::new("DSID", "Data set identification field", Vector, MixedDataType)
            .subfield("RCNM", b11)
            .subfield("RCID", b14)
            .subfield("EXPP", b11)
            .subfield("INTU", b11)
            .subfield("DSNM", a)
            .subfield("EDTN", a)
            .subfield("UPDN", a)
            .subfield("UADT", Text(Some(8)))
            .subfield("ISDT", Text(Some(8)))
            .subfield("STED", Real(Some(4)))
            .subfield("PRSP", b11)
            .subfield("PSDN", a)
            .subfield("PRED", a)
            .subfield("PROF", b11)
            .subfield("AGEN", b12)
            .subfield("COMT", a),
        FieldDefn::new("DSSI", "Data set structure information field", Vector, MixedDataType)
            .subfield("DSTR", b11)
            .subfield("AALL", b11)
            .subfield("NALL", b11)
            .subfield("NOMR", b14)
            .subfield("NOCR", b14)
            .subfield("NOGR", b14)
            .subfield("NOLR", b14)
            .subfield("NOIN", b14)
            .subfield("NOCN", b14)
            .subfield("NOED", b14)
            .subfield("NOFA", b14),
        FieldDefn::new("DSPM", "Data set parameter field", Vector, MixedDataType)
            .subfield("RCNM", b11)
            .subfield("RCID", b14)
            .subfield("HDAT", b11)
            .subfield("VDAT", b11)
            .subfield("SDAT", b11)
            .subfield("CSCL", b14)
            .subfield("DUNI", b11)
            .subfield("HUNI", b11)
            .subfield("PUNI", b11)
            .subfield("COUN", b11)
            .subfield("COMF", b14)
            .subfield("SOMF", b14)
            .subfield("COMT", a),
        FieldDefn::new("VRID", "Vector record identifier field", Vector, MixedDataType)
            .subfield("RCNM", b11)
            .subfield("RCID", b14)
            .subfield("RVER", b12)
            .subfield("RUIN", b11),
        FieldDefn::new("VRPC", "Vector record pointer control field", Vector, MixedDataType)
            .subfield("VPUI", b11)
            .subfield("VPIX", b12)
            .subfield("NVPT", b12),
        FieldDefn::new("VRPT", "Vector record pointer field", Array, MixedDataType)
            .repeating()
            .subfield("NAME", Bits(40))
            .subfield("ORNT", b11)
            .subfield("USAG", b11)
            .subfield("TOPI", b11)
            .subfield("MASK", b11),
        FieldDefn::new("ATTV", "Vector record attribute field", Array, MixedDataType)
            .repeating()
            .subfield("ATTL", b12)
            .subfield("ATVL", a),
        FieldDefn::new("SGCC", "Coordinate control field", Vector, MixedDataType)
            .subfield("CCUI", b11)
            .subfield("CCIX", b12)
            .subfield("CCNC", b12),
        FieldDefn::new("SG2D", "2-D coordinate field", Array, MixedDataType)
            .repeating()
            .subfield("YCOO", b24)
            .subfield("XCOO", b24),
        FieldDefn::new("SG3D", "3-D coordinate (sounding array) field", Array, MixedDataType)
            .repeating()
            .subfield("YCOO", b24)
            .subfield("XCOO", b24)
            .subfield("VE3D", b24),
        FieldDefn::new("FRID", "Feature record identifier field", Vector, MixedDataType)
            .subfield("RCNM", b11)
            .subfield("RCID", b14)
            .subfield("PRIM", b11)
            .subfield("GRUP", b11)
            .subfield("OBJL", b12)
            .subfield("RVER", b12)
            .subfield("RUIN", b11),
        FieldDefn::new("FOID", "Feature object identifier field", Vector, MixedDataType)
            .subfield("AGEN", b12)
            .subfield("FIDN", b14)
            .subfield("FIDS", b12),
        FieldDefn::new("ATTF", "Feature record attribute field", Array, MixedDataType)
            .repeating()
            .subfield("ATTL", b12)
            .subfield("ATVL", a),
        FieldDefn::new("NATF", "Feature record national attribute field", Array, MixedDataType)
            .repeating()
            .subfield("ATTL", b12)
            .subfield("ATVL", a),
        FieldDefn::new("FFPC", "Feature record to feature object pointer control field", Vector, MixedDataType)
            .subfield("FFUI", b11)
            .subfield("FFIX", b12)
            .subfield("NFPT", b12),
        FieldDefn::new("FFPT", "Feature record to feature object pointer field", Array, MixedDataType)
            .repeating()
            .subfield("LNAM", Bits(64))
            .subfield("RIND", b11)
            .subfield("COMT", a),
        FieldDefn::new("FSPC", "Feature record to spatial record pointer control field", Vector, MixedDataType)
            .subfield("FSUI", b11)
            .subfield("FSIX", b12)
            .subfield("NSPT", b12),
        FieldDefn::new("FSPT", "Feature record to spatial record pointer field", Array, MixedDataType)
            .repeating()
            .subfield("NAME", Bits(40))
            .subfield("ORNT", b11)
            .subfield("USAG", b11)
            .subfield("MASK", b11),
    ]
}

/// Dataset identification values written by `write_dsid`
#[derive(Debug, Clone, PartialEq)]
pub struct DsidParams {
    pub expp: i32,
    pub intu: i32,
    pub dsnm: String,
    pub edtn: String,
    pub updn: String,
    pub uadt: String,
    pub isdt: String,
    pub sted: String,
    pub prsp: i32,
    pub psdn: String,
    pub pred: String,
    pub prof: i32,
    pub agen: i32,
    pub comt: String,
    pub dstr: i32,
    pub aall: i32,
    pub nall: i32,
    pub nomr: i32,
    pub nocr: i32,
    pub nogr: i32,
    pub nolr: i32,
    pub noin: i32,
    pub nocn: i32,
    pub noed: i32,
    pub nofa: i32,
}

impl Default for DsidParams {
    fn default() -> Self {
        Self {
            expp: 1,
            intu: 4,
            dsnm: String::new(),
            edtn: "2".to_string(),
            updn: "0".to_string(),
            uadt: "20030801".to_string(),
            isdt: "20030801".to_string(),
            sted: "03.1".to_string(),
            prsp: 1,
            psdn: String::new(),
            pred: "2.0".to_string(),
            prof: 1,
            agen: 540,
            comt: String::new(),
            dstr: 2,
            aall: 0,
            nall: 0,
            nomr: 0,
            nocr: 0,
            nogr: 0,
            nolr: 0,
            noin: 0,
            nocn: 0,
            noed: 0,
            nofa: 0,
        }
    }
}

/// Dataset parameter values written by `write_dspm`
#[derive(Debug, Clone, PartialEq)]
pub struct DspmParams {
    pub hdat: i32,
    pub vdat: i32,
    pub sdat: i32,
    pub cscl: i32,
    pub duni: i32,
    pub huni: i32,
    pub puni: i32,
    pub coun: i32,
    pub comf: i32,
    pub somf: i32,
    pub comt: String,
}

impl Default for DspmParams {
    fn default() -> Self {
        Self {
            hdat: 2,
            vdat: 17,
            sdat: 23,
            cscl: 52000,
            duni: 1,
            huni: 1,
            puni: 1,
            coun: 1,
            comf: 10_000_000,
            somf: 10,
            comt: String::new(),
        }
    }
}

fn int(value: i32) -> Value {
    Value::Int(value as i64)
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

/// NAME subfield bytes: the RCNM byte then the little-endian RCID
fn name_bytes(rcnm: i32, rcid: i32) -> Value {
    let mut bytes = Vec::with_capacity(5);
    bytes.push(rcnm as u8);
    bytes.extend_from_slice(&rcid.to_le_bytes());
    Value::Bytes(bytes)
}

/// FFPT LNAM bytes from the 16 hex digit printed form
fn lnam_bytes(lnam: &str) -> Result<Value, S57Error> {
    let invalid = || S57Error::WriteError(format!("Invalid LNAM reference '{}'", lnam));
    if lnam.len() != 16 || !lnam.is_ascii() {
        return Err(invalid());
    }

    let mut bytes = [0u8; 8];
    for (pair, &position) in LNAM_BYTE_ORDER.iter().enumerate() {
        let digits = &lnam[pair * 2..pair * 2 + 2];
        bytes[position] = u8::from_str_radix(digits, 16).map_err(|_| invalid())?;
    }
    Ok(Value::Bytes(bytes.to_vec()))
}

fn check_date(name: &str, value: &str) -> Result<(), S57Error> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map(|_| ())
        .map_err(|e| S57Error::WriteError(format!("Invalid {} date '{}': {}", name, value, e)))
}

/// Writer for one new S-57 cell
pub struct S57Writer {
    module: Option<ModuleWriter>,
    catalog: Option<Arc<ClassCatalog>>,
    next_record_id: i64,
    comf: i32,
    somf: i32,
    /// DSSI NALL of the written header; 2 writes NATF text as UCS-2
    nall: i32,
}

impl S57Writer {
    /// Create the output file and write its data descriptive record
    pub fn create(path: impl AsRef<Path>) -> Result<Self, S57Error> {
        let module = ModuleWriter::create(path.as_ref(), s57_field_defns())?;
        log::debug!("Created S-57 output {}", path.as_ref().display());

        Ok(Self {
            module: Some(module),
            catalog: None,
            next_record_id: 1,
            comf: DspmParams::default().comf,
            somf: DspmParams::default().somf,
            nall: 0,
        })
    }

    pub fn set_catalog(&mut self, catalog: Arc<ClassCatalog>) {
        self.catalog = Some(catalog);
    }

    pub fn comf(&self) -> i32 {
        self.comf
    }

    pub fn somf(&self) -> i32 {
        self.somf
    }

    /// Field definition of the output module
    pub fn field_defn(&self, tag: &str) -> Result<Arc<FieldDefn>, S57Error> {
        self.module
            .as_ref()
            .ok_or(S57Error::NotOpen)?
            .find_field_defn(tag)
            .ok_or_else(|| S57Error::WriteError(format!("No field definition for {}", tag)))
    }

    fn add_row(&self, record: &mut Record, tag: &str, row: Vec<Value>) -> Result<(), S57Error> {
        record.add_field(self.field_defn(tag)?).push_row(row);
        Ok(())
    }

    /// New record carrying the next record identifier
    pub fn make_record(&mut self) -> Result<Record, S57Error> {
        let mut record = Record::new();
        let id = self.next_record_id;
        // The b12 record identifier wraps on cells with more than 65535 records
        self.add_row(&mut record, "0001", vec![Value::Int(id & 0xffff)])?;
        self.next_record_id += 1;
        Ok(record)
    }

    pub fn write_record(&mut self, record: &Record) -> Result<(), S57Error> {
        self.module
            .as_mut()
            .ok_or(S57Error::NotOpen)?
            .write_record(record)?;
        Ok(())
    }

    /// Write the dataset identification record (DSID + DSSI)
    pub fn write_dsid(&mut self, params: &DsidParams) -> Result<(), S57Error> {
        check_date("UADT", &params.uadt)?;
        check_date("ISDT", &params.isdt)?;
        self.nall = params.nall;

        let mut record = self.make_record()?;
        self.add_row(
            &mut record,
            "DSID",
            vec![
                int(RCNM_DSID),
                int(1),
                int(params.expp),
                int(params.intu),
                text(&params.dsnm),
                text(&params.edtn),
                text(&params.updn),
                text(&params.uadt),
                text(&params.isdt),
                text(&params.sted),
                int(params.prsp),
                text(&params.psdn),
                text(&params.pred),
                int(params.prof),
                int(params.agen),
                text(&params.comt),
            ],
        )?;
        self.add_row(
            &mut record,
            "DSSI",
            vec![
                int(params.dstr),
                int(params.aall),
                int(params.nall),
                int(params.nomr),
                int(params.nocr),
                int(params.nogr),
                int(params.nolr),
                int(params.noin),
                int(params.nocn),
                int(params.noed),
                int(params.nofa),
            ],
        )?;
        self.write_record(&record)
    }

    /// Write the dataset parameter record and adopt its multiplication factors
    pub fn write_dspm(&mut self, params: &DspmParams) -> Result<(), S57Error> {
        self.comf = params.comf.max(1);
        self.somf = params.somf.max(1);

        let mut record = self.make_record()?;
        self.add_row(
            &mut record,
            "DSPM",
            vec![
                int(RCNM_DSPM),
                int(1),
                int(params.hdat),
                int(params.vdat),
                int(params.sdat),
                int(params.cscl),
                int(params.duni),
                int(params.huni),
                int(params.puni),
                int(params.coun),
                int(params.comf),
                int(params.somf),
                text(&params.comt),
            ],
        )?;
        self.write_record(&record)
    }

    /// Append an SG2D (or SG3D when `with_z`) field holding the points.
    /// Nothing is appended when a scaled value does not fit the b24 subfields.
    pub fn write_geometry(&self, record: &mut Record, points: &[Point], with_z: bool) -> Result<(), S57Error> {
        let scale = |v: f64, mult: i32| -> Result<Value, S57Error> {
            let scaled = (v * mult as f64 + 0.5).floor();
            if !(i32::MIN as f64..=i32::MAX as f64).contains(&scaled) {
                return Err(S57Error::WriteError(format!(
                    "Coordinate {} out of range at multiplication factor {}",
                    v, mult
                )));
            }
            Ok(Value::Int(scaled as i64))
        };

        let mut rows = Vec::with_capacity(points.len());
        for point in points {
            let mut row = vec![scale(point.y, self.comf)?, scale(point.x, self.comf)?];
            if with_z {
                row.push(scale(point.z.unwrap_or(0.0), self.somf)?);
            }
            rows.push(row);
        }

        let tag = if with_z { "SG3D" } else { "SG2D" };
        record.push_field(Field::with_rows(self.field_defn(tag)?, rows));
        Ok(())
    }

    /// Write a primitive feature from one of the primitive layers
    pub fn write_primitive(&mut self, feature: &Feature) -> Result<(), S57Error> {
        let kind = PrimitiveKind::from_layer_name(feature.defn().name()).ok_or_else(|| {
            S57Error::WriteError(format!("{} is not a primitive layer", feature.defn().name()))
        })?;

        let mut record = self.make_record()?;
        let rcid = feature.field_as_integer("RCID").unwrap_or(UNSET_RCID);
        self.add_row(
            &mut record,
            "VRID",
            vec![
                int(kind.rcnm()),
                Value::Int(rcid),
                Value::Int(feature.field_as_integer("RVER").unwrap_or(1)),
                Value::Int(feature.field_as_integer("RUIN").unwrap_or(1)),
            ],
        )?;

        match feature.geometry() {
            Some(Geometry::Point(point)) => {
                self.write_geometry(&mut record, std::slice::from_ref(point), point.z.is_some())?;
            }
            Some(Geometry::MultiPoint(points)) => self.write_geometry(&mut record, points, true)?,
            Some(Geometry::LineString(points)) => self.write_geometry(&mut record, points, false)?,
            Some(other) => log::debug!(
                "Geometry {} not written for primitive {}",
                other.type_name(),
                rcid
            ),
            None => {}
        }

        if kind == PrimitiveKind::Edge {
            let mut rows = Vec::new();
            for end in 0..2 {
                let Some(node) = feature.field_as_integer(&format!("NAME_RCID_{}", end)) else {
                    continue;
                };
                let get = |name: &str| feature.field_as_integer(&format!("{}_{}", name, end));
                rows.push(vec![
                    name_bytes(get("NAME_RCNM").unwrap_or(120) as i32, node as i32),
                    Value::Int(get("ORNT").unwrap_or(255)),
                    Value::Int(get("USAG").unwrap_or(255)),
                    Value::Int(get("TOPI").unwrap_or(255)),
                    Value::Int(get("MASK").unwrap_or(255)),
                ]);
            }
            if !rows.is_empty() {
                let vrpt = record.add_field(self.field_defn("VRPT")?);
                for row in rows {
                    vrpt.push_row(row);
                }
            }
        }

        self.write_record(&record)
    }

    /// Append ATTF and NATF fields with the catalog attributes set on the
    /// feature. National attributes go to NATF, as UCS-2 when NALL is 2.
    pub fn write_attf(&self, record: &mut Record, feature: &Feature) -> Result<(), S57Error> {
        let Some(catalog) = self.catalog.as_deref() else {
            return Ok(());
        };
        let class = feature
            .field_as_integer("OBJL")
            .and_then(|objl| catalog.select_class(objl as i32))
            .or_else(|| catalog.select_class_by_acronym(feature.defn().name()));
        let Some(class) = class else {
            return Ok(());
        };

        let mut rows = Vec::new();
        let mut national_rows = Vec::new();
        let (mut staged, mut national_staged) = (0usize, 0usize);
        for acronym in class.attribute_list(None) {
            let Some(value) = feature.field(acronym) else {
                continue;
            };
            let Some(attl) = catalog.find_attr_by_acronym(acronym) else {
                continue;
            };

            let atvl = match value {
                FieldValue::Integer(v) if *v == EMPTY_NUMBER_MARKER as i64 => String::new(),
                FieldValue::Real(v) if *v == EMPTY_NUMBER_MARKER as f64 => String::new(),
                other => other.as_string(),
            };

            let national = catalog.attr_info(attl).is_some_and(|info| info.class == 'N');
            let (atvl, size, counter) = match (national, self.nall) {
                (true, 2) => {
                    let raw = encode_ucs2(&atvl);
                    let size = 2 + raw.len() + 2;
                    (Value::Bytes(raw), size, &mut national_staged)
                }
                (true, _) => (Value::Text(atvl.clone()), 2 + atvl.len() + 1, &mut national_staged),
                (false, _) => (Value::Text(atvl.clone()), 2 + atvl.len() + 1, &mut staged),
            };

            *counter += size;
            if *counter > ATTF_STAGING_LIMIT {
                return Err(S57Error::WriteError(format!(
                    "Too much {} data for fixed buffer size on feature {}",
                    if national { "NATF" } else { "ATTF" },
                    feature.defn().name()
                )));
            }
            let row = vec![int(attl), atvl];
            if national {
                national_rows.push(row);
            } else {
                rows.push(row);
            }
        }

        if !rows.is_empty() {
            record.push_field(Field::with_rows(self.field_defn("ATTF")?, rows));
        }
        if !national_rows.is_empty() {
            record.push_field(Field::with_rows(self.field_defn("NATF")?, national_rows));
        }
        Ok(())
    }

    /// Write a feature: primitives as vector records, everything else as a
    /// feature record with FOID, ATTF / NATF, FSPT and FFPT as available
    pub fn write_complete_feature(&mut self, feature: &Feature) -> Result<(), S57Error> {
        if PrimitiveKind::from_layer_name(feature.defn().name()).is_some() {
            return self.write_primitive(feature);
        }

        let mut record = self.make_record()?;
        let value = |name: &str, default: i64| Value::Int(feature.field_as_integer(name).unwrap_or(default));
        let prim = feature.field_as_integer("PRIM").unwrap_or(255);

        self.add_row(
            &mut record,
            "FRID",
            vec![
                int(RCNM_FE),
                value("RCID", UNSET_RCID),
                Value::Int(prim),
                value("GRUP", 2),
                value("OBJL", 0),
                value("RVER", 1),
                int(1),
            ],
        )?;
        self.add_row(
            &mut record,
            "FOID",
            vec![value("AGEN", 0), value("FIDN", 0), value("FIDS", 0)],
        )?;

        self.write_attf(&mut record, feature)?;

        if let Some(rcids) = feature.field_as_integer_list("NAME_RCID") {
            let default_rcnm = (if prim == PRIM_P as i64 { RCNM_VI } else { RCNM_VE }) as i64;
            let list = |name: &str| feature.field_as_integer_list(name).unwrap_or_default();
            let (rcnms, ornts, usags, masks) = (list("NAME_RCNM"), list("ORNT"), list("USAG"), list("MASK"));

            let fspt = record.add_field(self.field_defn("FSPT")?);
            for (i, rcid) in rcids.iter().enumerate() {
                fspt.push_row(vec![
                    name_bytes(rcnms.get(i).copied().unwrap_or(default_rcnm) as i32, *rcid as i32),
                    Value::Int(ornts.get(i).copied().unwrap_or(255)),
                    Value::Int(usags.get(i).copied().unwrap_or(255)),
                    Value::Int(masks.get(i).copied().unwrap_or(255)),
                ]);
            }
        }

        if let Some(refs) = feature.field_as_string_list("LNAM_REFS").filter(|r| !r.is_empty()) {
            let rinds = feature.field_as_integer_list("FFPT_RIND").unwrap_or_default();
            let mut rows = Vec::with_capacity(refs.len());
            for (i, lnam) in refs.iter().enumerate() {
                rows.push(vec![
                    lnam_bytes(lnam)?,
                    Value::Int(rinds.get(i).copied().unwrap_or(2)),
                    text(""),
                ]);
            }
            record.push_field(Field::with_rows(self.field_defn("FFPT")?, rows));
        }

        self.write_record(&record)
    }

    /// Flush and release the output file
    pub fn close(mut self) -> Result<(), S57Error> {
        if let Some(mut module) = self.module.take() {
            module.flush()?;
            log::debug!("Closed S-57 output {}", module.path().display());
        }
        Ok(())
    }
}
