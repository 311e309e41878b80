// S-57 Reader
// Ingests a cell into primitive and feature indexes and assembles features on demand

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::iso8211::{decode_latin1, decode_ucs2, Field, Module, Record, Value};

use super::catalog::ClassCatalog;
use super::feature::{Feature, FeatureDefn, FieldValue};
use super::featuredefns::{
    generate_dsid_defn, generate_generic_defn, generate_geom_defn, generate_object_class_defn,
    generate_primitive_defn,
};
use super::geometry::{stroke_arc, Geometry, GeometryKind, Point};
use super::options::ReaderOptions;
use super::polygon::build_polygon_from_edges;
use super::record_index::RecordIndex;
use super::update::is_base_cell;
use super::{
    PrimitiveKind, S57Error, DEFAULT_COMF, DEFAULT_SOMF, DSID_LAYER, EMPTY_NUMBER_MARKER, PRIM_A,
    PRIM_L, PRIM_N, PRIM_P, RCNM_DSID, RCNM_VC, RCNM_VI, SOUNDG_OBJL,
};

/// Largest gap between consecutive edge ends still treated as one line
const LINE_JOIN_TOLERANCE: f64 = 1e-8;

/// Vertices used to stroke an arc edge
const ARC_VERTEX_COUNT: usize = 30;

/// Pull (RCNM, RCID) out of a NAME subfield: one kind byte, then a little-endian i32
pub fn parse_name(field: &Field, row: usize) -> Option<(i32, i32)> {
    let bytes = field.bytes_value("NAME", row)?;
    if bytes.len() < 5 {
        return None;
    }
    let rcid = i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Some((bytes[0] as i32, rcid))
}

/// Splits one multipoint sounding feature into single point features.
///
/// Every yielded feature is a copy of the source with one vertex as its
/// geometry, and a DEPTH field when depth injection is on. The sequence is
/// finite and cannot be restarted.
#[derive(Debug)]
pub struct SoundingSplitter {
    template: Feature,
    points: std::vec::IntoIter<Point>,
    add_depth: bool,
}

impl SoundingSplitter {
    pub fn new(mut feature: Feature, add_depth: bool) -> Self {
        let points = match feature.take_geometry() {
            Some(Geometry::MultiPoint(points)) => points,
            Some(Geometry::Point(point)) => vec![point],
            _ => Vec::new(),
        };
        Self {
            template: feature,
            points: points.into_iter(),
            add_depth,
        }
    }

    pub fn defn(&self) -> &Arc<FeatureDefn> {
        self.template.defn()
    }

    /// Soundings not yet returned
    pub fn remaining(&self) -> usize {
        self.points.len()
    }
}

impl Iterator for SoundingSplitter {
    type Item = Feature;

    fn next(&mut self) -> Option<Feature> {
        let point = self.points.next()?;
        let mut feature = self.template.clone();
        if self.add_depth {
            if let Some(depth) = point.z {
                feature.set_field("DEPTH", FieldValue::Real(depth));
            }
        }
        feature.set_geometry(Geometry::Point(point));
        Some(feature)
    }
}

/// Reader for one S-57 cell
pub struct S57Reader {
    path: PathBuf,
    module: Option<Module>,
    options: ReaderOptions,
    catalog: Option<Arc<ClassCatalog>>,
    ingested: bool,

    /// One index per primitive kind, in `PrimitiveKind` order
    pub(super) vector_indexes: [RecordIndex; 4],
    /// Feature records, with the resolved feature definition cached per entry
    pub(super) fe_index: RecordIndex<Arc<FeatureDefn>>,
    pub(super) dsid_record: Option<Record>,
    dspm_record: Option<Record>,
    /// DSID.UPDN of the most recent update file applied
    pub(super) update_number: Option<String>,
    dataset_name: String,
    /// DSSI lexical levels of ATTF and NATF text
    aall: i32,
    nall: i32,
    comf: i32,
    somf: i32,

    next_fe_index: usize,
    next_vector_index: [usize; 4],
    next_dsid_index: usize,

    feature_defns: Vec<Arc<FeatureDefn>>,
    defn_by_objl: HashMap<i32, Arc<FeatureDefn>>,
    dsid_defn: Option<Arc<FeatureDefn>>,
    defns_built: bool,

    pending: Option<SoundingSplitter>,
    attr_warning_issued: Cell<bool>,
    missing_warning_issued: Cell<bool>,
}

impl S57Reader {
    /// Open a cell. The file must carry a DSID field definition.
    pub fn open(
        path: impl AsRef<Path>,
        options: ReaderOptions,
        catalog: Option<Arc<ClassCatalog>>,
    ) -> Result<Self, S57Error> {
        options.validate()?;

        let path = path.as_ref().to_path_buf();
        let mut module = Module::open(&path)?;

        if module.find_field_defn("DSID").is_none() {
            return Err(S57Error::NotS57(format!(
                "{} is an ISO 8211 file, but not an S-57 data file",
                path.display()
            )));
        }

        // Some producers declare FSPT without the repeating flag
        if let Some(fspt) = module.find_field_defn("FSPT") {
            if !fspt.repeating {
                log::debug!("Forcing FSPT field to be repeating.");
                module.force_repeating("FSPT");
            }
        }

        Ok(Self {
            path,
            module: Some(module),
            options,
            catalog,
            ingested: false,
            vector_indexes: Default::default(),
            fe_index: RecordIndex::new(),
            dsid_record: None,
            dspm_record: None,
            update_number: None,
            dataset_name: String::new(),
            aall: 0,
            nall: 0,
            comf: DEFAULT_COMF,
            somf: DEFAULT_SOMF,
            next_fe_index: 0,
            next_vector_index: [0; 4],
            next_dsid_index: 0,
            feature_defns: Vec::new(),
            defn_by_objl: HashMap::new(),
            dsid_defn: None,
            defns_built: false,
            pending: None,
            attr_warning_issued: Cell::new(false),
            missing_warning_issued: Cell::new(false),
        })
    }

    /// Release the module and every indexed record
    pub fn close(&mut self) {
        self.module = None;
        for index in &mut self.vector_indexes {
            index.clear();
        }
        self.fe_index.clear();
        self.dsid_record = None;
        self.dspm_record = None;
        self.update_number = None;
        self.ingested = false;
        self.pending = None;
        self.rewind();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn catalog(&self) -> Option<&Arc<ClassCatalog>> {
        self.catalog.as_ref()
    }

    pub fn is_ingested(&self) -> bool {
        self.ingested
    }

    /// DSID.DSNM of the cell, empty before ingest
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    /// Coordinate multiplication factor
    pub fn comf(&self) -> i32 {
        self.comf
    }

    /// Sounding multiplication factor
    pub fn somf(&self) -> i32 {
        self.somf
    }

    pub fn vector_index(&self, kind: PrimitiveKind) -> &RecordIndex {
        &self.vector_indexes[kind as usize]
    }

    pub fn feature_index(&self) -> &RecordIndex<Arc<FeatureDefn>> {
        &self.fe_index
    }

    /// Read every record of the module into the indexes.
    ///
    /// Runs once; later calls return immediately. When update application is
    /// on, the update chain of a `.000` base cell is applied afterwards.
    pub fn ingest(&mut self) -> Result<(), S57Error> {
        if self.ingested {
            return Ok(());
        }
        self.ingest_base()?;

        if self.options.apply_updates {
            if is_base_cell(&self.path) {
                self.find_and_apply_updates(None)?;
            } else {
                log::debug!("{} is not a base cell, no updates applied", self.path.display());
            }
        }
        Ok(())
    }

    /// Index the records of the base module only
    pub(super) fn ingest_base(&mut self) -> Result<(), S57Error> {
        if self.ingested {
            return Ok(());
        }

        self.module.as_mut().ok_or(S57Error::NotOpen)?.rewind()?;

        loop {
            let Some(module) = self.module.as_mut() else {
                return Err(S57Error::NotOpen);
            };
            let Some(record) = module.read_record()? else {
                break;
            };
            self.index_record(record)?;
        }

        for index in &mut self.vector_indexes {
            index.sort();
        }
        self.fe_index.sort();
        self.ingested = true;

        log::debug!(
            "Ingested {} feature records and {} primitives from {}",
            self.fe_index.len(),
            self.vector_indexes.iter().map(RecordIndex::len).sum::<usize>(),
            self.path.display()
        );
        Ok(())
    }

    fn index_record(&mut self, record: Record) -> Result<(), S57Error> {
        let Some(key) = record.key_field() else {
            return Err(S57Error::InvalidRecord("Record has no key field".to_string()));
        };
        let tag = key.tag().to_string();
        let rcnm = key.int_value("RCNM", 0).unwrap_or(0) as i32;
        let rcid = key.int_value("RCID", 0).unwrap_or(0) as i32;

        match tag.as_str() {
            "VRID" => {
                let kind = PrimitiveKind::from_rcnm(rcnm).ok_or_else(|| {
                    S57Error::InvalidRecord(format!("Unhandled value for RCNM field {}", rcnm))
                })?;
                self.vector_indexes[kind as usize].add_record(rcid, record);
            }
            "FRID" => self.fe_index.add_record(rcid, record),
            "DSID" => {
                self.dataset_name = record.string_subfield("DSID", 0, "DSNM", 0).unwrap_or_default();
                self.aall = record.int_subfield("DSSI", 0, "AALL", 0).unwrap_or(0) as i32;
                self.nall = record.int_subfield("DSSI", 0, "NALL", 0).unwrap_or(0) as i32;
                log::debug!("DSSI_AALL = {}, DSSI_NALL = {}", self.aall, self.nall);
                if self.options.return_dsid {
                    self.dsid_record = Some(record);
                }
            }
            "DSPM" => {
                let comf = record.int_subfield("DSPM", 0, "COMF", 0).unwrap_or(0);
                let somf = record.int_subfield("DSPM", 0, "SOMF", 0).unwrap_or(0);
                self.comf = comf.clamp(1, i32::MAX as i64) as i32;
                self.somf = somf.clamp(1, i32::MAX as i64) as i32;
                if self.options.return_dsid {
                    self.dspm_record = Some(record);
                }
            }
            other => log::debug!("Skipping {} record in S57Reader::ingest().", other),
        }
        Ok(())
    }

    fn ensure_ready(&mut self) -> Result<(), S57Error> {
        self.ingest()?;
        if !self.defns_built {
            self.build_feature_defns()?;
        }
        Ok(())
    }

    /// Reset every read cursor and drop any pending sounding split
    pub fn rewind(&mut self) {
        self.pending = None;
        self.next_fe_index = 0;
        self.next_vector_index = [0; 4];
        self.next_dsid_index = 0;
    }

    /// Move the read cursor of one record kind. Moving the feature cursor
    /// discards a pending sounding split.
    pub fn set_next_fe_index(&mut self, index: usize, rcnm: i32) {
        match PrimitiveKind::from_rcnm(rcnm) {
            Some(kind) => self.next_vector_index[kind as usize] = index,
            None if rcnm == RCNM_DSID => self.next_dsid_index = index,
            None => {
                if self.next_fe_index != index {
                    self.pending = None;
                }
                self.next_fe_index = index;
            }
        }
    }

    pub fn next_fe_index(&self, rcnm: i32) -> usize {
        match PrimitiveKind::from_rcnm(rcnm) {
            Some(kind) => self.next_vector_index[kind as usize],
            None if rcnm == RCNM_DSID => self.next_dsid_index,
            None => self.next_fe_index,
        }
    }

    /// Install the feature definitions for the current options and catalog.
    ///
    /// With a catalog there is one definition per object class present in
    /// the cell (plus `Generic` for unknown classes); without one there are
    /// the `Point`, `Line`, `Area` and `Meta` layers.
    pub fn build_feature_defns(&mut self) -> Result<(), S57Error> {
        self.ingest()?;

        self.feature_defns.clear();
        self.defn_by_objl.clear();
        self.fe_index.clear_client_info();
        self.dsid_defn = None;

        if self.options.return_dsid {
            let defn = self.add_feature_defn(generate_dsid_defn());
            self.dsid_defn = Some(defn);
        }

        if self.options.return_primitives {
            for kind in PrimitiveKind::ALL {
                self.add_feature_defn(generate_primitive_defn(kind));
            }
        }

        match self.catalog.clone() {
            Some(catalog) => {
                let mut needs_generic = false;
                for objl in self.collect_class_list()?.into_keys() {
                    match generate_object_class_defn(&catalog, objl, &self.options) {
                        Some(defn) => {
                            self.add_feature_defn(defn);
                        }
                        None => {
                            log::debug!("Unknown object class {}, using the Generic layer", objl);
                            needs_generic = true;
                        }
                    }
                }
                if needs_generic {
                    self.add_feature_defn(generate_generic_defn(&self.options));
                }
            }
            None => {
                for prim in [PRIM_P, PRIM_L, PRIM_A, PRIM_N] {
                    self.add_feature_defn(generate_geom_defn(prim, &self.options));
                }
            }
        }

        self.defns_built = true;
        Ok(())
    }

    /// Install one feature definition and return its shared handle
    pub fn add_feature_defn(&mut self, defn: FeatureDefn) -> Arc<FeatureDefn> {
        let defn = Arc::new(defn);
        if let Some(class) = self
            .catalog
            .as_ref()
            .and_then(|c| c.select_class_by_acronym(defn.name()))
        {
            self.defn_by_objl.insert(class.code, Arc::clone(&defn));
        }
        self.feature_defns.push(Arc::clone(&defn));
        self.defns_built = true;
        defn
    }

    pub fn feature_defns(&self) -> &[Arc<FeatureDefn>] {
        &self.feature_defns
    }

    pub fn find_feature_defn(&self, name: &str) -> Option<Arc<FeatureDefn>> {
        self.feature_defns
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Count feature records per object class code
    pub fn collect_class_list(&mut self) -> Result<BTreeMap<i32, usize>, S57Error> {
        self.ingest()?;

        let mut counts = BTreeMap::new();
        for entry in self.fe_index.entries() {
            match entry.record.int_subfield("FRID", 0, "OBJL", 0) {
                Some(objl) if objl >= 0 => *counts.entry(objl as i32).or_insert(0) += 1,
                _ => log::debug!("Feature record {} has no usable OBJL", entry.key),
            }
        }
        Ok(counts)
    }

    /// Definitions a feature record can resolve to
    fn class_defns(&self) -> impl Iterator<Item = &Arc<FeatureDefn>> + '_ {
        self.feature_defns
            .iter()
            .filter(|d| d.name() != DSID_LAYER && PrimitiveKind::from_layer_name(d.name()).is_none())
    }

    /// Feature definition for a feature record: by object class when a
    /// catalog is attached, otherwise by primitive
    fn find_fdefn(&self, record: &Record) -> Option<Arc<FeatureDefn>> {
        match self.catalog.as_deref() {
            Some(catalog) => {
                let objl = record.int_subfield("FRID", 0, "OBJL", 0).unwrap_or(-1) as i32;
                if let Some(defn) = self.defn_by_objl.get(&objl) {
                    return Some(Arc::clone(defn));
                }

                let Some(class) = catalog.select_class(objl) else {
                    return self
                        .class_defns()
                        .find(|d| d.name().eq_ignore_ascii_case("Generic"))
                        .cloned();
                };
                self.class_defns()
                    .find(|d| d.name().eq_ignore_ascii_case(&class.acronym))
                    .cloned()
            }
            None => {
                let kind = match record.int_subfield("FRID", 0, "PRIM", 0).map(|p| p as i32) {
                    Some(PRIM_P) => GeometryKind::Point,
                    Some(PRIM_L) => GeometryKind::LineString,
                    Some(PRIM_A) => GeometryKind::Polygon,
                    _ => GeometryKind::None,
                };
                self.class_defns().find(|d| d.geometry_kind() == kind).cloned()
            }
        }
    }

    /// Cached feature definition of the feature record at `index`
    fn defn_for_index(&mut self, index: usize) -> Option<Arc<FeatureDefn>> {
        let entry = self.fe_index.entries().get(index)?;
        if let Some(defn) = &entry.client {
            return Some(Arc::clone(defn));
        }

        let defn = self.find_fdefn(&entry.record)?;
        self.fe_index.set_client_info_by_index(index, Arc::clone(&defn));
        Some(defn)
    }

    /// Next feature in read order: the DSID header, then primitives (when
    /// enabled), then feature records. With a target only features of that
    /// definition are returned.
    pub fn read_next_feature(
        &mut self,
        target: Option<&Arc<FeatureDefn>>,
    ) -> Result<Option<Feature>, S57Error> {
        self.ensure_ready()?;

        if let Some(splitter) = self.pending.as_mut() {
            if target.map_or(true, |t| Arc::ptr_eq(t, splitter.defn())) {
                if let Some(feature) = splitter.next() {
                    return Ok(Some(feature));
                }
            }
            self.pending = None;
        }

        if self.options.return_dsid
            && self.next_dsid_index == 0
            && target.map_or(true, |t| t.name() == DSID_LAYER)
        {
            match self.read_dsid() {
                Some(feature) => return Ok(Some(feature)),
                None => self.next_dsid_index = 1,
            }
        }

        if self.options.return_primitives {
            let kind = match target {
                None => PrimitiveKind::ALL.into_iter().find(|&k| {
                    self.next_vector_index[k as usize] < self.vector_indexes[k as usize].len()
                }),
                Some(t) => PrimitiveKind::from_layer_name(t.name()),
            };

            if let Some(kind) = kind {
                let cursor = self.next_vector_index[kind as usize];
                if let Some(feature) = self.read_vector(cursor, kind.rcnm()) {
                    self.next_vector_index[kind as usize] += 1;
                    return Ok(Some(feature));
                }
                if target.is_some() {
                    return Ok(None);
                }
            }
        }

        while self.next_fe_index < self.fe_index.len() {
            let index = self.next_fe_index;
            let defn = self.defn_for_index(index);
            self.next_fe_index += 1;

            let Some(defn) = defn else {
                continue;
            };
            if target.is_some_and(|t| !Arc::ptr_eq(t, &defn)) {
                continue;
            }

            let mut feature = self.assemble_feature(&self.fe_index.entries()[index].record, defn);
            feature.set_fid(index as i64);

            if self.options.split_multipoint
                && matches!(feature.geometry(), Some(Geometry::MultiPoint(_)))
            {
                let mut splitter = SoundingSplitter::new(feature, self.options.add_soundg_depth);
                if let Some(first) = splitter.next() {
                    self.pending = Some(splitter);
                    return Ok(Some(first));
                }
                continue;
            }

            return Ok(Some(feature));
        }

        Ok(None)
    }

    /// Read the feature record at `index` of the sorted feature index; the
    /// feature id is that position. Index 0 returns the DSID header feature
    /// instead when header output is on and no other target is given.
    pub fn read_feature(
        &mut self,
        index: usize,
        target: Option<&Arc<FeatureDefn>>,
    ) -> Result<Option<Feature>, S57Error> {
        self.ensure_ready()?;

        if index == 0
            && self.options.return_dsid
            && target.map_or(true, |t| t.name() == DSID_LAYER)
        {
            if let Some(mut feature) = self.read_dsid() {
                feature.set_fid(0);
                return Ok(Some(feature));
            }
        }

        if index >= self.fe_index.len() {
            return Ok(None);
        }

        let Some(defn) = self.defn_for_index(index) else {
            return Ok(None);
        };
        if target.is_some_and(|t| !Arc::ptr_eq(t, &defn)) {
            return Ok(None);
        }

        let mut feature = self.assemble_feature(&self.fe_index.entries()[index].record, defn);
        feature.set_fid(index as i64);
        Ok(Some(feature))
    }

    /// Next feature of one object class. Runs of calls with the same class
    /// resume where the previous call stopped.
    pub fn next_feature_of_class(&mut self, objl: i32) -> Result<Option<Feature>, S57Error> {
        self.ensure_ready()?;

        let Some(index) = self.fe_index.find_record_by_objl_position(objl) else {
            return Ok(None);
        };
        let Some(defn) = self.defn_for_index(index) else {
            return Ok(None);
        };

        let mut feature = self.assemble_feature(&self.fe_index.entries()[index].record, defn);
        feature.set_fid(index as i64);
        Ok(Some(feature))
    }

    /// Iterate the remaining features in read order
    pub fn features(&mut self) -> Features<'_> {
        Features {
            reader: self,
            failed: false,
        }
    }

    fn assemble_feature(&self, record: &Record, defn: Arc<FeatureDefn>) -> Feature {
        let mut feature = Feature::new(defn);

        for name in ["OBJL", "RCID", "PRIM", "GRUP", "RVER"] {
            if let Some(value) = record.int_subfield("FRID", 0, name, 0) {
                feature.set_field(name, FieldValue::Integer(value));
            }
        }
        for name in ["AGEN", "FIDN", "FIDS"] {
            if let Some(value) = record.int_subfield("FOID", 0, name, 0) {
                feature.set_field(name, FieldValue::Integer(value));
            }
        }

        if self.options.lnam_refs {
            generate_lnam_and_refs(record, &mut feature);
        }
        if self.options.return_linkages {
            generate_fspt_attributes(record, &mut feature);
        }
        if self.catalog.is_some() {
            self.apply_object_class_attributes(record, &mut feature);
        }

        let prim = record.int_subfield("FRID", 0, "PRIM", 0).unwrap_or(-1) as i32;
        let objl = record.int_subfield("FRID", 0, "OBJL", 0).unwrap_or(-1) as i32;
        match prim {
            PRIM_P if objl == SOUNDG_OBJL => self.assemble_sounding_geometry(record, &mut feature),
            PRIM_P => self.assemble_point_geometry(record, &mut feature),
            PRIM_L => self.assemble_line_geometry(record, &mut feature),
            PRIM_A => self.assemble_area_geometry(record, &mut feature),
            _ => {}
        }

        feature
    }

    /// Copy ATTF and NATF values into the feature's fields by acronym
    fn apply_object_class_attributes(&self, record: &Record, feature: &mut Feature) {
        let Some(catalog) = self.catalog.as_deref() else {
            return;
        };

        for tag in ["ATTF", "NATF"] {
            let Some(field) = record.find_field(tag) else {
                continue;
            };

            for row in 0..field.repeat_count() {
                let attl = field.int_value("ATTL", row).unwrap_or(-1) as i32;
                let Some(acronym) = catalog.attr_acronym(attl) else {
                    if !self.attr_warning_issued.replace(true) {
                        log::warn!(
                            "Illegal feature attribute id ({}:ATTL[{}]) of {} on feature FIDN={}, FIDS={}.\n\
                             Skipping attribute. No more warnings will be issued on this condition.",
                            tag,
                            row,
                            attl,
                            feature.field_as_integer("FIDN").unwrap_or(0),
                            feature.field_as_integer("FIDS").unwrap_or(0)
                        );
                    }
                    continue;
                };

                let Some(value) = field.value("ATVL", row) else {
                    continue;
                };
                let value = self.attribute_text(value, tag == "NATF");
                self.set_attribute(feature, acronym, &value);
            }
        }
    }

    /// ATVL text of an attribute. With DSSI recoding on, national values of a
    /// NALL 2 cell are UCS-2 and everything else is ISO 8859-1; without it the
    /// codec's UTF-8 / ISO 8859-1 reading stands.
    fn attribute_text(&self, value: &Value, national: bool) -> String {
        if !self.options.recode_by_dssi {
            return value.as_string();
        }
        match value {
            Value::Bytes(raw) if national && self.nall == 2 => decode_ucs2(raw),
            Value::Bytes(raw) => decode_latin1(raw),
            other => other.as_string(),
        }
    }

    /// DSSI ATTF lexical level, 0 before ingest
    pub fn aall(&self) -> i32 {
        self.aall
    }

    /// DSSI NATF lexical level, 0 before ingest
    pub fn nall(&self) -> i32 {
        self.nall
    }

    fn set_attribute(&self, feature: &mut Feature, acronym: &str, value: &str) {
        let Some(field_type) = feature.defn().field_type(acronym) else {
            if !self.missing_warning_issued.replace(true) {
                log::warn!(
                    "Attributes {} ignored, not in expected schema.\n\
                     No more warnings will be issued for this condition.",
                    acronym
                );
            }
            return;
        };

        if field_type.is_numeric() && value.is_empty() {
            if self.options.preserve_empty_numbers {
                feature.set_field(acronym, FieldValue::Integer(EMPTY_NUMBER_MARKER as i64));
            }
            return;
        }
        feature.set_field_from_str(acronym, value);
    }

    /// Build the DSID header feature from the DSID and DSPM records
    pub fn read_dsid(&mut self) -> Option<Feature> {
        if self.dsid_record.is_none() && self.dspm_record.is_none() {
            return None;
        }

        let defn = Arc::clone(
            self.dsid_defn
                .get_or_insert_with(|| Arc::new(generate_dsid_defn())),
        );
        let mut feature = Feature::new(defn);

        if let Some(dsid) = &self.dsid_record {
            for name in ["EXPP", "INTU", "PRSP", "PROF", "AGEN"] {
                if let Some(value) = dsid.int_subfield("DSID", 0, name, 0) {
                    feature.set_field(&format!("DSID_{}", name), FieldValue::Integer(value));
                }
            }
            for name in ["DSNM", "EDTN", "UPDN", "UADT", "ISDT", "PSDN", "PRED", "COMT"] {
                if let Some(value) = dsid.string_subfield("DSID", 0, name, 0) {
                    feature.set_field(&format!("DSID_{}", name), FieldValue::String(value));
                }
            }
            if let Some(sted) = dsid.float_subfield("DSID", 0, "STED", 0) {
                feature.set_field("DSID_STED", FieldValue::Real(sted));
            }
            if let Some(updn) = &self.update_number {
                feature.set_field("DSID_UPDN", FieldValue::String(updn.clone()));
            }

            for name in [
                "DSTR", "AALL", "NALL", "NOMR", "NOCR", "NOGR", "NOLR", "NOIN", "NOCN", "NOED", "NOFA",
            ] {
                if let Some(value) = dsid.int_subfield("DSSI", 0, name, 0) {
                    feature.set_field(&format!("DSSI_{}", name), FieldValue::Integer(value));
                }
            }
        }

        if let Some(dspm) = &self.dspm_record {
            for name in [
                "HDAT", "VDAT", "SDAT", "CSCL", "DUNI", "HUNI", "PUNI", "COUN", "COMF", "SOMF",
            ] {
                if let Some(value) = dspm.int_subfield("DSPM", 0, name, 0) {
                    feature.set_field(&format!("DSPM_{}", name), FieldValue::Integer(value));
                }
            }
            if let Some(comt) = dspm.string_subfield("DSPM", 0, "COMT", 0) {
                feature.set_field("DSPM_COMT", FieldValue::String(comt));
            }
        }

        feature.set_fid(self.next_dsid_index as i64);
        self.next_dsid_index += 1;
        Some(feature)
    }

    /// Read the primitive at position `index` of the index for `rcnm`
    pub fn read_vector(&self, index: usize, rcnm: i32) -> Option<Feature> {
        let kind = PrimitiveKind::from_rcnm(rcnm)?;
        let record = &self.vector_indexes[kind as usize].entries().get(index)?.record;

        let defn = self
            .find_feature_defn(kind.layer_name())
            .unwrap_or_else(|| Arc::new(generate_primitive_defn(kind)));
        let mut feature = Feature::new(defn);

        for name in ["RCNM", "RCID", "RVER", "RUIN"] {
            if let Some(value) = record.int_subfield("VRID", 0, name, 0) {
                feature.set_field(name, FieldValue::Integer(value));
            }
        }
        feature.set_fid(record.int_subfield("VRID", 0, "RCID", 0).unwrap_or(-1));

        match kind {
            PrimitiveKind::IsolatedNode | PrimitiveKind::ConnectedNode => {
                if let Some(sg2d) = record.find_field("SG2D") {
                    if let Some(point) = self.coordinate(sg2d, 0) {
                        feature.set_geometry(Geometry::Point(point));
                    }
                } else if let Some(sg3d) = record.find_field("SG3D") {
                    let mut points: Vec<Point> = (0..sg3d.repeat_count())
                        .filter_map(|row| self.coordinate_3d(sg3d, row))
                        .collect();
                    match points.len() {
                        0 => {}
                        1 => feature.set_geometry(Geometry::Point(points.remove(0))),
                        _ => feature.set_geometry(Geometry::MultiPoint(points)),
                    }
                }
            }
            PrimitiveKind::Edge => {
                let line: Vec<Point> = record
                    .fields_named("SG2D")
                    .flat_map(|sg2d| {
                        (0..sg2d.repeat_count()).filter_map(move |row| self.coordinate(sg2d, row))
                    })
                    .collect();
                if !line.is_empty() {
                    feature.set_geometry(Geometry::LineString(line));
                }
                set_edge_linkages(record, &mut feature);
            }
            PrimitiveKind::Face => {}
        }

        if let Some(catalog) = self.catalog.as_deref() {
            let posacc = catalog.find_attr_by_acronym("POSACC");
            let quapos = catalog.find_attr_by_acronym("QUAPOS");

            for attv in record.fields_named("ATTV") {
                for row in 0..attv.repeat_count() {
                    let attl = attv.int_value("ATTL", row).map(|v| v as i32);
                    let value = attv.string_value("ATVL", row).unwrap_or_default();
                    if attl.is_some() && attl == posacc {
                        feature.set_field_from_str("POSACC", &value);
                    } else if attl.is_some() && attl == quapos {
                        feature.set_field_from_str("QUAPOS", &value);
                    }
                }
            }
        }

        Some(feature)
    }

    fn coordinate(&self, field: &Field, row: usize) -> Option<Point> {
        let x = field.int_value("XCOO", row)?;
        let y = field.int_value("YCOO", row)?;
        let comf = self.comf as f64;
        Some(Point::new(x as f64 / comf, y as f64 / comf))
    }

    fn coordinate_3d(&self, field: &Field, row: usize) -> Option<Point> {
        let mut point = self.coordinate(field, row)?;
        point.z = Some(field.int_value("VE3D", row).unwrap_or(0) as f64 / self.somf as f64);
        Some(point)
    }

    /// Coordinates of an isolated node (RCNM 110) or connected node (any other RCNM)
    pub fn fetch_point(&self, rcnm: i32, rcid: i32) -> Option<Point> {
        let kind = if rcnm == RCNM_VI {
            PrimitiveKind::IsolatedNode
        } else {
            PrimitiveKind::ConnectedNode
        };
        let record = self.vector_indexes[kind as usize].get(rcid)?;

        if let Some(sg2d) = record.find_field("SG2D") {
            self.coordinate(sg2d, 0)
        } else if let Some(sg3d) = record.find_field("SG3D") {
            self.coordinate_3d(sg3d, 0)
        } else {
            None
        }
    }

    /// Horizontal position of the connected node named by a VRPT entry
    fn fetch_node(&self, name: Option<(i32, i32)>) -> Option<Point> {
        let (_, rcid) = name?;
        let point = self.fetch_point(RCNM_VC, rcid)?;
        Some(Point::new(point.x, point.y))
    }

    /// Append the SG2D and AR2D vertices of an edge to `line`, each field's
    /// rows reversed when `reversed`. An arc field is replaced by its stroked
    /// form. Returns false when a coordinate field has no XCOO or YCOO.
    fn append_edge_vertices(&self, edge: &Record, reversed: bool, line: &mut Vec<Point>) -> bool {
        for field in edge.fields() {
            let is_arc = match field.tag() {
                "SG2D" => false,
                "AR2D" => true,
                _ => continue,
            };

            let defn = field.defn();
            if defn.find_subfield("XCOO").is_none() || defn.find_subfield("YCOO").is_none() {
                log::debug!("XCOO or YCOO are NULL");
                return false;
            }

            let mut points: Vec<Point> = (0..field.repeat_count())
                .filter_map(|row| self.coordinate(field, row))
                .collect();
            if points.is_empty() {
                continue;
            }
            if reversed {
                points.reverse();
            }
            line.extend(points);

            // Arc records are start, center, end; stroke them in place
            if is_arc && line.len() >= 3 {
                let last = line.len() - 1;
                let arc = stroke_arc(line[last], line[last - 1], line[last - 2], ARC_VERTEX_COUNT);
                line.truncate(last - 2);
                line.extend(arc);
            }
        }
        true
    }

    fn assemble_point_geometry(&self, record: &Record, feature: &mut Feature) {
        let Some(fspt) = record.find_field("FSPT") else {
            return;
        };
        if fspt.repeat_count() != 1 {
            log::debug!("Point feature encountered with other than one spatial linkage.");
        }

        let name = parse_name(fspt, 0);
        match name.and_then(|(rcnm, rcid)| self.fetch_point(rcnm, rcid)) {
            Some(mut point) => {
                if point.z == Some(0.0) {
                    point.z = None;
                }
                feature.set_geometry(Geometry::Point(point));
            }
            None => {
                let (rcnm, rcid) = name.unwrap_or((0, -1));
                log::warn!(
                    "Failed to fetch {}/{} point geometry for point feature.\n\
                     Feature will have empty geometry.",
                    rcnm,
                    rcid
                );
            }
        }
    }

    fn assemble_sounding_geometry(&self, record: &Record, feature: &mut Feature) {
        let Some(fspt) = record.find_field("FSPT") else {
            return;
        };
        if fspt.repeat_count() != 1 {
            return;
        }
        let Some((rcnm, rcid)) = parse_name(fspt, 0) else {
            return;
        };

        let kind = if rcnm == RCNM_VI {
            PrimitiveKind::IsolatedNode
        } else {
            PrimitiveKind::ConnectedNode
        };
        let Some(node) = self.vector_indexes[kind as usize].get(rcid) else {
            return;
        };
        let Some(coords) = node.find_field("SG2D").or_else(|| node.find_field("SG3D")) else {
            return;
        };

        let mut points: Vec<Point> = (0..coords.repeat_count())
            .filter_map(|row| self.coordinate_3d(coords, row))
            .collect();

        match points.len() {
            0 => {}
            1 => {
                let point = points.remove(0);
                if self.options.add_soundg_depth {
                    if let Some(depth) = point.z {
                        feature.set_field("DEPTH", FieldValue::Real(depth));
                    }
                }
                feature.set_geometry(Geometry::Point(point));
            }
            _ => feature.set_geometry(Geometry::MultiPoint(points)),
        }
    }

    fn assemble_line_geometry(&self, record: &Record, feature: &mut Feature) {
        let feature_rcid = record.int_subfield("FRID", 0, "RCID", 0).unwrap_or(-1);
        let edges = &self.vector_indexes[PrimitiveKind::Edge as usize];

        let mut parts: Vec<Vec<Point>> = Vec::new();
        let mut line: Vec<Point> = Vec::new();

        for fspt in record.fields_named("FSPT") {
            let mut last_end = Point::new(0.0, 0.0);

            for row in 0..fspt.repeat_count() {
                let reversed = fspt.int_value("ORNT", row) == Some(2);
                let rcid = parse_name(fspt, row).map_or(-1, |(_, id)| id);

                let Some(edge) = edges.get(rcid) else {
                    log::warn!(
                        "Couldn't find spatial record {}.\n\
                         Feature OBJL={}, RCID={} may have corrupt or missing geometry.",
                        rcid,
                        feature.defn().name(),
                        feature_rcid
                    );
                    continue;
                };

                let Some(vrpt) = edge.find_field("VRPT") else {
                    log::warn!(
                        "Couldn't find field VRPT in spatial record {}.\n\
                         Feature OBJL={}, RCID={} may have corrupt or missing geometry.",
                        rcid,
                        feature.defn().name(),
                        feature_rcid
                    );
                    continue;
                };

                // End nodes sit in one two-row VRPT or in two single-row VRPTs
                let (first_node, last_node) = if vrpt.repeat_count() == 1 {
                    let Some(second) = edge.find_field_nth("VRPT", 1) else {
                        log::warn!(
                            "Unable to fetch last node of edge {}.\n\
                             Feature OBJL={}, RCID={} may have corrupt or missing geometry.",
                            rcid,
                            feature.defn().name(),
                            feature_rcid
                        );
                        continue;
                    };
                    (parse_name(vrpt, 0), parse_name(second, 0))
                } else {
                    (parse_name(vrpt, 0), parse_name(vrpt, 1))
                };
                let (start_node, end_node) = if reversed {
                    (last_node, first_node)
                } else {
                    (first_node, last_node)
                };

                let Some(start) = self.fetch_node(start_node) else {
                    log::warn!(
                        "Unable to fetch start node RCID={}.\n\
                         Feature OBJL={}, RCID={} may have corrupt or missing geometry.",
                        start_node.map_or(-1, |(_, id)| id),
                        feature.defn().name(),
                        feature_rcid
                    );
                    continue;
                };

                if line.is_empty() {
                    line.push(start);
                } else if (start.x - last_end.x).abs() > LINE_JOIN_TOLERANCE
                    || (start.y - last_end.y).abs() > LINE_JOIN_TOLERANCE
                {
                    parts.push(std::mem::take(&mut line));
                    line.push(start);
                }

                if !self.append_edge_vertices(edge, reversed, &mut line) {
                    return;
                }
                last_end = line.last().copied().unwrap_or(start);

                match self.fetch_node(end_node) {
                    Some(end) => {
                        line.push(end);
                        last_end = end;
                    }
                    None => {
                        log::warn!(
                            "Unable to fetch end node RCID={}.\n\
                             Feature OBJL={}, RCID={} may have corrupt or missing geometry.",
                            end_node.map_or(-1, |(_, id)| id),
                            feature.defn().name(),
                            feature_rcid
                        );
                    }
                }
            }
        }

        if !parts.is_empty() {
            parts.push(line);
            feature.set_geometry(Geometry::MultiLineString(parts));
        } else if line.len() >= 2 {
            feature.set_geometry(Geometry::LineString(line));
        }
    }

    fn assemble_area_geometry(&self, record: &Record, feature: &mut Feature) {
        let feature_rcid = record.int_subfield("FRID", 0, "RCID", 0).unwrap_or(-1);
        let edge_index = &self.vector_indexes[PrimitiveKind::Edge as usize];
        let mut edges: Vec<Vec<Point>> = Vec::new();

        for fspt in record.fields_named("FSPT") {
            for row in 0..fspt.repeat_count() {
                let rcid = parse_name(fspt, row).map_or(-1, |(_, id)| id);

                let Some(edge) = edge_index.get(rcid) else {
                    log::warn!(
                        "Couldn't find spatial record {}.\n\
                         Feature OBJL={}, RCID={} may have corrupt or missing geometry.",
                        rcid,
                        feature.defn().name(),
                        feature_rcid
                    );
                    continue;
                };

                let mut line = Vec::new();
                let vrpt = edge.find_field("VRPT");
                if let Some(start) = self.fetch_node(vrpt.and_then(|v| parse_name(v, 0))) {
                    line.push(start);
                }

                if !self.append_edge_vertices(edge, false, &mut line) {
                    log::debug!("Failed to collect the vertices of edge {} for area assembly", rcid);
                }

                let end_node = match vrpt {
                    Some(v) if v.repeat_count() > 1 => parse_name(v, 1),
                    _ => edge.find_field_nth("VRPT", 1).and_then(|v| parse_name(v, 0)),
                };
                if let Some(end) = self.fetch_node(end_node) {
                    line.push(end);
                }

                edges.push(line);
            }
        }

        if edges.is_empty() {
            return;
        }

        match build_polygon_from_edges(&edges, 0.0) {
            Some(polygon) => feature.set_geometry(polygon),
            None => log::warn!(
                "Polygon assembly has failed for feature FIDN={},FIDS={}.\n\
                 Geometry may be missing or incomplete.",
                feature.field_as_integer("FIDN").unwrap_or(0),
                feature.field_as_integer("FIDS").unwrap_or(0)
            ),
        }
    }

    /// Bounds of every vector primitive as [min_x, min_y, max_x, max_y].
    ///
    /// Without `force`, a reader that has not ingested yet reports None
    /// instead of ingesting. The scan stays in stored integer units until the
    /// final division.
    pub fn get_extent(&mut self, force: bool) -> Result<Option<[f64; 4]>, S57Error> {
        if !force && !self.ingested {
            return Ok(None);
        }
        self.ingest()?;

        let mut extent: Option<[i64; 4]> = None;
        for index in &self.vector_indexes {
            for entry in index.entries() {
                let record = &entry.record;
                let Some(coords) = record.find_field("SG3D").or_else(|| record.find_field("SG2D")) else {
                    continue;
                };

                for row in 0..coords.repeat_count() {
                    let (Some(x), Some(y)) = (coords.int_value("XCOO", row), coords.int_value("YCOO", row)) else {
                        continue;
                    };
                    extent = Some(match extent {
                        None => [x, y, x, y],
                        Some([min_x, min_y, max_x, max_y]) => {
                            [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)]
                        }
                    });
                }
            }
        }

        let comf = self.comf as f64;
        Ok(extent.map(|[min_x, min_y, max_x, max_y]| {
            [min_x as f64 / comf, min_y as f64 / comf, max_x as f64 / comf, max_y as f64 / comf]
        }))
    }
}

/// Iterator over the remaining features of a reader
pub struct Features<'a> {
    reader: &'a mut S57Reader,
    failed: bool,
}

impl Iterator for Features<'_> {
    type Item = Result<Feature, S57Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.reader.read_next_feature(None).transpose();
        if matches!(next, Some(Err(_))) {
            self.failed = true;
        }
        next
    }
}

/// LNAM from FOID, plus LNAM_REFS and FFPT_RIND from the FFPT pointers
fn generate_lnam_and_refs(record: &Record, feature: &mut Feature) {
    let Some(foid) = record.find_field("FOID") else {
        return;
    };
    let agen = foid.int_value("AGEN", 0).unwrap_or(0);
    let fidn = foid.int_value("FIDN", 0).unwrap_or(0);
    let fids = foid.int_value("FIDS", 0).unwrap_or(0);
    feature.set_field(
        "LNAM",
        FieldValue::String(format!("{:04X}{:08X}{:04X}", agen as u16, fidn as u32, fids as u16)),
    );

    let Some(ffpt) = record.find_field("FFPT") else {
        return;
    };

    let mut refs = Vec::with_capacity(ffpt.repeat_count());
    let mut rinds = Vec::with_capacity(ffpt.repeat_count());
    for row in 0..ffpt.repeat_count() {
        let Some(bytes) = ffpt.bytes_value("LNAM", row).filter(|b| b.len() >= 8) else {
            log::debug!("Short LNAM in FFPT row {}", row);
            continue;
        };
        // AGEN and FIDS are 16 bit, FIDN 32 bit, all little-endian
        let lnam: String = [1, 0, 5, 4, 3, 2, 7, 6]
            .iter()
            .map(|&i| format!("{:02X}", bytes[i]))
            .collect();
        refs.push(lnam);
        rinds.push(ffpt.int_value("RIND", row).unwrap_or(0));
    }

    feature.set_field("LNAM_REFS", FieldValue::StringList(refs));
    feature.set_field("FFPT_RIND", FieldValue::IntegerList(rinds));
}

/// NAME_RCNM / NAME_RCID / ORNT / USAG / MASK lists from the first FSPT
fn generate_fspt_attributes(record: &Record, feature: &mut Feature) {
    let Some(fspt) = record.find_field("FSPT") else {
        return;
    };

    let count = fspt.repeat_count();
    let mut rcnms = Vec::with_capacity(count);
    let mut rcids = Vec::with_capacity(count);
    let mut ornts = Vec::with_capacity(count);
    let mut usags = Vec::with_capacity(count);
    let mut masks = Vec::with_capacity(count);

    for row in 0..count {
        let (rcnm, rcid) = parse_name(fspt, row).unwrap_or((0, -1));
        rcnms.push(rcnm as i64);
        rcids.push(rcid as i64);
        ornts.push(fspt.int_value("ORNT", row).unwrap_or(0));
        usags.push(fspt.int_value("USAG", row).unwrap_or(0));
        masks.push(fspt.int_value("MASK", row).unwrap_or(0));
    }

    feature.set_field("NAME_RCNM", FieldValue::IntegerList(rcnms));
    feature.set_field("NAME_RCID", FieldValue::IntegerList(rcids));
    feature.set_field("ORNT", FieldValue::IntegerList(ornts));
    feature.set_field("USAG", FieldValue::IntegerList(usags));
    feature.set_field("MASK", FieldValue::IntegerList(masks));
}

/// Start and end node linkage fields of an edge primitive
fn set_edge_linkages(record: &Record, feature: &mut Feature) {
    let Some(vrpt) = record.find_field("VRPT") else {
        return;
    };

    let (end_field, end_row) = if vrpt.repeat_count() == 1 {
        match record.find_field_nth("VRPT", 1) {
            Some(second) => (second, 0),
            None => {
                log::warn!(
                    "Unable to fetch last edge node.\nFeature OBJL={}, RCID={} may have corrupt or missing geometry.",
                    feature.defn().name(),
                    feature.field_as_integer("RCID").unwrap_or(-1)
                );
                set_node_linkage(feature, 0, vrpt, 0);
                return;
            }
        }
    } else {
        (vrpt, 1)
    };

    set_node_linkage(feature, 0, vrpt, 0);
    set_node_linkage(feature, 1, end_field, end_row);
}

fn set_node_linkage(feature: &mut Feature, end: usize, vrpt: &Field, row: usize) {
    let rcid = parse_name(vrpt, row).map_or(-1, |(_, id)| id);
    feature.set_field(&format!("NAME_RCNM_{}", end), FieldValue::Integer(RCNM_VC as i64));
    feature.set_field(&format!("NAME_RCID_{}", end), FieldValue::Integer(rcid as i64));
    for name in ["ORNT", "USAG", "TOPI", "MASK"] {
        if let Some(value) = vrpt.int_value(name, row) {
            feature.set_field(&format!("{}_{}", name, end), FieldValue::Integer(value));
        }
    }
}
