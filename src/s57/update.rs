// S-57 Updates
// Discovery of numbered update files and application of their RUIN transactions

use std::path::{Path, PathBuf};

use crate::iso8211::{Field, Module, Record, Value};

use super::reader::S57Reader;
use super::record_index::RecordIndex;
use super::{PrimitiveKind, S57Error, RUIN_DELETE, RUIN_INSERT, RUIN_MODIFY};

/// Highest update sequence number tried
const MAX_UPDATE_NUMBER: u32 = 999;

/// ATVL value marking an attribute for removal
const ATTRIBUTE_DELETE_MARKER: char = '\u{7f}';

/// Splice instruction codes shared by FSUI, VPUI, CCUI and FFUI
const SPLICE_INSERT: i64 = 1;
const SPLICE_DELETE: i64 = 2;
const SPLICE_MODIFY: i64 = 3;

/// True when the path names a base cell (extension `000`)
pub(super) fn is_base_cell(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("000"))
}

/// Candidate locations of update `number` for a base cell: next to it, then
/// in a sibling directory named after the number (CD layout)
fn update_candidates(base: &Path, number: u32) -> [PathBuf; 2] {
    let extension = format!("{:03}", number);
    let same_dir = base.with_extension(&extension);

    let file_name = same_dir.file_name().map(PathBuf::from).unwrap_or_default();
    let parent = base.parent().and_then(Path::parent).unwrap_or(Path::new(""));
    let cd_layout = parent.join(number.to_string()).join(file_name);

    [same_dir, cd_layout]
}

impl S57Reader {
    /// Apply the update chain of a base cell in sequence order.
    ///
    /// Probing stops at the first missing sequence number. Any failure while
    /// applying an update aborts the chain.
    pub fn find_and_apply_updates(&mut self, path: Option<&Path>) -> Result<(), S57Error> {
        let base = path.map(Path::to_path_buf).unwrap_or_else(|| self.path().to_path_buf());

        if !is_base_cell(&base) {
            return Err(S57Error::UpdateError(format!(
                "Can't apply updates to a base file with a different extension than .000: {}",
                base.display()
            )));
        }

        self.ingest_base()?;

        for number in 1..=MAX_UPDATE_NUMBER {
            let [same_dir, cd_layout] = update_candidates(&base, number);

            let candidate = if same_dir.exists() {
                same_dir
            } else {
                cd_layout
            };

            let mut module = match Module::open(&candidate) {
                Ok(module) => module,
                Err(_) => break,
            };
            if module.find_field_defn("FSPT").is_some() {
                module.force_repeating("FSPT");
            }

            log::debug!("Applying feature updates from {}", candidate.display());
            self.apply_updates(&mut module)?;
        }
        Ok(())
    }

    /// Apply every record of one update module. The indexes are sorted again
    /// afterwards so positional access sees inserted records in key order.
    pub fn apply_updates(&mut self, module: &mut Module) -> Result<(), S57Error> {
        self.ingest_base()?;
        module.rewind()?;

        while let Some(record) = module.read_record()? {
            let Some(key) = record.key_field() else {
                continue;
            };
            let tag = key.tag().to_string();

            match tag.as_str() {
                "VRID" | "FRID" => {
                    let rcnm = key.int_value("RCNM", 0).unwrap_or(0) as i32;
                    let rcid = key.int_value("RCID", 0).unwrap_or(0) as i32;
                    let rver = key.int_value("RVER", 0).unwrap_or(0) as i32;
                    let ruin = key.int_value("RUIN", 0).unwrap_or(0) as i32;

                    if tag == "VRID" {
                        let kind = PrimitiveKind::from_rcnm(rcnm).ok_or_else(|| {
                            S57Error::UpdateError(format!("Unhandled value for RCNM field {}", rcnm))
                        })?;
                        apply_to_index(
                            &mut self.vector_indexes[kind as usize],
                            record,
                            rcnm,
                            rcid,
                            rver,
                            ruin,
                        )?;
                    } else {
                        apply_to_index(&mut self.fe_index, record, rcnm, rcid, rver, ruin)?;
                    }
                }
                "DSID" => {
                    if self.dsid_record.is_some() {
                        self.update_number = record.string_subfield("DSID", 0, "UPDN", 0);
                    }
                }
                other => log::debug!("Skipping {} record in S57Reader::apply_updates().", other),
            }
        }

        for index in &mut self.vector_indexes {
            index.sort();
        }
        self.fe_index.sort();
        Ok(())
    }
}

/// Dispatch one VRID or FRID update record to its index by RUIN
fn apply_to_index<C>(
    index: &mut RecordIndex<C>,
    update: Record,
    rcnm: i32,
    rcid: i32,
    rver: i32,
    ruin: i32,
) -> Result<(), S57Error> {
    match ruin {
        RUIN_INSERT => index.add_record(rcid, update),
        RUIN_DELETE => {
            let current = index.get(rcid).map(|target| {
                target
                    .key_field()
                    .and_then(|key| key.int_value("RVER", 0))
                    .unwrap_or(0) as i32
            });
            match current {
                None => log::warn!("Can't find RCNM={},RCID={} for delete.", rcnm, rcid),
                Some(current) if current != rver - 1 => log::warn!(
                    "Mismatched RVER value on RCNM={},RCID={}.",
                    rcnm,
                    rcid
                ),
                Some(_) => {
                    index.remove_record(rcid);
                }
            }
        }
        RUIN_MODIFY => {
            let target = index.find_record_mut(rcid).ok_or_else(|| {
                S57Error::UpdateError(format!("Can't find RCNM={},RCID={} for update.", rcnm, rcid))
            })?;
            apply_record_update(target, &update)?;
        }
        other => log::debug!("Unhandled update instruction {} on RCNM={},RCID={}", other, rcnm, rcid),
    }
    Ok(())
}

/// Apply one modify-update record to its target record in place.
///
/// The target is left untouched when any part of the update fails.
pub fn apply_record_update(target: &mut Record, update: &Record) -> Result<(), S57Error> {
    let key = update
        .key_field()
        .ok_or_else(|| S57Error::UpdateError("Update record has no key field".to_string()))?;
    let key_tag = key.tag().to_string();

    let rcnm = key.int_value("RCNM", 0).unwrap_or(0);
    let rcid = key.int_value("RCID", 0).unwrap_or(0);
    let update_rver = key.int_value("RVER", 0).unwrap_or(0);
    let target_rver = target.int_subfield(&key_tag, 0, "RVER", 0).unwrap_or(0);

    if target_rver + 1 != update_rver {
        return Err(S57Error::UpdateError(format!(
            "Mismatched RVER value on RCNM={},RCID={}.",
            rcnm, rcid
        )));
    }

    let mut patched = target.clone();
    if let Some(target_key) = patched.find_field_mut(&key_tag) {
        target_key.set_value("RVER", 0, Value::Int(update_rver));
    }

    if let Some(control) = update.find_field("FSPC") {
        splice_pointer_field(&mut patched, update, control, ["FSUI", "FSIX", "NSPT"], "FSPT")?;
    }

    if let Some(control) = update.find_field("VRPC") {
        splice_pointer_field(&mut patched, update, control, ["VPUI", "VPIX", "NVPT"], "VRPT")?;
    }

    if let Some(control) = update.find_field("SGCC") {
        apply_coordinate_update(&mut patched, update, control)?;
    }

    if let Some(control) = update.find_field("FFPC") {
        apply_ffpt_update(&mut patched, update, control)?;
    }

    if let Some(attf) = update.find_field("ATTF") {
        apply_attf_update(&mut patched, attf)?;
    }

    *target = patched;
    Ok(())
}

/// Read (instruction, index, count) from an update control field
fn control_values(control: &Field, names: [&str; 3]) -> (i64, i64, i64) {
    (
        control.int_value(names[0], 0).unwrap_or(0),
        control.int_value(names[1], 0).unwrap_or(0),
        control.int_value(names[2], 0).unwrap_or(0),
    )
}

fn splice_pointer_field(
    target: &mut Record,
    update: &Record,
    control: &Field,
    names: [&str; 3],
    tag: &str,
) -> Result<(), S57Error> {
    let (instruction, ix, count) = control_values(control, names);
    let src = update.find_field(tag);

    if src.is_none() && instruction != SPLICE_DELETE {
        return Err(S57Error::UpdateError(format!(
            "Missing {} field in update record for {} instruction {}.",
            tag, names[0], instruction
        )));
    }
    let dst = target.find_field_mut(tag).ok_or_else(|| {
        S57Error::UpdateError(format!("Missing {} field in target record.", tag))
    })?;

    splice_rows(dst, src, instruction, ix, count)
}

/// Splice SG2D or SG3D rows. The update's field must match the target's
/// kind; a target without coordinates takes the update's field on insert.
fn apply_coordinate_update(target: &mut Record, update: &Record, control: &Field) -> Result<(), S57Error> {
    let (instruction, ix, count) = control_values(control, ["CCUI", "CCIX", "CCNC"]);

    let target_tag = ["SG2D", "SG3D"]
        .into_iter()
        .find(|tag| target.find_field(tag).is_some());
    let tag = target_tag
        .or_else(|| ["SG2D", "SG3D"].into_iter().find(|tag| update.find_field(tag).is_some()))
        .unwrap_or("SG2D");
    let src = update.find_field(tag);

    if src.is_none() && instruction != SPLICE_DELETE {
        return Err(S57Error::UpdateError(format!(
            "Missing {} field in coordinate update.",
            tag
        )));
    }

    if target_tag.is_none() {
        match (instruction, src) {
            (SPLICE_INSERT, Some(src)) => {
                target.add_field(src.shared_defn());
            }
            _ => {
                return Err(S57Error::UpdateError(
                    "Missing SG2D/SG3D field in target of coordinate update.".to_string(),
                ))
            }
        }
    }

    let dst = target.find_field_mut(tag).ok_or_else(|| {
        S57Error::UpdateError(format!("Missing {} field in target of coordinate update.", tag))
    })?;

    splice_rows(dst, src, instruction, ix, count)
}

fn apply_ffpt_update(target: &mut Record, update: &Record, control: &Field) -> Result<(), S57Error> {
    let (instruction, ix, count) = control_values(control, ["FFUI", "FFIX", "NFPT"]);
    let src = update.find_field("FFPT");

    if src.is_none() && instruction != SPLICE_DELETE {
        return Err(S57Error::UpdateError("Missing FFPT field in update record.".to_string()));
    }

    if target.find_field("FFPT").is_none() {
        match (instruction, src) {
            (SPLICE_INSERT, Some(src)) => {
                target.add_field(src.shared_defn());
            }
            _ => {
                return Err(S57Error::UpdateError(
                    "Missing FFPT field in target record.".to_string(),
                ))
            }
        }
    }
    let dst = target
        .find_field_mut("FFPT")
        .ok_or_else(|| S57Error::UpdateError("Missing FFPT field in target record.".to_string()))?;

    splice_rows(dst, src, instruction, ix, count)
}

/// Merge ATTF rows by attribute code; a marker value removes the attribute
fn apply_attf_update(target: &mut Record, src: &Field) -> Result<(), S57Error> {
    let Some(dst) = target.find_field_mut("ATTF") else {
        log::warn!("Unable to apply ATTF change to target record without an ATTF field");
        return Err(S57Error::UpdateError(
            "Unable to apply ATTF change to target record without an ATTF field".to_string(),
        ));
    };

    for (row_index, row) in src.rows().iter().enumerate() {
        let attl = src.int_value("ATTL", row_index);

        let existing = (0..dst.repeat_count())
            .rev()
            .find(|&i| dst.int_value("ATTL", i) == attl);

        let is_delete = src
            .string_value("ATVL", row_index)
            .is_some_and(|v| v.starts_with(ATTRIBUTE_DELETE_MARKER));

        match (existing, is_delete) {
            (Some(i), true) => {
                dst.remove_rows(i, 1);
            }
            (None, true) => {
                log::debug!("ATTF delete of attribute {:?} not present in target", attl);
            }
            (Some(i), false) => dst.replace_rows(i, [row.clone()]),
            (None, false) => dst.replace_rows(dst.repeat_count(), [row.clone()]),
        }
    }
    Ok(())
}

/// Insert, delete or replace `count` rows at the 1-based position `ix`
fn splice_rows(
    dst: &mut Field,
    src: Option<&Field>,
    instruction: i64,
    ix: i64,
    count: i64,
) -> Result<(), S57Error> {
    let start = (ix - 1).max(0) as usize;
    let count = count.max(0) as usize;

    let tag = dst.tag().to_string();
    let source_rows = |src: Option<&Field>| -> Result<Vec<Vec<Value>>, S57Error> {
        let src = src.ok_or_else(|| {
            S57Error::UpdateError(format!("Missing source rows for {} update.", tag))
        })?;
        if src.repeat_count() < count {
            return Err(S57Error::UpdateError(format!(
                "Update to {} carries {} rows, {} expected.",
                src.tag(),
                src.repeat_count(),
                count
            )));
        }
        Ok(src.rows()[..count].to_vec())
    };

    match instruction {
        SPLICE_INSERT => {
            let rows = source_rows(src)?;
            dst.insert_rows(start, rows);
        }
        SPLICE_DELETE => {
            dst.remove_rows(start, count);
        }
        SPLICE_MODIFY => {
            let rows = source_rows(src)?;
            dst.replace_rows(start, rows);
        }
        other => log::debug!("Unhandled update instruction {} on {}", other, tag),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s57::writer::s57_field_defns;
    use std::sync::Arc;

    fn defn(tag: &str) -> Arc<crate::iso8211::FieldDefn> {
        Arc::new(
            s57_field_defns()
                .into_iter()
                .find(|d| d.tag == tag)
                .unwrap(),
        )
    }

    fn name(rcnm: u8, rcid: i32) -> Value {
        let mut bytes = vec![rcnm];
        bytes.extend_from_slice(&rcid.to_le_bytes());
        Value::Bytes(bytes)
    }

    fn feature_record(rver: i64) -> Record {
        let mut record = Record::new();
        record.add_field(defn("0001")).push_row(vec![Value::Int(1)]);
        record.add_field(defn("FRID")).push_row(vec![
            Value::Int(100),
            Value::Int(5),
            Value::Int(2),
            Value::Int(2),
            Value::Int(43),
            Value::Int(rver),
            Value::Int(1),
        ]);
        let fspt = record.add_field(defn("FSPT"));
        for rcid in [10, 11, 12] {
            fspt.push_row(vec![name(130, rcid), Value::Int(1), Value::Int(255), Value::Int(255)]);
        }
        let attf = record.add_field(defn("ATTF"));
        attf.push_row(vec![Value::Int(174), Value::Text("5".to_string())]);
        attf.push_row(vec![Value::Int(116), Value::Text("Old".to_string())]);
        record
    }

    fn modify_record(rver: i64) -> Record {
        let mut record = Record::new();
        record.add_field(defn("0001")).push_row(vec![Value::Int(2)]);
        record.add_field(defn("FRID")).push_row(vec![
            Value::Int(100),
            Value::Int(5),
            Value::Int(2),
            Value::Int(2),
            Value::Int(43),
            Value::Int(rver),
            Value::Int(3),
        ]);
        record
    }

    fn fspt_rcids(record: &Record) -> Vec<i32> {
        let fspt = record.find_field("FSPT").unwrap();
        (0..fspt.repeat_count())
            .map(|row| crate::s57::parse_name(fspt, row).unwrap().1)
            .collect()
    }

    #[test]
    fn test_is_base_cell() {
        assert!(is_base_cell(Path::new("/charts/US5MA11M.000")));
        assert!(!is_base_cell(Path::new("/charts/US5MA11M.001")));
        assert!(!is_base_cell(Path::new("/charts/US5MA11M")));
    }

    #[test]
    fn test_update_candidates() {
        let [same, cd] = update_candidates(Path::new("/cd/ENC_ROOT/0/US5MA11M.000"), 3);
        assert_eq!(same, PathBuf::from("/cd/ENC_ROOT/0/US5MA11M.003"));
        assert_eq!(cd, PathBuf::from("/cd/ENC_ROOT/3/US5MA11M.003"));
    }

    #[test]
    fn test_pointer_insert_and_delete() {
        let mut target = feature_record(1);

        let mut update = modify_record(2);
        update
            .add_field(defn("FSPC"))
            .push_row(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        update
            .add_field(defn("FSPT"))
            .push_row(vec![name(130, 99), Value::Int(2), Value::Int(255), Value::Int(255)]);

        apply_record_update(&mut target, &update).unwrap();
        assert_eq!(fspt_rcids(&target), vec![10, 99, 11, 12]);
        assert_eq!(target.int_subfield("FRID", 0, "RVER", 0), Some(2));

        let mut update = modify_record(3);
        update
            .add_field(defn("FSPC"))
            .push_row(vec![Value::Int(2), Value::Int(3), Value::Int(2)]);
        apply_record_update(&mut target, &update).unwrap();
        assert_eq!(fspt_rcids(&target), vec![10, 99]);
    }

    #[test]
    fn test_pointer_modify() {
        let mut target = feature_record(1);

        let mut update = modify_record(2);
        update
            .add_field(defn("FSPC"))
            .push_row(vec![Value::Int(3), Value::Int(3), Value::Int(1)]);
        update
            .add_field(defn("FSPT"))
            .push_row(vec![name(130, 77), Value::Int(1), Value::Int(255), Value::Int(255)]);

        apply_record_update(&mut target, &update).unwrap();
        assert_eq!(fspt_rcids(&target), vec![10, 11, 77]);
    }

    #[test]
    fn test_version_mismatch_leaves_target() {
        let mut target = feature_record(1);
        let before = target.clone();

        let mut update = modify_record(5);
        update
            .add_field(defn("FSPC"))
            .push_row(vec![Value::Int(2), Value::Int(1), Value::Int(1)]);

        assert!(matches!(
            apply_record_update(&mut target, &update),
            Err(S57Error::UpdateError(_))
        ));
        assert_eq!(target, before);
    }

    #[test]
    fn test_attf_merge() {
        let mut target = feature_record(1);

        let mut update = modify_record(2);
        let attf = update.add_field(defn("ATTF"));
        attf.push_row(vec![Value::Int(116), Value::Text("New".to_string())]);
        attf.push_row(vec![Value::Int(174), Value::Text("\u{7f}".to_string())]);
        attf.push_row(vec![Value::Int(133), Value::Text("3".to_string())]);

        apply_record_update(&mut target, &update).unwrap();

        let attf = target.find_field("ATTF").unwrap();
        assert_eq!(attf.repeat_count(), 2);
        assert_eq!(attf.int_value("ATTL", 0), Some(116));
        assert_eq!(attf.string_value("ATVL", 0).as_deref(), Some("New"));
        assert_eq!(attf.int_value("ATTL", 1), Some(133));
    }

    #[test]
    fn test_attf_without_target_field_fails() {
        let mut target = Record::new();
        for field in feature_record(1).fields().iter().filter(|f| f.tag() != "ATTF") {
            target.push_field(field.clone());
        }
        let before = target.clone();

        let mut update = modify_record(2);
        update
            .add_field(defn("ATTF"))
            .push_row(vec![Value::Int(116), Value::Text("New".to_string())]);

        assert!(apply_record_update(&mut target, &update).is_err());
        assert_eq!(target, before);
    }

    #[test]
    fn test_coordinate_insert_creates_field() {
        let mut target = Record::new();
        target.add_field(defn("0001")).push_row(vec![Value::Int(1)]);
        target.add_field(defn("VRID")).push_row(vec![
            Value::Int(130),
            Value::Int(8),
            Value::Int(1),
            Value::Int(1),
        ]);

        let mut update = Record::new();
        update.add_field(defn("0001")).push_row(vec![Value::Int(2)]);
        update.add_field(defn("VRID")).push_row(vec![
            Value::Int(130),
            Value::Int(8),
            Value::Int(2),
            Value::Int(3),
        ]);
        update
            .add_field(defn("SGCC"))
            .push_row(vec![Value::Int(1), Value::Int(1), Value::Int(2)]);
        let sg2d = update.add_field(defn("SG2D"));
        sg2d.push_row(vec![Value::Int(10), Value::Int(20)]);
        sg2d.push_row(vec![Value::Int(30), Value::Int(40)]);

        apply_record_update(&mut target, &update).unwrap();
        let sg2d = target.find_field("SG2D").unwrap();
        assert_eq!(sg2d.repeat_count(), 2);
        assert_eq!(sg2d.int_value("XCOO", 1), Some(40));
        assert_eq!(target.int_subfield("VRID", 0, "RVER", 0), Some(2));
    }

    fn vrid_record(rver: i64) -> Record {
        let mut record = Record::new();
        record.add_field(defn("0001")).push_row(vec![Value::Int(1)]);
        record.add_field(defn("VRID")).push_row(vec![
            Value::Int(120),
            Value::Int(9),
            Value::Int(rver),
            Value::Int(if rver == 1 { 1 } else { 3 }),
        ]);
        record
    }

    #[test]
    fn test_coordinate_update_matches_3d_field() {
        let mut target = vrid_record(1);
        let sg3d = target.add_field(defn("SG3D"));
        sg3d.push_row(vec![Value::Int(1), Value::Int(2), Value::Int(30)]);
        sg3d.push_row(vec![Value::Int(3), Value::Int(4), Value::Int(50)]);

        let mut update = vrid_record(2);
        update
            .add_field(defn("SGCC"))
            .push_row(vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
        update
            .add_field(defn("SG3D"))
            .push_row(vec![Value::Int(7), Value::Int(8), Value::Int(90)]);

        apply_record_update(&mut target, &update).unwrap();
        assert!(target.find_field("SG2D").is_none());
        let sg3d = target.find_field("SG3D").unwrap();
        assert_eq!(sg3d.repeat_count(), 2);
        assert_eq!(sg3d.int_value("VE3D", 0), Some(30));
        assert_eq!(sg3d.int_value("VE3D", 1), Some(90));
    }

    #[test]
    fn test_coordinate_update_kind_mismatch() {
        let mut target = vrid_record(1);
        target
            .add_field(defn("SG2D"))
            .push_row(vec![Value::Int(1), Value::Int(2)]);

        let mut update = vrid_record(2);
        update
            .add_field(defn("SGCC"))
            .push_row(vec![Value::Int(3), Value::Int(1), Value::Int(1)]);
        update
            .add_field(defn("SG3D"))
            .push_row(vec![Value::Int(7), Value::Int(8), Value::Int(90)]);

        let result = apply_record_update(&mut target, &update);
        assert!(matches!(result, Err(S57Error::UpdateError(_))));
        assert_eq!(target.int_subfield("SG2D", 0, "XCOO", 0), Some(2));
        assert_eq!(target.int_subfield("VRID", 0, "RVER", 0), Some(1));
    }

    #[test]
    fn test_delete_index_asymmetry() {
        let mut index: RecordIndex = RecordIndex::new();
        index.add_record(5, feature_record(1));

        // Wrong version on delete is only a warning
        apply_to_index(&mut index, modify_record(7), 100, 5, 7, RUIN_DELETE).unwrap();
        assert!(index.get(5).is_some());

        // Missing target on modify is fatal
        assert!(apply_to_index(&mut index, modify_record(2), 100, 6, 2, RUIN_MODIFY).is_err());

        apply_to_index(&mut index, modify_record(2), 100, 5, 2, RUIN_DELETE).unwrap();
        assert!(index.get(5).is_none());
    }
}
