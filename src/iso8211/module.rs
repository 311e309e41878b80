// ISO 8211 Modules
// Reading and writing the data descriptive record and the data records that follow it

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Field, FieldDefn, Iso8211Error, Record, FIELD_TERMINATOR, LEADER_SIZE};

/// Parsed record leader
#[derive(Debug, Clone, Copy)]
struct Leader {
    record_length: usize,
    leader_id: u8,
    field_control_length: usize,
    field_area_start: usize,
    size_field_length: usize,
    size_field_pos: usize,
    size_field_tag: usize,
}

impl Leader {
    fn parse(data: &[u8]) -> Result<Self, Iso8211Error> {
        if data.len() < LEADER_SIZE {
            return Err(Iso8211Error::InvalidLeader("Leader shorter than 24 bytes".to_string()));
        }

        let number = |range: std::ops::Range<usize>, what: &str| -> Result<usize, Iso8211Error> {
            let text = std::str::from_utf8(&data[range]).unwrap_or("");
            text.trim().parse::<usize>().map_err(|_| {
                Iso8211Error::InvalidLeader(format!("Bad {} '{}'", what, text))
            })
        };
        let digit = |pos: usize, what: &str| -> Result<usize, Iso8211Error> {
            (data[pos] as char)
                .to_digit(10)
                .map(|d| d as usize)
                .ok_or_else(|| Iso8211Error::InvalidLeader(format!("Bad {}", what)))
        };

        let leader = Self {
            record_length: number(0..5, "record length")?,
            leader_id: data[6],
            field_control_length: number(10..12, "field control length").unwrap_or(0),
            field_area_start: number(12..17, "field area start")?,
            size_field_length: digit(20, "size of field length")?,
            size_field_pos: digit(21, "size of field position")?,
            size_field_tag: digit(23, "size of field tag")?,
        };

        if leader.record_length < LEADER_SIZE || leader.field_area_start > leader.record_length {
            return Err(Iso8211Error::InvalidLeader(format!(
                "Inconsistent record length {} / field area {}",
                leader.record_length, leader.field_area_start
            )));
        }
        if leader.size_field_tag == 0 {
            return Err(Iso8211Error::InvalidLeader("Zero field tag size".to_string()));
        }
        Ok(leader)
    }
}

/// One directory entry: tag and the field's byte range within the field area
struct DirEntry {
    tag: String,
    length: usize,
    position: usize,
}

fn parse_directory(record: &[u8], leader: &Leader) -> Result<Vec<DirEntry>, Iso8211Error> {
    let entry_size = leader.size_field_tag + leader.size_field_length + leader.size_field_pos;
    let mut entries = Vec::new();
    let mut offset = LEADER_SIZE;

    while offset < leader.field_area_start && record.get(offset) != Some(&FIELD_TERMINATOR) {
        let entry = record.get(offset..offset + entry_size).ok_or_else(|| {
            Iso8211Error::InvalidDirectory("Directory runs past end of record".to_string())
        })?;
        let (tag, rest) = entry.split_at(leader.size_field_tag);
        let (length, position) = rest.split_at(leader.size_field_length);

        let parse = |bytes: &[u8]| -> Result<usize, Iso8211Error> {
            let text = std::str::from_utf8(bytes).unwrap_or("");
            text.trim().parse::<usize>().map_err(|_| {
                Iso8211Error::InvalidDirectory(format!("Bad directory number '{}'", text))
            })
        };

        entries.push(DirEntry {
            tag: String::from_utf8_lossy(tag).into_owned(),
            length: parse(length)?,
            position: parse(position)?,
        });
        offset += entry_size;
    }

    Ok(entries)
}

/// Read exactly `buf.len()` bytes, returning false on a clean end of file
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, Iso8211Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(Iso8211Error::InvalidLeader(format!(
                    "Unexpected end of file after {} bytes of leader",
                    filled
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Iso8211Error::Io(e)),
        }
    }
    Ok(true)
}

/// An open ISO 8211 file positioned on its data records
pub struct Module {
    path: PathBuf,
    reader: BufReader<File>,
    defns: Vec<Arc<FieldDefn>>,
    by_tag: HashMap<String, usize>,
    first_record_offset: u64,
}

impl Module {
    /// Open a file and parse its data descriptive record
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Iso8211Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let mut leader_bytes = [0u8; LEADER_SIZE];
        if !read_or_eof(&mut reader, &mut leader_bytes)? {
            return Err(Iso8211Error::InvalidLeader(format!("{:?} is empty", path)));
        }
        let leader = Leader::parse(&leader_bytes)?;
        if leader.leader_id != b'L' {
            return Err(Iso8211Error::InvalidLeader(format!(
                "{:?} does not start with a data descriptive record",
                path
            )));
        }

        let mut ddr = leader_bytes.to_vec();
        ddr.resize(leader.record_length, 0);
        reader.read_exact(&mut ddr[LEADER_SIZE..])?;

        let control_len = if leader.field_control_length == 0 { 9 } else { leader.field_control_length };
        let mut defns = Vec::new();
        let mut by_tag = HashMap::new();
        for entry in parse_directory(&ddr, &leader)? {
            let start = leader.field_area_start + entry.position;
            let data = ddr.get(start..start + entry.length).ok_or_else(|| {
                Iso8211Error::InvalidDirectory(format!("Field {} runs past end of DDR", entry.tag))
            })?;
            let defn = FieldDefn::parse_ddr_entry(&entry.tag, data, control_len)?;
            by_tag.insert(entry.tag.clone(), defns.len());
            defns.push(Arc::new(defn));
        }

        log::debug!("Opened ISO 8211 module {:?} with {} field definitions", path, defns.len());

        Ok(Self {
            path,
            reader,
            defns,
            by_tag,
            first_record_offset: leader.record_length as u64,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn field_defns(&self) -> &[Arc<FieldDefn>] {
        &self.defns
    }

    pub fn find_field_defn(&self, tag: &str) -> Option<Arc<FieldDefn>> {
        self.by_tag.get(tag).map(|&i| Arc::clone(&self.defns[i]))
    }

    /// Force a field's subfield group to be treated as repeating.
    /// Only affects records read after the call.
    pub fn force_repeating(&mut self, tag: &str) -> bool {
        match self.by_tag.get(tag) {
            Some(&i) => {
                Arc::make_mut(&mut self.defns[i]).repeating = true;
                true
            }
            None => false,
        }
    }

    /// Seek back to the first data record
    pub fn rewind(&mut self) -> Result<(), Iso8211Error> {
        self.reader.seek(SeekFrom::Start(self.first_record_offset))?;
        Ok(())
    }

    /// Read the next data record, None at end of file
    pub fn read_record(&mut self) -> Result<Option<Record>, Iso8211Error> {
        let mut leader_bytes = [0u8; LEADER_SIZE];
        if !read_or_eof(&mut self.reader, &mut leader_bytes)? {
            return Ok(None);
        }
        // Some producers pad the file tail with blanks or NULs
        if leader_bytes.iter().all(|&b| b == b' ' || b == 0) {
            return Ok(None);
        }

        let leader = Leader::parse(&leader_bytes)?;
        match leader.leader_id {
            b'D' => {}
            b'R' => {
                return Err(Iso8211Error::InvalidLeader(
                    "Records with a reused leader are not supported".to_string(),
                ))
            }
            other => {
                return Err(Iso8211Error::InvalidLeader(format!(
                    "Unexpected leader identifier '{}'",
                    other as char
                )))
            }
        }

        let mut data = leader_bytes.to_vec();
        data.resize(leader.record_length, 0);
        self.reader.read_exact(&mut data[LEADER_SIZE..])?;

        let mut record = Record::new();
        for entry in parse_directory(&data, &leader)? {
            let defn = self.find_field_defn(&entry.tag).ok_or_else(|| {
                Iso8211Error::UnknownField(format!("No definition for field {}", entry.tag))
            })?;
            let start = leader.field_area_start + entry.position;
            let bytes = data.get(start..start + entry.length).ok_or_else(|| {
                Iso8211Error::TruncatedField(format!("Field {} runs past end of record", entry.tag))
            })?;
            let rows = defn.decode_rows(bytes)?;
            record.push_field(Field::with_rows(defn, rows));
        }

        Ok(Some(record))
    }
}

/// Number of decimal digits needed to write `value`
fn digits(value: usize) -> usize {
    value.to_string().len()
}

/// Build leader + directory + field area for one record
fn assemble_record(leader_prefix: &[u8; 10], tags_and_data: &[(String, Vec<u8>)]) -> Result<Vec<u8>, Iso8211Error> {
    let total_data: usize = tags_and_data.iter().map(|(_, d)| d.len()).sum();
    let max_len = tags_and_data.iter().map(|(_, d)| d.len()).max().unwrap_or(0);

    let size_len = digits(max_len).max(3);
    let size_pos = digits(total_data).max(4);
    let size_tag = 4;
    if size_len > 9 || size_pos > 9 {
        return Err(Iso8211Error::EncodeError("Record too large".to_string()));
    }

    let dir_len = tags_and_data.len() * (size_tag + size_len + size_pos) + 1;
    let field_area_start = LEADER_SIZE + dir_len;
    let record_length = field_area_start + total_data;
    if record_length > 99_999 {
        return Err(Iso8211Error::EncodeError(format!(
            "Record length {} exceeds leader capacity",
            record_length
        )));
    }

    let mut out = Vec::with_capacity(record_length);
    out.extend_from_slice(format!("{:05}", record_length).as_bytes());
    out.extend_from_slice(&leader_prefix[5..10]);
    out.extend_from_slice(&leader_prefix[..2]);
    out.extend_from_slice(format!("{:05}", field_area_start).as_bytes());
    out.extend_from_slice(&leader_prefix[2..5]);
    out.extend_from_slice(format!("{}{}0{}", size_len, size_pos, size_tag).as_bytes());

    let mut position = 0;
    for (tag, data) in tags_and_data {
        if tag.len() != size_tag {
            return Err(Iso8211Error::EncodeError(format!("Bad field tag '{}'", tag)));
        }
        out.extend_from_slice(tag.as_bytes());
        out.extend_from_slice(format!("{:0width$}", data.len(), width = size_len).as_bytes());
        out.extend_from_slice(format!("{:0width$}", position, width = size_pos).as_bytes());
        position += data.len();
    }
    out.push(FIELD_TERMINATOR);

    for (_, data) in tags_and_data {
        out.extend_from_slice(data);
    }
    Ok(out)
}

/// Leader fixed parts: [field control length(2)][extended charset(3)][status..id(5)]
const DDR_LEADER_PARTS: &[u8; 10] = b"09 ! 3LE1 ";
const DR_LEADER_PARTS: &[u8; 10] = b"      D   ";

/// Writes a new ISO 8211 file
pub struct ModuleWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    defns: Vec<Arc<FieldDefn>>,
}

impl ModuleWriter {
    /// Create the file and write its data descriptive record
    pub fn create(path: impl AsRef<Path>, defns: Vec<FieldDefn>) -> Result<Self, Iso8211Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        let entries: Vec<(String, Vec<u8>)> = defns
            .iter()
            .map(|d| (d.tag.clone(), d.to_ddr_entry()))
            .collect();
        let ddr = assemble_record(DDR_LEADER_PARTS, &entries)?;
        writer.write_all(&ddr)?;

        Ok(Self {
            path,
            writer,
            defns: defns.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn find_field_defn(&self, tag: &str) -> Option<Arc<FieldDefn>> {
        self.defns.iter().find(|d| d.tag == tag).cloned()
    }

    /// Encode and append one data record
    pub fn write_record(&mut self, record: &Record) -> Result<(), Iso8211Error> {
        let mut entries = Vec::with_capacity(record.field_count());
        for field in record.fields() {
            if self.find_field_defn(field.tag()).is_none() {
                return Err(Iso8211Error::UnknownField(format!(
                    "Field {} is not defined in this module",
                    field.tag()
                )));
            }
            entries.push((field.tag().to_string(), field.defn().encode_rows(field.rows())?));
        }
        let bytes = assemble_record(DR_LEADER_PARTS, &entries)?;
        self.writer.write_all(&bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Iso8211Error> {
        self.writer.flush()?;
        Ok(())
    }
}
