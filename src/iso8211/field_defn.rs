// ISO 8211 Field Definitions
// Data descriptive record entries: field controls, array descriptors, format controls

use super::{Iso8211Error, SubfieldFormat, Value, FIELD_TERMINATOR, UNIT_TERMINATOR};

/// Data structure code (first field control character)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStructCode {
    Elementary,
    Vector,
    Array,
    Concatenated,
}

impl DataStructCode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Elementary),
            '1' => Some(Self::Vector),
            '2' => Some(Self::Array),
            '3' => Some(Self::Concatenated),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Self::Elementary => '0',
            Self::Vector => '1',
            Self::Array => '2',
            Self::Concatenated => '3',
        }
    }
}

/// Data type code (second field control character)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTypeCode {
    CharString,
    ImplicitPoint,
    ExplicitPoint,
    ExplicitPointScaled,
    CharBitString,
    BitString,
    MixedDataType,
}

impl DataTypeCode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::CharString),
            '1' => Some(Self::ImplicitPoint),
            '2' => Some(Self::ExplicitPoint),
            '3' => Some(Self::ExplicitPointScaled),
            '4' => Some(Self::CharBitString),
            '5' => Some(Self::BitString),
            '6' => Some(Self::MixedDataType),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Self::CharString => '0',
            Self::ImplicitPoint => '1',
            Self::ExplicitPoint => '2',
            Self::ExplicitPointScaled => '3',
            Self::CharBitString => '4',
            Self::BitString => '5',
            Self::MixedDataType => '6',
        }
    }
}

/// One named subfield of a field definition
#[derive(Debug, Clone, PartialEq)]
pub struct SubfieldDefn {
    pub name: String,
    pub format: SubfieldFormat,
}

/// Definition of one field tag, shared by every instance of that field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefn {
    pub tag: String,
    pub name: String,
    pub struct_code: DataStructCode,
    pub type_code: DataTypeCode,
    /// Subfield group repeats within one field instance
    pub repeating: bool,
    pub subfields: Vec<SubfieldDefn>,
}

impl FieldDefn {
    pub fn new(tag: &str, name: &str, struct_code: DataStructCode, type_code: DataTypeCode) -> Self {
        Self {
            tag: tag.to_string(),
            name: name.to_string(),
            struct_code,
            type_code,
            repeating: false,
            subfields: Vec::new(),
        }
    }

    /// Mark the subfield group as repeating (`*` array descriptor)
    pub fn repeating(mut self) -> Self {
        self.repeating = true;
        self
    }

    pub fn subfield(mut self, name: &str, format: SubfieldFormat) -> Self {
        self.subfields.push(SubfieldDefn {
            name: name.to_string(),
            format,
        });
        self
    }

    pub fn find_subfield(&self, name: &str) -> Option<usize> {
        self.subfields.iter().position(|s| s.name == name)
    }

    /// Width of one subfield group, None if any subfield is unit-terminated
    pub fn fixed_width(&self) -> Option<usize> {
        self.subfields
            .iter()
            .map(|s| s.format.fixed_width())
            .sum::<Option<usize>>()
    }

    /// Parse a DDR field description. `control_len` is the field control length from the DDR leader.
    pub fn parse_ddr_entry(tag: &str, data: &[u8], control_len: usize) -> Result<Self, Iso8211Error> {
        let data = data.strip_suffix(&[FIELD_TERMINATOR]).unwrap_or(data);
        if data.len() < control_len {
            return Err(Iso8211Error::InvalidDirectory(format!(
                "Field description for {} shorter than its field controls",
                tag
            )));
        }

        let controls: Vec<char> = data[..control_len].iter().map(|&b| b as char).collect();
        let struct_code = controls
            .first()
            .and_then(|&c| DataStructCode::from_char(c))
            .unwrap_or(DataStructCode::Elementary);
        let type_code = controls
            .get(1)
            .and_then(|&c| DataTypeCode::from_char(c))
            .unwrap_or(DataTypeCode::CharString);

        let mut parts = data[control_len..].split(|&b| b == UNIT_TERMINATOR);
        let name = super::decode_text(parts.next().unwrap_or(&[]));
        let descriptor = super::decode_text(parts.next().unwrap_or(&[]));
        let format_controls = super::decode_text(parts.next().unwrap_or(&[]));

        let mut defn = FieldDefn::new(tag, &name, struct_code, type_code);

        // The file control field carries a tag pair list, not subfields
        if tag == "0000" {
            return Ok(defn);
        }

        let descriptor = match descriptor.strip_prefix('*') {
            Some(rest) => {
                defn.repeating = true;
                rest.to_string()
            }
            None => descriptor,
        };

        let formats = expand_format_controls(&format_controls)?;
        let names: Vec<String> = if descriptor.is_empty() {
            Vec::new()
        } else {
            descriptor.split('!').map(|s| s.to_string()).collect()
        };

        if names.is_empty() {
            // Elementary fields such as 0001 have a single unnamed subfield
            for format in formats {
                defn.subfields.push(SubfieldDefn {
                    name: String::new(),
                    format: SubfieldFormat::parse(&format)?,
                });
            }
            return Ok(defn);
        }

        if formats.len() < names.len() {
            return Err(Iso8211Error::InvalidFormat(format!(
                "Field {} declares {} subfields but {} formats",
                tag,
                names.len(),
                formats.len()
            )));
        }

        for (name, format) in names.into_iter().zip(formats) {
            defn.subfields.push(SubfieldDefn {
                name,
                format: SubfieldFormat::parse(&format)?,
            });
        }

        Ok(defn)
    }

    /// Encode this definition as a DDR field description (including terminator)
    pub fn to_ddr_entry(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let controls = if self.tag == "0000" {
            "0000;&   ".to_string()
        } else {
            format!("{}{}00;&   ", self.struct_code.to_char(), self.type_code.to_char())
        };
        out.extend_from_slice(controls.as_bytes());
        out.extend_from_slice(self.name.as_bytes());

        if self.tag != "0000" {
            out.push(UNIT_TERMINATOR);
            if self.repeating {
                out.push(b'*');
            }
            let names: Vec<&str> = self.subfields.iter().map(|s| s.name.as_str()).collect();
            out.extend_from_slice(names.join("!").as_bytes());
            out.push(UNIT_TERMINATOR);
            let formats: Vec<String> = self
                .subfields
                .iter()
                .map(|s| s.format.to_format_string())
                .collect();
            out.extend_from_slice(format!("({})", formats.join(",")).as_bytes());
        }

        out.push(FIELD_TERMINATOR);
        out
    }

    /// Decode the payload of one field instance into subfield rows.
    ///
    /// A payload closed by the two byte terminator `1E 00` was written at
    /// lexical level 2; its unit-terminated text subfields are UCS-2 and come
    /// back as raw bytes.
    pub fn decode_rows(&self, data: &[u8]) -> Result<Vec<Vec<Value>>, Iso8211Error> {
        let wide = data.ends_with(&[FIELD_TERMINATOR, 0]);
        let mut data = if wide {
            &data[..data.len() - 2]
        } else {
            data.strip_suffix(&[FIELD_TERMINATOR]).unwrap_or(data)
        };
        let mut rows = Vec::new();

        if self.subfields.is_empty() {
            return Ok(rows);
        }

        loop {
            if self.repeating && data.is_empty() {
                break;
            }
            let mut row = Vec::with_capacity(self.subfields.len());
            for subfield in &self.subfields {
                let decoded = if wide {
                    subfield.format.decode_wide(data)
                } else {
                    subfield.format.decode(data)
                };
                let (value, used) = decoded.map_err(|e| match e {
                    Iso8211Error::TruncatedField(msg) => Iso8211Error::TruncatedField(format!(
                        "{}.{}: {}",
                        self.tag, subfield.name, msg
                    )),
                    other => other,
                })?;
                row.push(value);
                data = &data[used..];
            }
            rows.push(row);
            if !self.repeating {
                break;
            }
        }

        Ok(rows)
    }

    /// Encode subfield rows as a field payload (including terminator).
    ///
    /// Raw bytes in a unit-terminated text subfield mark the field as lexical
    /// level 2: every such subfield is then written as UCS-2 with two byte
    /// terminators, the inverse of `decode_rows`.
    pub fn encode_rows(&self, rows: &[Vec<Value>]) -> Result<Vec<u8>, Iso8211Error> {
        let wide_text = |subfield: &SubfieldDefn| subfield.format == SubfieldFormat::Text(None);
        let wide = rows.iter().any(|row| {
            self.subfields
                .iter()
                .zip(row)
                .any(|(subfield, value)| wide_text(subfield) && matches!(value, Value::Bytes(_)))
        });

        let mut out = Vec::new();
        for row in rows {
            if row.len() != self.subfields.len() {
                return Err(Iso8211Error::EncodeError(format!(
                    "Field {} has {} subfields but row has {} values",
                    self.tag,
                    self.subfields.len(),
                    row.len()
                )));
            }
            for (subfield, value) in self.subfields.iter().zip(row) {
                if wide && wide_text(subfield) {
                    super::format::encode_wide_text(value, &mut out);
                } else {
                    subfield.format.encode(value, &mut out)?;
                }
            }
        }
        out.push(FIELD_TERMINATOR);
        if wide {
            out.push(0);
        }
        Ok(out)
    }
}

/// Expand format controls such as `(b11,2b24,3(A,I))` into one item per subfield
fn expand_format_controls(text: &str) -> Result<Vec<String>, Iso8211Error> {
    let text = text.trim();
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);

    let mut items = Vec::new();
    for item in split_top_level(inner) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let digits: String = item.chars().take_while(|c| c.is_ascii_digit()).collect();
        let (count, body) = if digits.is_empty() {
            (1, item)
        } else {
            let count = digits.parse::<usize>().map_err(|_| {
                Iso8211Error::InvalidFormat(format!("Bad repeat factor in '{}'", item))
            })?;
            (count, &item[digits.len()..])
        };

        let expanded = if body.starts_with('(') {
            expand_format_controls(body)?
        } else {
            vec![body.to_string()]
        };
        for _ in 0..count {
            items.extend(expanded.iter().cloned());
        }
    }
    Ok(items)
}

/// Split on commas that are not nested inside parentheses
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
