// ISO 8211 Subfield Formats
// Format controls (A, I, R, bXY, B(n)) and the typed values they carry

use super::{Iso8211Error, FIELD_TERMINATOR, UNIT_TERMINATOR};

/// A decoded subfield value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Integer view of the value. Text is parsed like C `atoi`.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            Value::Float(v) => *v as i64,
            Value::Text(s) => leading_int(s),
            Value::Bytes(b) => {
                let mut v: i64 = 0;
                for (i, byte) in b.iter().take(8).enumerate() {
                    v |= (*byte as i64) << (8 * i);
                }
                v
            }
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
            Value::Text(s) => leading_float(s),
            Value::Bytes(_) => self.as_int() as f64,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => decode_text(b),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Format of a single subfield, as written in the DDR format controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubfieldFormat {
    /// `A` / `A(n)` character data
    Text(Option<usize>),
    /// `I` / `I(n)` integer written as characters
    Integer(Option<usize>),
    /// `R` / `R(n)` real written as characters
    Real(Option<usize>),
    /// `b1n` unsigned little-endian binary of n bytes
    Unsigned(usize),
    /// `b2n` signed little-endian binary of n bytes
    Signed(usize),
    /// `B(n)` bit string of n bits
    Bits(usize),
}

impl SubfieldFormat {
    /// Parse one format item such as `b24`, `A(8)` or `B(40)`
    pub fn parse(text: &str) -> Result<Self, Iso8211Error> {
        let text = text.trim();
        let bad = || Iso8211Error::InvalidFormat(format!("Unsupported subfield format '{}'", text));

        let mut chars = text.chars();
        let kind = chars.next().ok_or_else(bad)?;
        let rest = chars.as_str();

        let width = || -> Result<Option<usize>, Iso8211Error> {
            if rest.is_empty() {
                return Ok(None);
            }
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(bad)?;
            inner.trim().parse::<usize>().map(Some).map_err(|_| bad())
        };

        match kind {
            'A' | 'a' => Ok(SubfieldFormat::Text(width()?)),
            'I' | 'i' => Ok(SubfieldFormat::Integer(width()?)),
            'R' | 'r' => Ok(SubfieldFormat::Real(width()?)),
            'B' => Ok(SubfieldFormat::Bits(width()?.ok_or_else(bad)?)),
            'b' => {
                let digits = rest.as_bytes();
                if digits.len() != 2 {
                    return Err(bad());
                }
                let size = (digits[1] as char).to_digit(10).ok_or_else(bad)? as usize;
                match digits[0] {
                    b'1' => Ok(SubfieldFormat::Unsigned(size)),
                    b'2' => Ok(SubfieldFormat::Signed(size)),
                    _ => Err(bad()),
                }
            }
            _ => Err(bad()),
        }
    }

    /// Text form used in the DDR
    pub fn to_format_string(&self) -> String {
        match self {
            SubfieldFormat::Text(None) => "A".to_string(),
            SubfieldFormat::Text(Some(n)) => format!("A({})", n),
            SubfieldFormat::Integer(None) => "I".to_string(),
            SubfieldFormat::Integer(Some(n)) => format!("I({})", n),
            SubfieldFormat::Real(None) => "R".to_string(),
            SubfieldFormat::Real(Some(n)) => format!("R({})", n),
            SubfieldFormat::Unsigned(n) => format!("b1{}", n),
            SubfieldFormat::Signed(n) => format!("b2{}", n),
            SubfieldFormat::Bits(n) => format!("B({})", n),
        }
    }

    /// Encoded width in bytes, or None for unit-terminated subfields
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            SubfieldFormat::Text(w) | SubfieldFormat::Integer(w) | SubfieldFormat::Real(w) => *w,
            SubfieldFormat::Unsigned(n) | SubfieldFormat::Signed(n) => Some(*n),
            SubfieldFormat::Bits(bits) => Some((bits + 7) / 8),
        }
    }

    /// Decode one value from the front of `data`, returning it and the bytes consumed
    pub fn decode(&self, data: &[u8]) -> Result<(Value, usize), Iso8211Error> {
        let (raw, consumed) = match self.fixed_width() {
            Some(width) => {
                if data.len() < width {
                    return Err(Iso8211Error::TruncatedField(format!(
                        "Subfield {} needs {} bytes, {} available",
                        self.to_format_string(),
                        width,
                        data.len()
                    )));
                }
                (&data[..width], width)
            }
            None => {
                let end = data
                    .iter()
                    .position(|&b| b == UNIT_TERMINATOR || b == FIELD_TERMINATOR)
                    .unwrap_or(data.len());
                let consumed = if end < data.len() { end + 1 } else { end };
                (&data[..end], consumed)
            }
        };

        let value = match self {
            SubfieldFormat::Text(_) => Value::Text(decode_text(raw)),
            SubfieldFormat::Integer(_) => Value::Int(leading_int(&decode_text(raw))),
            SubfieldFormat::Real(_) => Value::Float(leading_float(&decode_text(raw))),
            SubfieldFormat::Unsigned(_) => Value::Int(read_unsigned(raw)),
            SubfieldFormat::Signed(_) => Value::Int(read_signed(raw)),
            SubfieldFormat::Bits(_) => Value::Bytes(raw.to_vec()),
        };

        Ok((value, consumed))
    }

    /// Decode one value from a field written at lexical level 2, where
    /// unit-terminated text is UCS-2 closed by a two byte terminator. The
    /// text comes back as its raw UCS-2 bytes.
    pub fn decode_wide(&self, data: &[u8]) -> Result<(Value, usize), Iso8211Error> {
        if *self != SubfieldFormat::Text(None) {
            return self.decode(data);
        }
        let end = (0..data.len() / 2)
            .map(|i| 2 * i)
            .find(|&i| matches!(data[i], UNIT_TERMINATOR | FIELD_TERMINATOR) && data[i + 1] == 0);
        Ok(match end {
            Some(end) => (Value::Bytes(data[..end].to_vec()), end + 2),
            None => (Value::Bytes(data.to_vec()), data.len()),
        })
    }

    /// Append the encoded form of `value` to `out`
    pub fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<(), Iso8211Error> {
        match self {
            SubfieldFormat::Text(width) => {
                let text = value.as_string();
                write_chars(text.as_bytes(), *width, b' ', false, out);
            }
            SubfieldFormat::Integer(width) => {
                let text = match value {
                    Value::Text(s) => s.clone(),
                    other => other.as_int().to_string(),
                };
                write_chars(text.as_bytes(), *width, b'0', true, out);
            }
            SubfieldFormat::Real(width) => {
                let text = match value {
                    Value::Text(s) => s.clone(),
                    other => other.as_float().to_string(),
                };
                write_chars(text.as_bytes(), *width, b'0', true, out);
            }
            SubfieldFormat::Unsigned(n) | SubfieldFormat::Signed(n) => {
                if !matches!(n, 1 | 2 | 4 | 8) {
                    return Err(Iso8211Error::EncodeError(format!(
                        "Unsupported binary width {}",
                        n
                    )));
                }
                let v = value.as_int();
                let fits = match (self, *n) {
                    (_, 8) => true,
                    (SubfieldFormat::Signed(_), n) => {
                        let bound = 1i64 << (8 * n - 1);
                        (-bound..bound).contains(&v)
                    }
                    (_, n) => (0..1i64 << (8 * n)).contains(&v),
                };
                if !fits {
                    return Err(Iso8211Error::EncodeError(format!(
                        "Value {} does not fit in {}",
                        v,
                        self.to_format_string()
                    )));
                }
                out.extend_from_slice(&v.to_le_bytes()[..*n]);
            }
            SubfieldFormat::Bits(_) => {
                let width = self.fixed_width().unwrap_or(0);
                let bytes = value.as_bytes().ok_or_else(|| {
                    Iso8211Error::EncodeError(format!(
                        "Bit string subfield needs raw bytes, got {:?}",
                        value
                    ))
                })?;
                let mut buf = bytes.to_vec();
                buf.resize(width, 0);
                out.extend_from_slice(&buf);
            }
        }
        Ok(())
    }
}

/// Write character data either padded to `width` or unit-terminated
fn write_chars(text: &[u8], width: Option<usize>, pad: u8, pad_left: bool, out: &mut Vec<u8>) {
    match width {
        None => {
            out.extend_from_slice(text);
            out.push(UNIT_TERMINATOR);
        }
        Some(width) => {
            if text.len() >= width {
                out.extend_from_slice(&text[..width]);
            } else if pad_left {
                out.extend(std::iter::repeat(pad).take(width - text.len()));
                out.extend_from_slice(text);
            } else {
                out.extend_from_slice(text);
                out.extend(std::iter::repeat(pad).take(width - text.len()));
            }
        }
    }
}

/// Append a lexical level 2 text value: raw bytes are written as they are,
/// anything else as UTF-16LE, then the two byte unit terminator
pub(super) fn encode_wide_text(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bytes(raw) => out.extend_from_slice(raw),
        other => out.extend_from_slice(&encode_ucs2(&other.as_string())),
    }
    out.extend_from_slice(&[UNIT_TERMINATOR, 0]);
}

/// UCS-2 text to UTF-8. A leading byte order mark selects the byte order,
/// little-endian otherwise; a NUL character ends the string.
pub fn decode_ucs2(raw: &[u8]) -> String {
    let (body, big_endian) = match raw {
        [0xff, 0xfe, rest @ ..] => (rest, false),
        [0xfe, 0xff, rest @ ..] => (rest, true),
        _ => (raw, false),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// UTF-16LE bytes of `text`, without byte order mark
pub fn encode_ucs2(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// ISO 8859-1 bytes to UTF-8
pub fn decode_latin1(raw: &[u8]) -> String {
    raw.iter().map(|&b| b as char).collect()
}

fn read_unsigned(raw: &[u8]) -> i64 {
    let mut v: u64 = 0;
    for (i, byte) in raw.iter().take(8).enumerate() {
        v |= (*byte as u64) << (8 * i);
    }
    v as i64
}

fn read_signed(raw: &[u8]) -> i64 {
    let n = raw.len().min(8);
    if n == 0 {
        return 0;
    }
    let unsigned = read_unsigned(raw) as u64;
    let shift = 64 - 8 * n as u32;
    ((unsigned << shift) as i64) >> shift
}

/// Character data is UTF-8 when valid, otherwise ISO 8859-1
pub fn decode_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => decode_latin1(raw),
    }
}

/// Parse the leading integer of a string, 0 when there is none
pub fn leading_int(text: &str) -> i64 {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    s[..end].parse::<i64>().unwrap_or(0)
}

/// Parse the leading real number of a string, 0.0 when there is none
pub fn leading_float(text: &str) -> f64 {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut best = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end];
        if c.is_ascii_digit() {
            end += 1;
            best = end;
        } else if c == b'.' && !seen_dot && !seen_exp {
            seen_dot = true;
            end += 1;
            if best > 0 {
                best = end;
            }
        } else if (c == b'e' || c == b'E') && best > 0 && !seen_exp {
            seen_exp = true;
            end += 1;
            if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
                end += 1;
            }
        } else {
            break;
        }
    }
    s[..best].trim_end_matches('.').parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        assert_eq!(SubfieldFormat::parse("A").unwrap(), SubfieldFormat::Text(None));
        assert_eq!(SubfieldFormat::parse("A(8)").unwrap(), SubfieldFormat::Text(Some(8)));
        assert_eq!(SubfieldFormat::parse("R(4)").unwrap(), SubfieldFormat::Real(Some(4)));
        assert_eq!(SubfieldFormat::parse("b11").unwrap(), SubfieldFormat::Unsigned(1));
        assert_eq!(SubfieldFormat::parse("b24").unwrap(), SubfieldFormat::Signed(4));
        assert_eq!(SubfieldFormat::parse("B(40)").unwrap(), SubfieldFormat::Bits(40));
        assert!(SubfieldFormat::parse("b34").is_err());
        assert!(SubfieldFormat::parse("Q").is_err());
    }

    #[test]
    fn test_signed_decode() {
        let (value, used) = SubfieldFormat::Signed(4)
            .decode(&(-12345i32).to_le_bytes())
            .unwrap();
        assert_eq!(value, Value::Int(-12345));
        assert_eq!(used, 4);
    }

    #[test]
    fn test_variable_text_stops_at_terminator() {
        let data = b"HELLO\x1fWORLD\x1e";
        let (value, used) = SubfieldFormat::Text(None).decode(data).unwrap();
        assert_eq!(value, Value::Text("HELLO".to_string()));
        assert_eq!(used, 6);
    }

    #[test]
    fn test_latin1_fallback() {
        assert_eq!(decode_text(&[0x43, 0x61, 0x66, 0xe9]), "Café");
    }

    #[test]
    fn test_fixed_integer_is_zero_padded() {
        let mut out = Vec::new();
        SubfieldFormat::Integer(Some(5)).encode(&Value::Int(42), &mut out).unwrap();
        assert_eq!(out, b"00042");
    }

    #[test]
    fn test_binary_range_checked() {
        let mut out = Vec::new();
        SubfieldFormat::Signed(4).encode(&Value::Int(i32::MIN as i64), &mut out).unwrap();
        SubfieldFormat::Unsigned(1).encode(&Value::Int(255), &mut out).unwrap();
        assert_eq!(out.len(), 5);

        let too_big = SubfieldFormat::Signed(4).encode(&Value::Int(3_000_000_000), &mut out);
        assert!(matches!(too_big, Err(Iso8211Error::EncodeError(_))));
        let negative = SubfieldFormat::Unsigned(2).encode(&Value::Int(-1), &mut out);
        assert!(matches!(negative, Err(Iso8211Error::EncodeError(_))));
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_wide_text_decode() {
        let mut data = encode_ucs2("Øresund");
        data.extend_from_slice(&[UNIT_TERMINATOR, 0, 0x41]);
        let (value, used) = SubfieldFormat::Text(None).decode_wide(&data).unwrap();
        assert_eq!(used, 16);
        let Value::Bytes(raw) = value else {
            panic!("expected raw bytes, got {:?}", value);
        };
        assert_eq!(decode_ucs2(&raw), "Øresund");

        let (value, used) = SubfieldFormat::Unsigned(1).decode_wide(&[7, 0]).unwrap();
        assert_eq!((value, used), (Value::Int(7), 1));
    }

    #[test]
    fn test_ucs2_byte_order_mark() {
        assert_eq!(decode_ucs2(&[0xfe, 0xff, 0x00, 0x41, 0x00, 0x42]), "AB");
        assert_eq!(decode_ucs2(&[0xff, 0xfe, 0x41, 0x00]), "A");
        assert_eq!(decode_ucs2(&[0x41, 0x00, 0x00, 0x00, 0x42, 0x00]), "A");
    }

    #[test]
    fn test_leading_numbers() {
        assert_eq!(leading_int("  42abc"), 42);
        assert_eq!(leading_int("-7"), -7);
        assert_eq!(leading_int("x"), 0);
        assert_eq!(leading_float("3.25m"), 3.25);
        assert_eq!(leading_float("1e3"), 1000.0);
        assert_eq!(leading_float(""), 0.0);
    }
}
