// ISO 8211 Data Records
// Decoded fields held as rows of typed subfield values

use std::sync::Arc;

use super::{FieldDefn, Value};

/// One field instance: its shared definition and the decoded subfield rows
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    defn: Arc<FieldDefn>,
    rows: Vec<Vec<Value>>,
}

impl Field {
    pub fn new(defn: Arc<FieldDefn>) -> Self {
        Self {
            defn,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(defn: Arc<FieldDefn>, rows: Vec<Vec<Value>>) -> Self {
        Self { defn, rows }
    }

    pub fn defn(&self) -> &FieldDefn {
        &self.defn
    }

    pub fn shared_defn(&self) -> Arc<FieldDefn> {
        Arc::clone(&self.defn)
    }

    pub fn tag(&self) -> &str {
        &self.defn.tag
    }

    /// Number of subfield groups in this instance
    pub fn repeat_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Value of a named subfield in row `row`
    pub fn value(&self, subfield: &str, row: usize) -> Option<&Value> {
        let column = self.defn.find_subfield(subfield)?;
        self.rows.get(row)?.get(column)
    }

    pub fn int_value(&self, subfield: &str, row: usize) -> Option<i64> {
        self.value(subfield, row).map(Value::as_int)
    }

    pub fn float_value(&self, subfield: &str, row: usize) -> Option<f64> {
        self.value(subfield, row).map(Value::as_float)
    }

    pub fn string_value(&self, subfield: &str, row: usize) -> Option<String> {
        self.value(subfield, row).map(Value::as_string)
    }

    pub fn bytes_value(&self, subfield: &str, row: usize) -> Option<&[u8]> {
        self.value(subfield, row).and_then(Value::as_bytes)
    }

    /// Overwrite one subfield value, returns false if the row or subfield does not exist
    pub fn set_value(&mut self, subfield: &str, row: usize, value: Value) -> bool {
        let Some(column) = self.defn.find_subfield(subfield) else {
            return false;
        };
        match self.rows.get_mut(row).and_then(|r| r.get_mut(column)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Insert rows before `index` (clamped to the end)
    pub fn insert_rows(&mut self, index: usize, rows: impl IntoIterator<Item = Vec<Value>>) {
        let index = index.min(self.rows.len());
        let tail = self.rows.split_off(index);
        self.rows.extend(rows);
        self.rows.extend(tail);
    }

    /// Remove up to `count` rows starting at `index`, returns how many were removed
    pub fn remove_rows(&mut self, index: usize, count: usize) -> usize {
        if index >= self.rows.len() {
            return 0;
        }
        let end = (index + count).min(self.rows.len());
        self.rows.drain(index..end);
        end - index
    }

    /// Overwrite rows starting at `index`, appending any that fall past the end
    pub fn replace_rows(&mut self, index: usize, rows: impl IntoIterator<Item = Vec<Value>>) {
        for (offset, row) in rows.into_iter().enumerate() {
            let position = index + offset;
            if position < self.rows.len() {
                self.rows[position] = row;
            } else {
                self.rows.push(row);
            }
        }
    }
}

/// A data record: an ordered list of field instances
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<Field>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// The record's key field: the first field after the 0001 record identifier
    pub fn key_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag() != "0001")
    }

    pub fn find_field(&self, tag: &str) -> Option<&Field> {
        self.find_field_nth(tag, 0)
    }

    /// The `n`th instance of a field tag
    pub fn find_field_nth(&self, tag: &str, n: usize) -> Option<&Field> {
        self.fields.iter().filter(|f| f.tag() == tag).nth(n)
    }

    pub fn find_field_mut(&mut self, tag: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.tag() == tag)
    }

    /// All instances of a field tag, in record order
    pub fn fields_named<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.tag() == tag)
    }

    pub fn push_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Append an empty instance of `defn` and return it for filling
    pub fn add_field(&mut self, defn: Arc<FieldDefn>) -> &mut Field {
        self.fields.push(Field::new(defn));
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    pub fn int_subfield(&self, tag: &str, field_index: usize, subfield: &str, row: usize) -> Option<i64> {
        self.find_field_nth(tag, field_index)?.int_value(subfield, row)
    }

    pub fn float_subfield(&self, tag: &str, field_index: usize, subfield: &str, row: usize) -> Option<f64> {
        self.find_field_nth(tag, field_index)?.float_value(subfield, row)
    }

    pub fn string_subfield(&self, tag: &str, field_index: usize, subfield: &str, row: usize) -> Option<String> {
        self.find_field_nth(tag, field_index)?.string_value(subfield, row)
    }

    pub fn bytes_subfield(&self, tag: &str, field_index: usize, subfield: &str, row: usize) -> Option<&[u8]> {
        self.find_field_nth(tag, field_index)?.bytes_value(subfield, row)
    }
}
