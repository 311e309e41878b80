// S-57 Feature Model
// Feature definitions, typed attribute values and assembled features

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map};

use super::geometry::{Geometry, GeometryKind};
use crate::iso8211::{leading_float, leading_int};

/// Attribute field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Real,
    String,
    IntegerList,
    StringList,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Real)
    }
}

/// One attribute field of a feature definition
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureField {
    pub name: String,
    pub field_type: FieldType,
}

/// Schema shared by every feature of one class or layer
#[derive(Debug, Clone)]
pub struct FeatureDefn {
    name: String,
    geometry_kind: GeometryKind,
    fields: Vec<FeatureField>,
    by_name: HashMap<String, usize>,
}

impl FeatureDefn {
    pub fn new(name: &str, geometry_kind: GeometryKind) -> Self {
        Self {
            name: name.to_string(),
            geometry_kind,
            fields: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry_kind(&self) -> GeometryKind {
        self.geometry_kind
    }

    pub fn fields(&self) -> &[FeatureField] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Add a field; a name already present is left unchanged
    pub fn add_field(&mut self, name: &str, field_type: FieldType) {
        if self.by_name.contains_key(name) {
            return;
        }
        self.by_name.insert(name.to_string(), self.fields.len());
        self.fields.push(FeatureField {
            name: name.to_string(),
            field_type,
        });
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied().or_else(|| {
            self.fields
                .iter()
                .position(|f| f.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field_index(name).map(|i| self.fields[i].field_type)
    }
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    String(String),
    IntegerList(Vec<i64>),
    StringList(Vec<String>),
}

impl FieldValue {
    pub fn as_integer(&self) -> i64 {
        match self {
            FieldValue::Integer(v) => *v,
            FieldValue::Real(v) => *v as i64,
            FieldValue::String(s) => leading_int(s),
            FieldValue::IntegerList(l) => l.first().copied().unwrap_or(0),
            FieldValue::StringList(l) => l.first().map(|s| leading_int(s)).unwrap_or(0),
        }
    }

    pub fn as_real(&self) -> f64 {
        match self {
            FieldValue::Integer(v) => *v as f64,
            FieldValue::Real(v) => *v,
            FieldValue::String(s) => leading_float(s),
            FieldValue::IntegerList(l) => l.first().map(|v| *v as f64).unwrap_or(0.0),
            FieldValue::StringList(l) => l.first().map(|s| leading_float(s)).unwrap_or(0.0),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Real(v) => v.to_string(),
            FieldValue::String(s) => s.clone(),
            FieldValue::IntegerList(l) => l.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","),
            FieldValue::StringList(l) => l.join(","),
        }
    }

    /// Convert to the representation a field of `field_type` stores
    fn coerce(self, field_type: FieldType) -> FieldValue {
        match (field_type, self) {
            (FieldType::Integer, v @ FieldValue::Integer(_)) => v,
            (FieldType::Integer, v) => FieldValue::Integer(v.as_integer()),
            (FieldType::Real, v @ FieldValue::Real(_)) => v,
            (FieldType::Real, v) => FieldValue::Real(v.as_real()),
            (FieldType::String, v @ FieldValue::String(_)) => v,
            (FieldType::String, v) => FieldValue::String(v.as_string()),
            (FieldType::IntegerList, v @ FieldValue::IntegerList(_)) => v,
            (FieldType::IntegerList, FieldValue::StringList(l)) => {
                FieldValue::IntegerList(l.iter().map(|s| leading_int(s)).collect())
            }
            (FieldType::IntegerList, v) => FieldValue::IntegerList(vec![v.as_integer()]),
            (FieldType::StringList, v @ FieldValue::StringList(_)) => v,
            (FieldType::StringList, FieldValue::IntegerList(l)) => {
                FieldValue::StringList(l.iter().map(|v| v.to_string()).collect())
            }
            (FieldType::StringList, v) => FieldValue::StringList(vec![v.as_string()]),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Integer(v) => json!(v),
            FieldValue::Real(v) => json!(v),
            FieldValue::String(s) => json!(s),
            FieldValue::IntegerList(l) => json!(l),
            FieldValue::StringList(l) => json!(l),
        }
    }
}

/// One assembled feature
#[derive(Debug, Clone)]
pub struct Feature {
    defn: Arc<FeatureDefn>,
    fid: i64,
    values: Vec<Option<FieldValue>>,
    geometry: Option<Geometry>,
}

impl Feature {
    pub fn new(defn: Arc<FeatureDefn>) -> Self {
        let values = vec![None; defn.field_count()];
        Self {
            defn,
            fid: -1,
            values,
            geometry: None,
        }
    }

    pub fn defn(&self) -> &Arc<FeatureDefn> {
        &self.defn
    }

    pub fn fid(&self) -> i64 {
        self.fid
    }

    pub fn set_fid(&mut self, fid: i64) {
        self.fid = fid;
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = Some(geometry);
    }

    pub fn take_geometry(&mut self) -> Option<Geometry> {
        self.geometry.take()
    }

    /// Set a field, converting to its declared type. Unknown names are ignored.
    pub fn set_field(&mut self, name: &str, value: FieldValue) {
        if let Some(index) = self.defn.field_index(name) {
            let field_type = self.defn.fields()[index].field_type;
            self.values[index] = Some(value.coerce(field_type));
        }
    }

    /// Set a field from text. Numbers take the leading numeric prefix, 0 if none.
    pub fn set_field_from_str(&mut self, name: &str, text: &str) {
        let Some(field_type) = self.defn.field_type(name) else {
            return;
        };
        let value = match field_type {
            FieldType::Integer => FieldValue::Integer(leading_int(text)),
            FieldType::Real => FieldValue::Real(leading_float(text)),
            FieldType::String => FieldValue::String(text.to_string()),
            FieldType::IntegerList => {
                FieldValue::IntegerList(text.split(',').map(leading_int).collect())
            }
            FieldType::StringList => FieldValue::StringList(vec![text.to_string()]),
        };
        self.set_field(name, value);
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        let index = self.defn.field_index(name)?;
        self.values[index].as_ref()
    }

    pub fn is_field_set(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn unset_field(&mut self, name: &str) {
        if let Some(index) = self.defn.field_index(name) {
            self.values[index] = None;
        }
    }

    pub fn field_as_integer(&self, name: &str) -> Option<i64> {
        self.field(name).map(FieldValue::as_integer)
    }

    pub fn field_as_real(&self, name: &str) -> Option<f64> {
        self.field(name).map(FieldValue::as_real)
    }

    pub fn field_as_string(&self, name: &str) -> Option<String> {
        self.field(name).map(FieldValue::as_string)
    }

    pub fn field_as_integer_list(&self, name: &str) -> Option<Vec<i64>> {
        match self.field(name)? {
            FieldValue::IntegerList(l) => Some(l.clone()),
            other => Some(vec![other.as_integer()]),
        }
    }

    pub fn field_as_string_list(&self, name: &str) -> Option<Vec<String>> {
        match self.field(name)? {
            FieldValue::StringList(l) => Some(l.clone()),
            FieldValue::IntegerList(l) => Some(l.iter().map(|v| v.to_string()).collect()),
            other => Some(vec![other.as_string()]),
        }
    }

    /// GeoJSON feature object with the layer name as a `layer` member
    pub fn to_geojson(&self) -> serde_json::Value {
        let mut properties = Map::new();
        for (field, value) in self.defn.fields().iter().zip(&self.values) {
            if let Some(value) = value {
                properties.insert(field.name.clone(), value.to_json());
            }
        }

        json!({
            "type": "Feature",
            "id": self.fid,
            "layer": self.defn.name(),
            "properties": properties,
            "geometry": self.geometry.as_ref().map(Geometry::to_geojson),
        })
    }
}
