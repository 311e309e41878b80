// S-57 Object Class Catalog
// Parses s57objectclasses.csv and s57attributes.csv (or the compiled-in tables)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::S57Error;

const CLASS_HEADER: &str =
    "\"Code\",\"ObjectClass\",\"Acronym\",\"Attribute_A\",\"Attribute_B\",\"Attribute_C\",\"Class\",\"Primitives\"";
const ATTRIBUTE_HEADER: &str = "\"Code\",\"Attribute\",\"Acronym\",\"Attributetype\",\"Class\"";

/// Attribute codes must fall below this
const MAX_ATTRIBUTES: i32 = 25_000;

const BUILTIN_CLASSES: &str = include_str!("../../data/s57objectclasses.csv");
const BUILTIN_ATTRIBUTES: &str = include_str!("../../data/s57attributes.csv");

/// Attribute value type (Attributetype column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttributeType {
    Enum,
    List,
    Float,
    Integer,
    CodeString,
    FreeText,
}

impl AttributeType {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'E' => Some(Self::Enum),
            'L' => Some(Self::List),
            'F' => Some(Self::Float),
            'I' => Some(Self::Integer),
            'A' => Some(Self::CodeString),
            'S' => Some(Self::FreeText),
            _ => None,
        }
    }

    pub fn to_char(self) -> char {
        match self {
            Self::Enum => 'E',
            Self::List => 'L',
            Self::Float => 'F',
            Self::Integer => 'I',
            Self::CodeString => 'A',
            Self::FreeText => 'S',
        }
    }
}

/// Attribute groups of an object class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeGroup {
    A,
    B,
    C,
}

/// One row of the attribute table
#[derive(Debug, Clone, Serialize)]
pub struct AttributeInfo {
    pub code: i32,
    pub name: String,
    pub acronym: String,
    pub attr_type: AttributeType,
    pub class: char,
}

/// One row of the object class table
#[derive(Debug, Clone, Serialize)]
pub struct ClassDescriptor {
    pub code: i32,
    pub description: String,
    pub acronym: String,
    pub attributes_a: Vec<String>,
    pub attributes_b: Vec<String>,
    pub attributes_c: Vec<String>,
    pub class: String,
    pub primitives: Vec<String>,
}

impl ClassDescriptor {
    /// Attribute acronyms of one group, or of all three groups in A, B, C order
    pub fn attribute_list(&self, group: Option<AttributeGroup>) -> Vec<&str> {
        let groups: Vec<&Vec<String>> = match group {
            Some(AttributeGroup::A) => vec![&self.attributes_a],
            Some(AttributeGroup::B) => vec![&self.attributes_b],
            Some(AttributeGroup::C) => vec![&self.attributes_c],
            None => vec![&self.attributes_a, &self.attributes_b, &self.attributes_c],
        };
        groups
            .into_iter()
            .flat_map(|list| list.iter().map(|s| s.as_str()))
            .collect()
    }

    pub fn has_primitive(&self, primitive: &str) -> bool {
        self.primitives.iter().any(|p| p.eq_ignore_ascii_case(primitive))
    }
}

/// Immutable object class and attribute dictionary
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    classes: Vec<ClassDescriptor>,
    class_by_code: HashMap<i32, usize>,
    class_by_acronym: HashMap<String, usize>,
    /// Sparse table indexed by attribute code
    attributes: Vec<Option<AttributeInfo>>,
    /// Attribute codes sorted by acronym
    attributes_by_acronym: Vec<i32>,
}

impl ClassCatalog {
    /// Load the catalog tables.
    ///
    /// `directory` defaults to the `S57_CSV` environment variable. The
    /// profile selects an alternate file pair (`_aml`, `_iw`). When no files
    /// are found for the standard profile the compiled-in tables are used.
    pub fn load(directory: Option<&Path>, profile: Option<&str>) -> Result<Self, S57Error> {
        let suffix = profile_suffix(profile);

        let directory: Option<PathBuf> = directory
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("S57_CSV").map(PathBuf::from));

        if let Some(dir) = directory {
            let class_path = dir.join(format!("s57objectclasses{}.csv", suffix));
            let attr_path = dir.join(format!("s57attributes{}.csv", suffix));
            if class_path.exists() && attr_path.exists() {
                let classes = fs::read_to_string(&class_path)?;
                let attributes = fs::read_to_string(&attr_path)?;
                log::debug!("Loading S-57 catalog from {:?}", dir);
                return Self::from_tables(&classes, &attributes);
            }
            log::debug!("No S-57 catalog files{} in {:?}", suffix, dir);
        }

        if !suffix.is_empty() {
            return Err(S57Error::CatalogError(format!(
                "No catalog files found for profile {}",
                profile.unwrap_or_default()
            )));
        }

        Self::builtin()
    }

    /// Load using `S57_CSV` and `S57_PROFILE`
    pub fn load_from_env() -> Result<Self, S57Error> {
        let profile = std::env::var("S57_PROFILE").ok();
        Self::load(None, profile.as_deref())
    }

    /// The compiled-in tables
    pub fn builtin() -> Result<Self, S57Error> {
        Self::from_tables(BUILTIN_CLASSES, BUILTIN_ATTRIBUTES)
    }

    /// Build a catalog from the text of the two tables
    pub fn from_tables(class_table: &str, attribute_table: &str) -> Result<Self, S57Error> {
        let mut catalog = Self {
            classes: Vec::new(),
            class_by_code: HashMap::new(),
            class_by_acronym: HashMap::new(),
            attributes: Vec::new(),
            attributes_by_acronym: Vec::new(),
        };

        catalog.load_classes(class_table)?;
        catalog.load_attributes(attribute_table)?;

        log::debug!(
            "Loaded {} S-57 object classes and {} attributes",
            catalog.classes.len(),
            catalog.attributes_by_acronym.len()
        );
        Ok(catalog)
    }

    fn load_classes(&mut self, text: &str) -> Result<(), S57Error> {
        let mut lines = text.lines();
        let header = lines.next().unwrap_or("").trim();
        if !header.eq_ignore_ascii_case(CLASS_HEADER) {
            return Err(S57Error::CatalogError(
                "s57objectclasses columns don't match expected format".to_string(),
            ));
        }

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let tokens = tokenize_csv_line(line);
            if tokens.len() < 8 {
                log::debug!("Skipping short object class row: {}", line);
                continue;
            }
            let Ok(code) = tokens[0].trim().parse::<i32>() else {
                log::debug!("Skipping object class row with bad code: {}", line);
                continue;
            };

            let descriptor = ClassDescriptor {
                code,
                description: tokens[1].clone(),
                acronym: tokens[2].clone(),
                attributes_a: split_list(&tokens[3]),
                attributes_b: split_list(&tokens[4]),
                attributes_c: split_list(&tokens[5]),
                class: tokens[6].clone(),
                primitives: split_list(&tokens[7]),
            };

            let index = self.classes.len();
            self.class_by_code.entry(code).or_insert(index);
            self.class_by_acronym
                .entry(descriptor.acronym.to_ascii_uppercase())
                .or_insert(index);
            self.classes.push(descriptor);
        }
        Ok(())
    }

    fn load_attributes(&mut self, text: &str) -> Result<(), S57Error> {
        let mut lines = text.lines();
        let header = lines.next().unwrap_or("").trim();
        if !header.eq_ignore_ascii_case(ATTRIBUTE_HEADER) {
            return Err(S57Error::CatalogError(
                "s57attributes columns don't match expected format".to_string(),
            ));
        }

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let tokens = tokenize_csv_line(line);
            if tokens.len() < 5 {
                log::debug!("Skipping short attribute row: {}", line);
                continue;
            }

            let code = crate::iso8211::leading_int(&tokens[0]) as i32;
            if !(0..MAX_ATTRIBUTES).contains(&code) {
                return Err(S57Error::CatalogError(format!(
                    "Attribute code {} out of range",
                    code
                )));
            }

            let attr_type = tokens[3]
                .chars()
                .next()
                .and_then(AttributeType::from_char)
                .unwrap_or(AttributeType::FreeText);
            let info = AttributeInfo {
                code,
                name: tokens[1].clone(),
                acronym: tokens[2].clone(),
                attr_type,
                class: tokens[4].chars().next().unwrap_or(' '),
            };

            let slot = code as usize;
            if self.attributes.len() <= slot {
                self.attributes.resize(slot + 1, None);
            }
            if self.attributes[slot].is_some() {
                log::warn!("Duplicate definition for attribute {}:{}", code, info.acronym);
            }
            self.attributes[slot] = Some(info);
        }

        let mut codes: Vec<i32> = self
            .attributes
            .iter()
            .flatten()
            .map(|info| info.code)
            .collect();
        codes.sort_by(|a, b| self.acronym_of(*a).cmp(self.acronym_of(*b)));
        self.attributes_by_acronym = codes;
        Ok(())
    }

    fn acronym_of(&self, code: i32) -> &str {
        self.attr_acronym(code).unwrap_or("")
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> &[ClassDescriptor] {
        &self.classes
    }

    /// Select a class by object class code (OBJL)
    pub fn select_class(&self, code: i32) -> Option<&ClassDescriptor> {
        self.class_by_code.get(&code).map(|&i| &self.classes[i])
    }

    pub fn select_class_by_acronym(&self, acronym: &str) -> Option<&ClassDescriptor> {
        self.class_by_acronym
            .get(&acronym.to_ascii_uppercase())
            .map(|&i| &self.classes[i])
    }

    pub fn select_class_by_index(&self, index: usize) -> Option<&ClassDescriptor> {
        self.classes.get(index)
    }

    pub fn attr_info(&self, code: i32) -> Option<&AttributeInfo> {
        if code < 0 {
            return None;
        }
        self.attributes.get(code as usize).and_then(|a| a.as_ref())
    }

    pub fn attr_acronym(&self, code: i32) -> Option<&str> {
        self.attr_info(code).map(|a| a.acronym.as_str())
    }

    /// Attribute code for an acronym, via binary search of the acronym index
    pub fn find_attr_by_acronym(&self, acronym: &str) -> Option<i32> {
        self.attributes_by_acronym
            .binary_search_by(|code| self.acronym_of(*code).cmp(acronym))
            .ok()
            .map(|pos| self.attributes_by_acronym[pos])
    }
}

/// File name suffix for a catalog profile
fn profile_suffix(profile: Option<&str>) -> &'static str {
    match profile {
        Some(p) if p.eq_ignore_ascii_case("Additional_Military_Layers") => "_aml",
        Some(p) if p.eq_ignore_ascii_case("Inland_Waterways") => "_iw",
        _ => "",
    }
}

/// Split a semicolon separated list, dropping empty items
fn split_list(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split one CSV line on commas, honouring double quoted fields
fn tokenize_csv_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    tokens.push(current);
    tokens
}
