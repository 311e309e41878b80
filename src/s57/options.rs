// S-57 Reader Options
// Flags controlling update application, sounding handling and extra output fields

use serde::{Deserialize, Serialize};

use super::S57Error;

/// Reader configuration.
///
/// Deserialises from JSON with snake_case keys; missing keys take defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Apply the .001, .002, ... update chain after ingest
    pub apply_updates: bool,
    /// Return each sounding of a SOUNDG multipoint as its own feature
    pub split_multipoint: bool,
    /// Add a DEPTH field to split soundings (requires split_multipoint)
    pub add_soundg_depth: bool,
    /// Keep empty numeric attributes as EMPTY_NUMBER_MARKER instead of unset
    pub preserve_empty_numbers: bool,
    /// Also return vector primitives as features
    pub return_primitives: bool,
    /// Add NAME_RCNM / NAME_RCID / ORNT / USAG / MASK fields
    pub return_linkages: bool,
    /// Add LNAM / LNAM_REFS / FFPT_RIND fields
    pub lnam_refs: bool,
    /// Return the DSID header as the first feature
    pub return_dsid: bool,
    /// Decode ATTF and NATF text as DSSI AALL / NALL declare (ISO 8859-1 or UCS-2)
    pub recode_by_dssi: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            apply_updates: true,
            split_multipoint: false,
            add_soundg_depth: false,
            preserve_empty_numbers: false,
            return_primitives: false,
            return_linkages: false,
            lnam_refs: true,
            return_dsid: true,
            recode_by_dssi: false,
        }
    }
}

impl ReaderOptions {
    /// Parse GDAL style `NAME=VALUE` pairs such as `UPDATES=APPLY` or
    /// `SPLIT_MULTIPOINT=ON`. A bare name switches the flag on.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self, S57Error> {
        let mut options = Self::default();

        for pair in pairs {
            let pair = pair.as_ref().trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = match pair.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim())),
                None => (pair, None),
            };

            if name.eq_ignore_ascii_case("UPDATES") {
                options.apply_updates = value.map_or(true, |v| v.eq_ignore_ascii_case("APPLY"));
                continue;
            }

            let flag = value.map_or(true, parse_bool);
            match name.to_ascii_uppercase().as_str() {
                "SPLIT_MULTIPOINT" => options.split_multipoint = flag,
                "ADD_SOUNDG_DEPTH" => options.add_soundg_depth = flag,
                "PRESERVE_EMPTY_NUMBERS" => options.preserve_empty_numbers = flag,
                "RETURN_PRIMITIVES" => options.return_primitives = flag,
                "RETURN_LINKAGES" => options.return_linkages = flag,
                "LNAM_REFS" => options.lnam_refs = flag,
                "RETURN_DSID" => options.return_dsid = flag,
                "RECODE_BY_DSSI" => options.recode_by_dssi = flag,
                _ => log::debug!("Ignoring unknown S-57 option {}", name),
            }
        }

        options.validate()?;
        Ok(options)
    }

    /// Parse options from a JSON object
    pub fn from_json(json: &str) -> Result<Self, S57Error> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| S57Error::InvalidOptions(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), S57Error> {
        if self.add_soundg_depth && !self.split_multipoint {
            return Err(S57Error::InvalidOptions(
                "ADD_SOUNDG_DEPTH requires SPLIT_MULTIPOINT".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_uppercase().as_str(),
        "ON" | "YES" | "TRUE" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ReaderOptions::default();
        assert!(options.apply_updates);
        assert!(options.lnam_refs);
        assert!(options.return_dsid);
        assert!(!options.split_multipoint);
        assert!(!options.recode_by_dssi);
    }

    #[test]
    fn test_from_pairs() {
        let options = ReaderOptions::from_pairs(&[
            "UPDATES=NO",
            "split_multipoint=ON",
            "ADD_SOUNDG_DEPTH",
            "RETURN_DSID=OFF",
            "RECODE_BY_DSSI=YES",
        ])
        .unwrap();
        assert!(!options.apply_updates);
        assert!(options.split_multipoint);
        assert!(options.add_soundg_depth);
        assert!(!options.return_dsid);
        assert!(options.recode_by_dssi);
    }

    #[test]
    fn test_depth_requires_split() {
        let result = ReaderOptions::from_pairs(&["ADD_SOUNDG_DEPTH=ON"]);
        assert!(matches!(result, Err(S57Error::InvalidOptions(_))));

        let result = ReaderOptions::from_json(r#"{"add_soundg_depth": true}"#);
        assert!(matches!(result, Err(S57Error::InvalidOptions(_))));
    }

    #[test]
    fn test_from_json_partial() {
        let options =
            ReaderOptions::from_json(r#"{"return_primitives": true, "recode_by_dssi": true}"#).unwrap();
        assert!(options.return_primitives);
        assert!(options.recode_by_dssi);
        assert!(options.apply_updates);
        assert!(ReaderOptions::from_json("not json").is_err());
    }
}
