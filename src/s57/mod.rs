// S-57 Chart Record Engine
// Reads, updates and writes IHO S-57 transfer sets stored in ISO 8211 containers

mod record_index;
mod catalog;
mod options;
mod feature;
mod featuredefns;
mod geometry;
mod polygon;
mod reader;
mod update;
mod writer;

pub use record_index::*;
pub use catalog::*;
pub use options::*;
pub use feature::*;
pub use featuredefns::*;
pub use geometry::*;
pub use polygon::*;
pub use reader::*;
pub use update::apply_record_update;
pub use writer::*;

use thiserror::Error;

use crate::iso8211::Iso8211Error;

/// S-57 errors
#[derive(Error, Debug)]
pub enum S57Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ISO 8211 error: {0}")]
    Iso8211(#[from] Iso8211Error),

    #[error("Not an S-57 file: {0}")]
    NotS57(String),

    #[error("Reader is not open")]
    NotOpen,

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Update error: {0}")]
    UpdateError(String),

    #[error("Write error: {0}")]
    WriteError(String),
}

/// Record name (RCNM) values
pub const RCNM_DSID: i32 = 10;
pub const RCNM_DSPM: i32 = 20;
pub const RCNM_FE: i32 = 100;
pub const RCNM_VI: i32 = 110;
pub const RCNM_VC: i32 = 120;
pub const RCNM_VE: i32 = 130;
pub const RCNM_VF: i32 = 140;

/// Object geometric primitive (PRIM) values
pub const PRIM_P: i32 = 1;
pub const PRIM_L: i32 = 2;
pub const PRIM_A: i32 = 3;
pub const PRIM_N: i32 = 255;

/// Object class code of soundings
pub const SOUNDG_OBJL: i32 = 129;

/// Stored in numeric fields whose encoded value was an empty string
pub const EMPTY_NUMBER_MARKER: i32 = 2_147_483_641;

/// Record update instruction (RUIN) values
pub const RUIN_INSERT: i32 = 1;
pub const RUIN_DELETE: i32 = 2;
pub const RUIN_MODIFY: i32 = 3;

/// Default coordinate and sounding multiplication factors
pub const DEFAULT_COMF: i32 = 1_000_000;
pub const DEFAULT_SOMF: i32 = 10;

/// Layer name of the dataset header feature
pub const DSID_LAYER: &str = "DSID";

/// Vector primitive kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    IsolatedNode,
    ConnectedNode,
    Edge,
    Face,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 4] = [
        PrimitiveKind::IsolatedNode,
        PrimitiveKind::ConnectedNode,
        PrimitiveKind::Edge,
        PrimitiveKind::Face,
    ];

    pub fn from_rcnm(rcnm: i32) -> Option<Self> {
        match rcnm {
            RCNM_VI => Some(Self::IsolatedNode),
            RCNM_VC => Some(Self::ConnectedNode),
            RCNM_VE => Some(Self::Edge),
            RCNM_VF => Some(Self::Face),
            _ => None,
        }
    }

    pub fn rcnm(self) -> i32 {
        match self {
            Self::IsolatedNode => RCNM_VI,
            Self::ConnectedNode => RCNM_VC,
            Self::Edge => RCNM_VE,
            Self::Face => RCNM_VF,
        }
    }

    /// Name of the primitive layer
    pub fn layer_name(self) -> &'static str {
        match self {
            Self::IsolatedNode => "IsolatedNode",
            Self::ConnectedNode => "ConnectedNode",
            Self::Edge => "Edge",
            Self::Face => "Face",
        }
    }

    pub fn from_layer_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.layer_name().eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_kind_codes() {
        for kind in PrimitiveKind::ALL {
            assert_eq!(PrimitiveKind::from_rcnm(kind.rcnm()), Some(kind));
            assert_eq!(PrimitiveKind::from_layer_name(kind.layer_name()), Some(kind));
        }
        assert_eq!(PrimitiveKind::from_rcnm(RCNM_FE), None);
        assert_eq!(PrimitiveKind::from_layer_name("edge"), Some(PrimitiveKind::Edge));
    }
}
