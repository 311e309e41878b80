// ISO/IEC 8211 Container Codec
// Self-describing record/field/subfield files used as the S-57 transfer format

mod format;
mod field_defn;
mod record;
mod module;

pub use format::*;
pub use field_defn::*;
pub use record::*;
pub use module::*;

use thiserror::Error;

/// Subfield delimiter
pub const UNIT_TERMINATOR: u8 = 0x1f;

/// Field delimiter
pub const FIELD_TERMINATOR: u8 = 0x1e;

/// Size of every record leader
pub const LEADER_SIZE: usize = 24;

/// ISO 8211 parsing and encoding errors
#[derive(Error, Debug)]
pub enum Iso8211Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid leader: {0}")]
    InvalidLeader(String),

    #[error("Invalid directory: {0}")]
    InvalidDirectory(String),

    #[error("Invalid format controls: {0}")]
    InvalidFormat(String),

    #[error("Truncated field: {0}")]
    TruncatedField(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Encode error: {0}")]
    EncodeError(String),
}
