// VortexNav S-57
// ISO 8211 container codec and S-57 chart record engine

pub mod iso8211;
pub mod s57;
