use thiserror::Error;

use crate::Psm;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("texel buffer holds {actual} texels but the region needs {expected}")]
    TexelCountMismatch { expected: usize, actual: usize },

    #[error("pixel storage mode {0:?} cannot be used here")]
    UnsupportedFormat(Psm),

    #[error("CLUT of {entries} entries does not fit pixel storage mode {psm:?}")]
    InvalidClut { psm: Psm, entries: usize },
}
