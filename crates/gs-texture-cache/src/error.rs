use gs_mem::{MemoryError, Psm};
use thiserror::Error;

use crate::{TargetKind, TextureId};

pub type Result<T> = std::result::Result<T, CacheError>;

/// Failure reported by a [`crate::GpuBackend`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("out of texture memory: {requested} bytes requested, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),

    #[error("invalid texture description: {0}")]
    InvalidDesc(&'static str),

    #[error("upload holds {actual} texels but the rectangle needs {expected}")]
    UploadSize { expected: usize, actual: usize },

    #[error("rectangle outside texture {0:?}")]
    OutOfBounds(TextureId),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    /// The backend could not allocate a texture. The draw needing it should be skipped.
    #[error("texture allocation failed")]
    Allocation { source: BackendError },

    #[error("GPU backend error: {0}")]
    Backend(BackendError),

    #[error("pixel storage mode {psm:?} cannot back a {kind:?}")]
    UnsupportedTargetFormat { psm: Psm, kind: TargetKind },

    #[error("handle refers to an evicted or unknown entry")]
    StaleHandle,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl CacheError {
    /// Whether the caller can continue by skipping the current draw.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CacheError::Allocation { .. })
    }
}

impl From<BackendError> for CacheError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::OutOfMemory { .. } | BackendError::InvalidDesc(_) => {
                CacheError::Allocation { source: err }
            }
            other => CacheError::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_allocation_failures_are_recoverable() {
        let oom: CacheError = BackendError::OutOfMemory {
            requested: 16,
            available: 0,
        }
        .into();
        assert!(oom.is_recoverable());

        let unknown: CacheError = BackendError::UnknownTexture(TextureId(3)).into();
        assert!(!unknown.is_recoverable());
        assert!(!CacheError::StaleHandle.is_recoverable());
    }
}
