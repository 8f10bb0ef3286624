//! Error types for the cloth pipeline

use crate::backend::traits::BackendError;
use crate::cloth::registry::ClothMeshId;
use thiserror::Error;

/// Cloth simulation error type
#[derive(Error, Debug)]
pub enum ClothError {
    #[error("Invalid grid size {rows}x{columns}: rows and columns must be at least 1")]
    InvalidGridSize { rows: u32, columns: u32 },
    #[error("Invalid grid cell size {width}x{height}: must be positive")]
    InvalidCellSize { width: f32, height: f32 },
    #[error("Iteration count must be at least 1")]
    InvalidIterationCount,
    #[error("Coefficient '{name}' = {value} is outside [0, 1)")]
    CoefficientOutOfRange { name: &'static str, value: f32 },
    #[error("Cloth mesh '{0}' has no settings; call init_cloth_settings first")]
    NotInitialized(String),
    #[error("Cloth mesh {0:?} is already registered")]
    AlreadyRegistered(ClothMeshId),
    #[error("Cloth mesh {0:?} is not registered")]
    NotRegistered(ClothMeshId),
    #[error("Cannot register more than {max} cloth meshes")]
    TooManyMeshes { max: usize },
    #[error("Command has {actual} vertices but mesh {mesh:?} registered {expected}")]
    VertexCountMismatch {
        mesh: ClothMeshId,
        expected: u32,
        actual: u32,
    },
    #[error("Cloth command channel is closed")]
    ChannelClosed,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type ClothResult<T> = Result<T, ClothError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClothError::InvalidGridSize {
            rows: 0,
            columns: 3,
        };
        assert_eq!(
            err.to_string(),
            "Invalid grid size 0x3: rows and columns must be at least 1"
        );

        let err: ClothError = BackendError::DeviceLost.into();
        assert_eq!(err.to_string(), "Device lost");
    }
}
