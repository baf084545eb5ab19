use thiserror::Error;

use crate::tensor::{DataType, TensorDesc};

pub type Result<T> = std::result::Result<T, StagingError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::HostToDevice => write!(f, "host -> device"),
            TransferDirection::DeviceToHost => write!(f, "device -> host"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StagingError {
    #[error(
        "Device allocation of {requested} bytes failed: {in_use} of {capacity} bytes already in use"
    )]
    Allocation {
        requested: u64,
        in_use: u64,
        capacity: u64,
    },

    #[error("Transfer of {bytes} bytes ({direction}) failed: {reason}")]
    Transfer {
        direction: TransferDirection,
        bytes: usize,
        reason: String,
    },

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Dtype mismatch: expected {expected}, found {found}")]
    DtypeMismatch { expected: DataType, found: DataType },

    #[error("Use of freed device buffer {desc}")]
    UseAfterFree { desc: TensorDesc },

    #[error("Device buffer {desc} freed twice")]
    DoubleFree { desc: TensorDesc },

    #[error("Invalid shape {0:?}: dimensions must be non-empty, positive and address at most isize::MAX bytes")]
    InvalidShape(Vec<usize>),

    #[error("Expected {expected} bytes for {desc}, got {found}")]
    ByteLength {
        desc: TensorDesc,
        expected: usize,
        found: usize,
    },

    #[error("Function '{name}' takes {expected} operands, got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid elementwise function: {0}")]
    InvalidFunction(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Device buffer belongs to a different device context")]
    ContextMismatch,

    #[error("Device context has been shut down")]
    ContextShutdown,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[cfg(feature = "vulkan")]
    #[error("Vulkan error: {0}")]
    Vulkan(String),
}

impl StagingError {
    /// Allocation and transfer failures can succeed on a later attempt; everything else is
    /// a programmer or lifecycle error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StagingError::Allocation { .. } | StagingError::Transfer { .. }
        )
    }
}

#[cfg(feature = "vulkan")]
impl From<vulkanalia::vk::Result> for StagingError {
    fn from(r: vulkanalia::vk::Result) -> Self {
        StagingError::Vulkan(format!("vk::Result: {:?}", r))
    }
}

#[cfg(feature = "vulkan")]
impl From<vulkanalia::vk::ErrorCode> for StagingError {
    fn from(c: vulkanalia::vk::ErrorCode) -> Self {
        StagingError::Vulkan(format!("vk::ErrorCode: {:?}", c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        let alloc = StagingError::Allocation {
            requested: 8,
            in_use: 0,
            capacity: 4,
        };
        assert!(alloc.is_recoverable());

        let shape = StagingError::ShapeMismatch {
            expected: vec![2],
            found: vec![3],
        };
        assert!(!shape.is_recoverable());
    }

    #[test]
    fn messages_carry_context() {
        let err = StagingError::Transfer {
            direction: TransferDirection::DeviceToHost,
            bytes: 400,
            reason: "device unavailable".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("400 bytes"));
        assert!(msg.contains("device -> host"));
    }
}
