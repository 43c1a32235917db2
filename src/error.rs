//! Error types for rayo operations

use thiserror::Error;

use crate::shape::ShapeSignature;

/// Result type for rayo operations
pub type Result<T> = std::result::Result<T, RayoError>;

/// Errors that can occur while validating, tuning or launching a kernel
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RayoError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Size mismatch between operands
    #[error("Size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Operand being checked
        what: &'static str,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Dtype or group-mode combination the kernels cannot execute
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    /// Every pruned candidate failed (or none survived pruning)
    #[error("No viable kernel configuration for {signature}")]
    NoViableConfig {
        /// Shape signature that was being tuned
        signature: ShapeSignature,
    },

    /// Kernel launch error
    #[error("Kernel launch failed: {0}")]
    LaunchFailed(String),
}
