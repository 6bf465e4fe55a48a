//! VM error types

use thiserror::Error;

/// VM execution errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Type error (e.g., calling non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (undefined variable)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Range error (e.g., button position out of range)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Internal error
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Stack overflow
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Unit pointers are not valid at the address the bytes reside at
    #[error("bytecode relocated for {expected:#x}, resident at {found:#x}")]
    RelocationMismatch {
        /// Data section address recorded in the header
        expected: u64,
        /// Actual data section address
        found: u64,
    },

    /// Bytecode error
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] freebutton_bytecode::BytecodeError),

    /// Error raised by a host extension
    #[error("Error: {0}")]
    Host(String),
}

impl VmError {
    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError(message.into())
    }

    /// Create a reference error
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::ReferenceError(message.into())
    }

    /// Create a range error
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::RangeError(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Create a host error
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;
