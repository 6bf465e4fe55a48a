//! Compilation errors

use freebutton_bytecode::BytecodeError;
use thiserror::Error;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Syntax error
    #[error("Syntax error at {location}: {message}")]
    Syntax {
        /// Error message
        message: String,
        /// Source location
        location: String,
    },

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal compiler error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Too many locals
    #[error("Too many local variables (max 255)")]
    TooManyLocals,

    /// Too many registers
    #[error("Expression too complex (max 255 registers)")]
    TooManyRegisters,

    /// Too many functions
    #[error("Too many nested functions")]
    TooManyFunctions,

    /// Invalid assignment target
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,

    /// The finished image could not be laid out
    #[error("Image error: {0}")]
    Image(#[from] BytecodeError),
}

impl CompileError {
    /// Create a syntax error
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Syntax {
            message: message.into(),
            location: format!("{}:{}", line, column),
        }
    }

    /// Create an unsupported error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported(feature.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
