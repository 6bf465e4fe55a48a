//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while encoding, decoding or relocating a container
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    /// A value does not fit the field it must be stored in
    #[error("{what} {value:#x} does not fit in {bits} bits")]
    WidthConversion {
        /// Which field overflowed
        what: &'static str,
        /// The value that did not fit
        value: u64,
        /// Width of the target field
        bits: u32,
    },

    /// The tag walk disagrees with the recorded layout
    #[error("Traversal inconsistency at data offset {offset:#x}: {reason}")]
    TraversalInconsistency {
        /// Data section offset where the walk failed
        offset: u64,
        /// What disagreed
        reason: String,
    },

    /// A ROM atom index is out of range for the resolving atom table
    #[error("ROM atom index {index} out of range (atom table has {available} entries)")]
    RomResolution {
        /// Index recorded in the container
        index: u16,
        /// Number of atoms the resolver knows
        available: usize,
    },

    /// Bytes are not a recognized container
    #[error("Invalid container: {0}")]
    Format(String),

    /// Unexpected end of bytecode
    #[error("Unexpected end of bytecode")]
    UnexpectedEnd,

    /// Invalid opcode
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
}

impl BytecodeError {
    /// Create a traversal inconsistency error
    pub fn inconsistency(offset: u64, reason: impl Into<String>) -> Self {
        Self::TraversalInconsistency {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a width conversion error
    pub fn width(what: &'static str, value: u64, bits: u32) -> Self {
        Self::WidthConversion { what, value, bits }
    }

    /// Create a format error
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
