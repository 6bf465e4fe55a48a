//! Error types for freebutton-engine

use freebutton_bytecode::BytecodeError;
use freebutton_compiler::CompileError;
use freebutton_vm::VmError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flash partition errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Range does not lie inside the partition
    #[error("range {offset:#x}+{len} outside partition '{label}' of {size} bytes")]
    OutOfRange {
        /// Partition label
        label: String,
        /// Requested offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Partition size
        size: usize,
    },

    /// The partition is mapped for execution and cannot be programmed
    #[error("partition '{0}' is mapped by a running unit")]
    Busy(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bytecode registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Empty script name
    #[error("script name is empty")]
    EmptyName,

    /// Name does not fit the on-flash record
    #[error("script name '{name}' is {len} bytes, limit is {limit}")]
    NameTooLong {
        /// Offending name
        name: String,
        /// Its length in bytes
        len: usize,
        /// Longest accepted name
        limit: usize,
    },

    /// Persisted registry could not be encoded or decoded
    #[error("registry JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable reason code for a failed load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadReason {
    /// No active registry entry under that name
    NotFound,
    /// The partition could not be read or mapped
    Storage,
    /// Stored bytes do not match their checksum
    Integrity,
    /// Neither a container nor script source
    Format,
    /// The container references atoms this firmware does not have
    FirmwareMismatch,
    /// Pointers could not be rewritten for the resident address
    Relocation,
    /// Source failed to compile
    Compile,
    /// The unit raised an error while running
    Execution,
    /// Compiled output exceeds the configured limit
    TooLarge,
    /// An address or offset does not fit the container's pointer width
    WidthConversion,
    /// The codec disagreed with itself; a bug, not a property of the asset
    InternalDefect,
}

impl LoadReason {
    /// Stable string form, as serialized
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Storage => "storage",
            Self::Integrity => "integrity",
            Self::Format => "format",
            Self::FirmwareMismatch => "firmware_mismatch",
            Self::Relocation => "relocation",
            Self::Compile => "compile",
            Self::Execution => "execution",
            Self::TooLarge => "too_large",
            Self::WidthConversion => "width_conversion",
            Self::InternalDefect => "internal_defect",
        }
    }

    /// The stored asset is unusable as is and has to be uploaded again
    pub fn is_reupload_required(self) -> bool {
        matches!(
            self,
            Self::Integrity | Self::Format | Self::Relocation | Self::FirmwareMismatch
        )
    }

    /// The stored bytes were damaged or only partially written
    pub fn is_corruption(self) -> bool {
        matches!(self, Self::Integrity | Self::Format)
    }

    /// The asset was built against a different engine; recompile before re-uploading
    pub fn is_firmware_mismatch(self) -> bool {
        matches!(self, Self::FirmwareMismatch)
    }
}

impl std::fmt::Display for LoadReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from compiling, loading or running a unit
#[derive(Debug, Error)]
pub enum LoadError {
    /// No active registry entry
    #[error("bytecode '{0}' not found")]
    NotFound(String),

    /// Partition access failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Checksum mismatch
    #[error("checksum mismatch for bytecode '{name}': calculated {calculated:#010x} != stored {stored:#010x}")]
    Integrity {
        /// Script name
        name: String,
        /// CRC-32 over the mapped bytes
        calculated: u32,
        /// CRC-32 recorded at upload
        stored: u32,
    },

    /// Not a container and not source
    #[error("invalid bytecode format: {0}")]
    Format(String),

    /// ROM index outside the current atom table
    #[error("ROM atom index {index} out of range (atom table has {available} entries)")]
    RomResolution {
        /// Index recorded in the container
        index: u16,
        /// Atoms known to this firmware
        available: usize,
    },

    /// Relocation failed
    #[error("bytecode relocation failed: {0}")]
    Relocation(String),

    /// Compilation failed; the compiler's message is kept verbatim
    #[error("{0}")]
    Compile(#[from] CompileError),

    /// Execution error
    #[error("{0}")]
    Vm(VmError),

    /// Compiled output too large
    #[error("bytecode is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Produced size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// A value does not fit the container's pointer width; shrink the
    /// program or build a native-width container
    #[error("pointer width exceeded: {0}")]
    WidthConversion(#[source] BytecodeError),

    /// The tag walk disagreed with the recorded layout
    #[error("internal bytecode defect: {0}")]
    Inconsistency(#[source] BytecodeError),
}

impl LoadError {
    /// Stable reason code
    pub fn reason(&self) -> LoadReason {
        match self {
            Self::NotFound(_) => LoadReason::NotFound,
            Self::Storage(_) => LoadReason::Storage,
            Self::Integrity { .. } => LoadReason::Integrity,
            Self::Format(_) => LoadReason::Format,
            Self::RomResolution { .. } => LoadReason::FirmwareMismatch,
            Self::Relocation(_) => LoadReason::Relocation,
            Self::Compile(_) => LoadReason::Compile,
            Self::Vm(_) => LoadReason::Execution,
            Self::TooLarge { .. } => LoadReason::TooLarge,
            Self::WidthConversion(_) => LoadReason::WidthConversion,
            Self::Inconsistency(_) => LoadReason::InternalDefect,
        }
    }
}

impl From<BytecodeError> for LoadError {
    fn from(err: BytecodeError) -> Self {
        match err {
            BytecodeError::RomResolution { index, available } => {
                Self::RomResolution { index, available }
            }
            BytecodeError::Format(message) => Self::Format(message),
            BytecodeError::UnexpectedEnd | BytecodeError::InvalidOpcode(_) => {
                Self::Format(err.to_string())
            }
            BytecodeError::WidthConversion { .. } => Self::WidthConversion(err),
            BytecodeError::TraversalInconsistency { .. } => Self::Inconsistency(err),
        }
    }
}

impl From<VmError> for LoadError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::Bytecode(inner) => inner.into(),
            VmError::RelocationMismatch { .. } => Self::Relocation(err.to_string()),
            other => Self::Vm(other),
        }
    }
}

/// Result type using LoadError
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors from installing a container into the user partition
#[derive(Debug, Error)]
pub enum UploadError {
    /// Bytes are not a container
    #[error("invalid bytecode: {0}")]
    Format(#[from] BytecodeError),

    /// Not enough room left in the partition
    #[error("partition full: {needed} bytes needed at {offset:#x}, partition holds {size}")]
    Full {
        /// Offset the container would start at
        offset: usize,
        /// Container size
        needed: usize,
        /// Partition size
        size: usize,
    },

    /// Offset or size does not fit the registry's 32-bit fields
    #[error("container of {size} bytes at {offset:#x} is beyond the 4 GiB registry range")]
    OutOfRegistryRange {
        /// Offset the container would start at
        offset: u64,
        /// Container size
        size: usize,
    },

    /// Programming the partition failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Registering the entry failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid TOML
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Unreadable file
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine facade error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Compile, load or run failure
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Install failure
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Registry persistence failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytecode_errors_map_to_reasons() {
        let err: LoadError = BytecodeError::RomResolution {
            index: 50,
            available: 44,
        }
        .into();
        assert_eq!(err.reason(), LoadReason::FirmwareMismatch);

        let err: LoadError = BytecodeError::format("bad magic").into();
        assert_eq!(err.reason(), LoadReason::Format);

        let err: LoadError = BytecodeError::width("base address", 1 << 40, 32).into();
        assert!(matches!(err, LoadError::WidthConversion(BytecodeError::WidthConversion { bits: 32, .. })));
        assert_eq!(err.reason(), LoadReason::WidthConversion);
        assert_eq!(err.reason().as_str(), "width_conversion");
        assert!(std::error::Error::source(&err).is_some());

        let err: LoadError = BytecodeError::inconsistency(0x18, "slot visited twice").into();
        assert!(matches!(err, LoadError::Inconsistency(_)));
        assert_eq!(err.reason(), LoadReason::InternalDefect);
        assert_eq!(err.reason().as_str(), "internal_defect");

        let err: LoadError = BytecodeError::InvalidOpcode(0xEE).into();
        assert_eq!(err.reason(), LoadReason::Format);
    }

    #[test]
    fn test_vm_errors_map_to_reasons() {
        let err: LoadError = VmError::Bytecode(BytecodeError::UnexpectedEnd).into();
        assert_eq!(err.reason(), LoadReason::Format);

        let err: LoadError = VmError::RelocationMismatch {
            expected: 0x100,
            found: 0x200,
        }
        .into();
        assert_eq!(err.reason(), LoadReason::Relocation);

        let err: LoadError = VmError::type_error("x is not a function").into();
        assert_eq!(err.reason(), LoadReason::Execution);
        assert_eq!(err.to_string(), "TypeError: x is not a function");
    }

    #[test]
    fn test_reason_classes() {
        assert!(LoadReason::Integrity.is_reupload_required());
        assert!(LoadReason::Integrity.is_corruption());
        assert!(!LoadReason::Integrity.is_firmware_mismatch());
        assert!(LoadReason::FirmwareMismatch.is_reupload_required());
        assert!(!LoadReason::FirmwareMismatch.is_corruption());
        assert!(!LoadReason::NotFound.is_reupload_required());
        assert!(!LoadReason::Execution.is_reupload_required());
        assert!(!LoadReason::WidthConversion.is_reupload_required());
        assert!(!LoadReason::WidthConversion.is_corruption());
        assert!(!LoadReason::InternalDefect.is_reupload_required());
        assert!(!LoadReason::InternalDefect.is_corruption());
        assert_eq!(LoadReason::TooLarge.to_string(), "too_large");
    }
}
