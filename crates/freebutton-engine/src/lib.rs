//! # FreeButton Engine
//!
//! Storage-side half of the FreeButton script runtime: flash partitions, the
//! bytecode registry, the mapped-file loader with CRC-32 integrity checks, the
//! compile driver, the uploader and an [`Engine`] facade tying them to a
//! [`freebutton_vm::Runtime`].
//!
//! ## Loading
//!
//! - [`Loader::load_by_name`]: registry lookup, map, checksum, sniff, then run in
//!   place (pre-relocated uploads) or relocate a private copy
//! - [`Loader::load_from_flat_buffer`]: container bytes or raw source from memory
//! - [`Loader::load_mapped`]: an unregistered partition range, always copied
//!
//! Failures carry a stable [`LoadReason`] so callers can tell a re-upload from a
//! firmware mismatch.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod checksum;
pub mod compile;
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod registry;
pub mod storage;
pub mod upload;

pub use checksum::crc32;
pub use compile::{CompileOptions, DEFAULT_MAX_BYTECODE_SIZE, compile_to_container};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{
    ConfigError, EngineError, EngineResult, LoadError, LoadReason, LoadResult, RegistryError,
    StorageError, UploadError,
};
pub use loader::{LoadReport, LoadState, LoadedUnit, Loader};
pub use registry::{BytecodeEntry, MAX_NAME_LEN, Registry};
pub use storage::{FilePartition, FlashPartition, MappedFile, MemoryPartition};
pub use upload::{UPLOAD_ALIGN, Uploader};
