//! Source to stored container

use freebutton_bytecode::{SymbolTable, prepare, prepare_narrow, relocate_for_storage_with_summary};
use freebutton_compiler::Compiler;
use freebutton_vm::AtomTable;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult};

/// Largest container the compile driver emits by default
pub const DEFAULT_MAX_BYTECODE_SIZE: usize = 1024 * 1024;

/// How source is turned into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// File name used in diagnostics
    pub filename: String,
    /// Emit a 32-bit container
    pub narrow: bool,
    /// Data section address to relocate for, 0 for position independent
    pub target_base: u64,
    /// Move well-known names into the ROM table
    pub externalize: bool,
    /// Reject containers larger than this
    pub max_bytecode_size: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            filename: "script.js".to_string(),
            narrow: false,
            target_base: 0,
            externalize: true,
            max_bytecode_size: DEFAULT_MAX_BYTECODE_SIZE,
        }
    }
}

/// Compile `source` into container bytes ready to store.
///
/// Well-known names are looked up in `atoms` when externalizing.
pub fn compile_to_container(
    source: &str,
    options: &CompileOptions,
    atoms: &AtomTable,
) -> LoadResult<Vec<u8>> {
    let unit = Compiler::new().compile(source, &options.filename)?;
    let container = if options.narrow {
        prepare_narrow(&unit)?
    } else {
        prepare(&unit)?
    };

    let symbols: Option<&dyn SymbolTable> = options.externalize.then_some(atoms as &dyn SymbolTable);
    let (stored, summary) =
        relocate_for_storage_with_summary(&container, options.target_base, symbols)?;
    let bytes = stored.to_bytes()?;

    if bytes.len() > options.max_bytecode_size {
        return Err(LoadError::TooLarge {
            size: bytes.len(),
            limit: options.max_bytecode_size,
        });
    }

    tracing::debug!(
        filename = %options.filename,
        size = bytes.len(),
        width = stored.header.width.bytes(),
        rom_atoms = stored.rom_table.len(),
        dropped_strings = summary.dropped_blocks,
        "compiled container"
    );
    Ok(bytes)
}
