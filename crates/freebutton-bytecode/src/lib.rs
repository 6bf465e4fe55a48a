//! # FreeButton Bytecode
//!
//! Relocatable bytecode containers for the FreeButton script runtime.
//!
//! A container is a header, an optional ROM atom table and a data section of
//! tagged blocks. Pointer slots in the data section are either offsets
//! (`base_addr == 0`) or absolute addresses valid at `base_addr`, so a
//! container can run straight from flash once it sits at the address it was
//! relocated for.
//!
//! ## Design Principles
//!
//! - **Tag-driven**: pointer slots are found by walking block tags, never by guessing
//! - **All or nothing**: relocation computes every value before writing any
//! - **Width-checked**: 32-bit containers reject anything that does not fit

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod header;
pub mod image;
pub mod instruction;
pub mod operand;
pub mod relocate;
pub mod rom;
pub mod width;

pub use codec::{Container, ContainerView, is_container, prepare, prepare_narrow};
pub use error::{BytecodeError, Result};
pub use header::{BytecodeHeader, BytecodeVersion, MAGIC};
pub use image::{
    BlockId, BlockInfo, BlockTag, CompiledUnit, FunctionBlock, FunctionRecord, ImageBuilder, Layout,
    NO_NAME, SlotDescriptor, SlotKind, SlotTarget,
};
pub use instruction::{Instruction, Opcode};
pub use operand::{AtomIndex, FunctionIndex, JumpOffset, LocalIndex, Register};
pub use relocate::{
    RelocationSummary, relocate_container_in_place, relocate_for_load, relocate_for_storage,
    relocate_for_storage_with_summary, validate_rom_indices,
};
pub use rom::{ROM_ENTRY_SIZE, RomAtomEntry, RomResolver, RomTable, SymbolTable};
pub use width::PointerWidth;
