//! Executable units
//!
//! An [`ExecutableUnit`] wraps container bytes whose pointers are already valid
//! at the address the bytes reside at. The bytes are either a resident mapping
//! (zero-copy, e.g. straight from flash) or a privately owned relocated copy.
//! Function blocks are decoded lazily and cached by offset.

use std::fmt;
use std::sync::Arc;

use freebutton_bytecode::{
    BlockTag, BytecodeError, BytecodeHeader, ContainerView, Instruction, PointerWidth,
    RelocationSummary, RomTable, SlotTarget, image, instruction, relocate_container_in_place,
    validate_rom_indices,
};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::atoms::AtomTable;
use crate::error::{VmError, VmResult};

/// Bytes that stay at a fixed address for as long as they are referenced
pub trait ResidentBytes: Send + Sync + fmt::Debug {
    /// The resident container bytes
    fn bytes(&self) -> &[u8];
}

/// Storage backing a unit
#[derive(Debug)]
pub enum UnitBuffer {
    /// Shared resident mapping, executed in place
    Resident(Arc<dyn ResidentBytes>),
    /// Private relocated copy
    Owned(Box<[u8]>),
}

impl UnitBuffer {
    /// Container bytes
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Resident(resident) => resident.bytes(),
            Self::Owned(bytes) => bytes,
        }
    }

    /// Whether the unit executes from a shared mapping
    pub fn is_resident(&self) -> bool {
        matches!(self, Self::Resident(_))
    }
}

/// Decoded Function block
#[derive(Debug)]
pub struct FunctionInfo {
    /// Declared parameter count
    pub arg_count: u8,
    /// Registers used by the body
    pub register_count: u8,
    /// Local variable slots
    pub local_count: u8,
    /// Function name, if any
    pub name: Option<Arc<str>>,
    /// Decoded body
    pub code: Vec<Instruction>,
    /// Data section offsets of nested Function blocks
    pub children: Vec<u64>,
}

/// A loaded, validated unit ready to run
pub struct ExecutableUnit {
    buffer: UnitBuffer,
    header: BytecodeHeader,
    rom_table: RomTable,
    data_offset: usize,
    atoms: Arc<AtomTable>,
    strings: Vec<Arc<str>>,
    functions: RwLock<FxHashMap<u64, Arc<FunctionInfo>>>,
}

impl fmt::Debug for ExecutableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableUnit")
            .field("header", &self.header)
            .field("resident", &self.buffer.is_resident())
            .field("strings", &self.strings.len())
            .finish_non_exhaustive()
    }
}

/// Validate `buffer` and wrap it as an executable unit.
///
/// The header's `base_addr` must equal the address the data section resides at,
/// every ROM index must be known to `atoms`, and the block layout must be sound.
pub fn load_bytecode(buffer: UnitBuffer, atoms: Arc<AtomTable>) -> VmResult<Arc<ExecutableUnit>> {
    let bytes = buffer.bytes();
    let view = ContainerView::parse(bytes)?;
    let header = view.header;
    let data_offset = view.data_offset();

    let found = (bytes.as_ptr() as u64)
        .checked_add(data_offset as u64)
        .ok_or(BytecodeError::width("data base address", bytes.as_ptr() as u64, 64))?;
    if header.base_addr != found {
        return Err(VmError::RelocationMismatch {
            expected: header.base_addr,
            found,
        });
    }

    validate_rom_indices(&view.rom_table, atoms.as_ref())?;
    let layout = image::scan(view.data, header.width, header.base_addr, &view.rom_table)?;
    layout.expect_block(header.entry_offset, BlockTag::Function)?;
    let pool = *layout.expect_block(header.string_pool_offset, BlockTag::StringPool)?;

    let w = header.width.bytes() as u64;
    let mut strings = Vec::with_capacity(pool.payload as usize);
    for i in 0..u64::from(pool.payload) {
        let slot_offset = pool.offset + (1 + i) * w;
        let slot = layout
            .slot_at(slot_offset)
            .ok_or_else(|| BytecodeError::inconsistency(slot_offset, "missing string pool slot"))?;
        let text: Arc<str> = match slot.target {
            SlotTarget::Block(target) => {
                let raw = image::block_bytes(view.data, header.width, target, BlockTag::String)?;
                let text = std::str::from_utf8(raw)
                    .map_err(|_| BytecodeError::inconsistency(target, "string is not UTF-8"))?;
                Arc::from(text)
            }
            SlotTarget::Rom(index) => {
                let name = atoms.name(index).ok_or(BytecodeError::RomResolution {
                    index,
                    available: atoms.len(),
                })?;
                // Either the stored marker or the live address of that atom
                let word = header.width.read_word(view.data, slot_offset)?;
                if word != u64::from(index) && atoms.index_of_address(word) != Some(index) {
                    return Err(BytecodeError::inconsistency(
                        slot_offset,
                        format!("ROM slot does not point at atom {index}"),
                    )
                    .into());
                }
                Arc::from(name)
            }
        };
        strings.push(text);
    }

    tracing::debug!(
        base_addr = header.base_addr,
        resident = buffer.is_resident(),
        strings = strings.len(),
        rom_atoms = view.rom_table.len(),
        "loaded bytecode unit"
    );

    let rom_table = view.rom_table;
    Ok(Arc::new(ExecutableUnit {
        buffer,
        header,
        rom_table,
        data_offset,
        atoms,
        strings,
        functions: RwLock::new(FxHashMap::default()),
    }))
}

/// Copy `bytes` into a private buffer, relocate it there and load it
pub fn load_relocated(
    bytes: &[u8],
    atoms: Arc<AtomTable>,
) -> VmResult<(Arc<ExecutableUnit>, RelocationSummary)> {
    let mut copy: Box<[u8]> = bytes.into();
    let addr = copy.as_ptr() as u64;
    let summary = relocate_container_in_place(&mut copy, addr, atoms.as_ref())?;
    let unit = load_bytecode(UnitBuffer::Owned(copy), atoms)?;
    Ok((unit, summary))
}

impl ExecutableUnit {
    /// Container header
    pub fn header(&self) -> &BytecodeHeader {
        &self.header
    }

    /// ROM translation table
    pub fn rom_table(&self) -> &RomTable {
        &self.rom_table
    }

    /// Backing storage
    pub fn buffer(&self) -> &UnitBuffer {
        &self.buffer
    }

    /// Whether the unit runs from a shared mapping
    pub fn is_resident(&self) -> bool {
        self.buffer.is_resident()
    }

    /// Atom table the unit was validated against
    pub fn atoms(&self) -> &Arc<AtomTable> {
        &self.atoms
    }

    /// Offset of the top-level function
    pub fn entry_offset(&self) -> u64 {
        self.header.entry_offset
    }

    /// Resolved string pool
    pub fn strings(&self) -> &[Arc<str>] {
        &self.strings
    }

    /// String pool entry `index`
    pub fn string(&self, index: u32) -> VmResult<&Arc<str>> {
        self.strings
            .get(index as usize)
            .ok_or_else(|| VmError::internal(format!("string atom {index} out of range")))
    }

    fn data(&self) -> &[u8] {
        let end = self.data_offset + self.header.data_len as usize;
        &self.buffer.bytes()[self.data_offset..end]
    }

    fn width(&self) -> PointerWidth {
        self.header.width
    }

    fn target_of(&self, slot: u64) -> VmResult<u64> {
        let ptr = self.width().read_word(self.data(), slot)?;
        ptr.checked_sub(self.header.base_addr)
            .ok_or_else(|| BytecodeError::inconsistency(slot, "pointer below base address").into())
    }

    /// Decode (or fetch the cached) Function block at `offset`
    pub fn function(&self, offset: u64) -> VmResult<Arc<FunctionInfo>> {
        if let Some(info) = self.functions.read().get(&offset) {
            return Ok(Arc::clone(info));
        }

        let data = self.data();
        let record = image::read_function(data, self.width(), offset)?;
        let code_offset = self.target_of(record.code_slot)?;
        let code = instruction::decode_all(image::block_bytes(
            data,
            self.width(),
            code_offset,
            BlockTag::Code,
        )?)?;
        let children = record
            .child_slots
            .iter()
            .map(|&slot| self.target_of(slot))
            .collect::<VmResult<Vec<_>>>()?;
        let name = match record.name_atom {
            Some(atom) => Some(Arc::clone(self.string(atom)?)),
            None => None,
        };

        let info = Arc::new(FunctionInfo {
            arg_count: record.arg_count,
            register_count: record.register_count,
            local_count: record.local_count,
            name,
            code,
            children,
        });
        self.functions.write().insert(offset, Arc::clone(&info));
        Ok(info)
    }

    /// Name of the function at `offset`, if it has one
    pub fn function_name(&self, offset: u64) -> Option<Arc<str>> {
        self.function(offset).ok().and_then(|info| info.name.clone())
    }
}
