//! Data section image
//!
//! A data section is a sequence of word-aligned blocks. Each block starts with
//! a header word: bits 0-7 hold the tag, bits 8-31 a tag-specific payload.
//!
//! | Tag | Block      | Payload                          | Body after the header word                  |
//! |-----|------------|----------------------------------|---------------------------------------------|
//! | 1   | String     | byte length                      | UTF-8 bytes, zero padded                    |
//! | 2   | Code       | byte length                      | encoded instructions, zero padded           |
//! | 3   | Function   | `argc \| regs << 8 \| locals << 16` | `name_atom`, `code_ptr`, `child_count`, `child_ptr * n` |
//! | 4   | StringPool | entry count                      | `string_ptr * n`                            |
//!
//! Pointer slots are discovered from the tags alone, never by inspecting values.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::rom::RomTable;
use crate::width::PointerWidth;

/// `name_atom` value of an anonymous function
pub const NO_NAME: u32 = u32::MAX;

/// Largest payload a block header can carry
pub const MAX_PAYLOAD: u32 = 0x00FF_FFFF;

/// Block tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockTag {
    /// String bytes
    String = 0x01,
    /// Encoded instructions
    Code = 0x02,
    /// Function record
    Function = 0x03,
    /// Table of string pointers
    StringPool = 0x04,
}

impl BlockTag {
    /// Decode a tag byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::String),
            0x02 => Some(Self::Code),
            0x03 => Some(Self::Function),
            0x04 => Some(Self::StringPool),
            _ => None,
        }
    }
}

/// What a pointer slot refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// `code_ptr` of a function
    Code,
    /// String pool entry
    String,
    /// Child function of a function
    NestedUnit,
}

impl SlotKind {
    /// Tag of the block a slot of this kind must point at
    pub const fn target_tag(self) -> BlockTag {
        match self {
            Self::Code => BlockTag::Code,
            Self::String => BlockTag::String,
            Self::NestedUnit => BlockTag::Function,
        }
    }
}

/// `(offset, kind)` of one pointer slot, as recorded by the producer of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotDescriptor {
    /// Data section offset of the slot
    pub offset: u64,
    /// What the slot refers to
    pub kind: SlotKind,
}

/// Where a slot currently points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTarget {
    /// Offset of a block in the same data section
    Block(u64),
    /// Entry of the well-known atom table
    Rom(u16),
}

/// A slot found by [`scan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedSlot {
    /// Data section offset of the slot
    pub offset: u64,
    /// What the slot refers to
    pub kind: SlotKind,
    /// Offset of the block containing the slot
    pub block: u64,
    /// Resolved target
    pub target: SlotTarget,
}

/// A block found by [`scan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the header word
    pub offset: u64,
    /// Total size including header and padding
    pub len: u64,
    /// Block tag
    pub tag: BlockTag,
    /// Header payload
    pub payload: u32,
}

/// Result of walking a data section
#[derive(Debug, Clone, Default)]
pub struct Layout {
    blocks: Vec<BlockInfo>,
    slots: Vec<ScannedSlot>,
    block_index: FxHashMap<u64, usize>,
    slot_index: FxHashMap<u64, usize>,
}

impl Layout {
    /// Blocks in data section order
    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    /// Slots in ascending offset order
    pub fn slots(&self) -> &[ScannedSlot] {
        &self.slots
    }

    /// Block starting at `offset`
    pub fn block_at(&self, offset: u64) -> Option<&BlockInfo> {
        self.block_index.get(&offset).map(|&i| &self.blocks[i])
    }

    /// Slot at `offset`
    pub fn slot_at(&self, offset: u64) -> Option<&ScannedSlot> {
        self.slot_index.get(&offset).map(|&i| &self.slots[i])
    }

    /// Block starting at `offset`, which must carry `tag`
    pub fn expect_block(&self, offset: u64, tag: BlockTag) -> Result<&BlockInfo> {
        match self.block_at(offset) {
            Some(block) if block.tag == tag => Ok(block),
            Some(block) => Err(BytecodeError::inconsistency(
                offset,
                format!("expected {tag:?} block, found {:?}", block.tag),
            )),
            None => Err(BytecodeError::inconsistency(
                offset,
                format!("expected {tag:?} block, offset is not a block start"),
            )),
        }
    }
}

fn word_at(data: &[u8], width: PointerWidth, offset: u64) -> Result<u64> {
    width
        .read_word(data, offset)
        .map_err(|_| BytecodeError::inconsistency(offset, "truncated word"))
}

fn block_size(width: PointerWidth, body_words: u64) -> Option<u64> {
    body_words
        .checked_add(1)?
        .checked_mul(width.bytes() as u64)
}

/// Walk every block of `data` and resolve every pointer slot.
///
/// Pointers are read relative to `base`. Slots listed in `rom` hold atom
/// markers or live atom addresses and are reported as [`SlotTarget::Rom`]
/// without inspecting their value.
pub fn scan(data: &[u8], width: PointerWidth, base: u64, rom: &RomTable) -> Result<Layout> {
    let w = width.bytes() as u64;
    let len = data.len() as u64;
    let mut layout = Layout::default();
    let mut raw_slots: Vec<(u64, SlotKind, u64)> = Vec::new();
    let mut seen: FxHashSet<u64> = FxHashSet::default();

    let mut offset = 0u64;
    while offset < len {
        let header = word_at(data, width, offset)?;
        if header >> 32 != 0 {
            return Err(BytecodeError::inconsistency(offset, "block header has upper bits set"));
        }
        let tag_byte = (header & 0xFF) as u8;
        let payload = ((header >> 8) as u32) & MAX_PAYLOAD;
        let tag = BlockTag::from_byte(tag_byte).ok_or_else(|| {
            BytecodeError::inconsistency(offset, format!("unknown block tag {tag_byte:#04x}"))
        })?;

        let block_len = match tag {
            BlockTag::String | BlockTag::Code => Some(w + width.align_up(u64::from(payload))),
            BlockTag::Function => {
                let count = word_at(data, width, offset + 3 * w)?;
                let size = count.checked_add(3).and_then(|words| block_size(width, words));
                if let Some(size) = size.filter(|&size| offset.saturating_add(size) <= len) {
                    raw_slots.push((offset + 2 * w, SlotKind::Code, offset));
                    for i in 0..count {
                        raw_slots.push((offset + (4 + i) * w, SlotKind::NestedUnit, offset));
                    }
                    Some(size)
                } else {
                    size
                }
            }
            BlockTag::StringPool => {
                let size = block_size(width, u64::from(payload));
                if size.is_some_and(|size| offset.saturating_add(size) <= len) {
                    for i in 0..u64::from(payload) {
                        raw_slots.push((offset + (1 + i) * w, SlotKind::String, offset));
                    }
                }
                size
            }
        };

        let block_len = block_len
            .filter(|&size| offset.saturating_add(size) <= len)
            .ok_or_else(|| {
                BytecodeError::inconsistency(
                    offset,
                    format!("{tag:?} block overruns the {len}-byte data section"),
                )
            })?;

        layout.block_index.insert(offset, layout.blocks.len());
        layout.blocks.push(BlockInfo {
            offset,
            len: block_len,
            tag,
            payload,
        });
        offset += block_len;
    }

    for entry in rom.entries() {
        let at = u64::from(entry.bytecode_offset);
        if !raw_slots
            .iter()
            .any(|&(slot, kind, _)| slot == at && kind == SlotKind::String)
        {
            return Err(BytecodeError::inconsistency(at, "ROM entry does not name a string slot"));
        }
    }

    for (slot, kind, block) in raw_slots {
        if !seen.insert(slot) {
            return Err(BytecodeError::inconsistency(slot, "slot visited twice"));
        }
        let target = match rom.find(slot) {
            Some(entry) => SlotTarget::Rom(entry.rom_index),
            None => {
                let value = word_at(data, width, slot)?;
                let target = value.checked_sub(base).ok_or_else(|| {
                    BytecodeError::inconsistency(
                        slot,
                        format!("pointer {value:#x} lies below base {base:#x}"),
                    )
                })?;
                let expected = kind.target_tag();
                match layout.block_at(target) {
                    Some(info) if info.tag == expected => {}
                    _ => {
                        return Err(BytecodeError::inconsistency(
                            slot,
                            format!("{kind:?} slot does not point at a {expected:?} block (target {target:#x})"),
                        ));
                    }
                }
                SlotTarget::Block(target)
            }
        };
        layout.slot_index.insert(slot, layout.slots.len());
        layout.slots.push(ScannedSlot {
            offset: slot,
            kind,
            block,
            target,
        });
    }

    Ok(layout)
}

/// Body bytes of a String or Code block
pub fn block_bytes(data: &[u8], width: PointerWidth, offset: u64, tag: BlockTag) -> Result<&[u8]> {
    let header = word_at(data, width, offset)?;
    if BlockTag::from_byte((header & 0xFF) as u8) != Some(tag) {
        return Err(BytecodeError::inconsistency(offset, format!("expected {tag:?} block")));
    }
    let len = ((header >> 8) as u32 & MAX_PAYLOAD) as usize;
    let start = offset as usize + width.bytes();
    data.get(start..start + len)
        .ok_or_else(|| BytecodeError::inconsistency(offset, "block body truncated"))
}

/// Decoded fields of a Function block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord {
    /// Declared parameter count
    pub arg_count: u8,
    /// Registers used by the body
    pub register_count: u8,
    /// Local variable slots
    pub local_count: u8,
    /// Name as a string pool index
    pub name_atom: Option<u32>,
    /// Offset of the `code_ptr` slot
    pub code_slot: u64,
    /// Offsets of the child pointer slots
    pub child_slots: Vec<u64>,
}

/// Read the Function block at `offset`
pub fn read_function(data: &[u8], width: PointerWidth, offset: u64) -> Result<FunctionRecord> {
    let w = width.bytes() as u64;
    let header = word_at(data, width, offset)?;
    if BlockTag::from_byte((header & 0xFF) as u8) != Some(BlockTag::Function) {
        return Err(BytecodeError::inconsistency(offset, "expected Function block"));
    }
    let payload = (header >> 8) as u32 & MAX_PAYLOAD;
    let name = word_at(data, width, offset + w)?;
    let count = word_at(data, width, offset + 3 * w)?;
    let name_atom = match name {
        n if n == u64::from(NO_NAME) => None,
        n => Some(u32::try_from(n).map_err(|_| {
            BytecodeError::inconsistency(offset + w, "function name atom out of range")
        })?),
    };
    let available = (data.len() as u64).saturating_sub(offset + 4 * w) / w;
    if count > available {
        return Err(BytecodeError::inconsistency(offset, "function children overrun block"));
    }
    Ok(FunctionRecord {
        arg_count: (payload & 0xFF) as u8,
        register_count: ((payload >> 8) & 0xFF) as u8,
        local_count: ((payload >> 16) & 0xFF) as u8,
        name_atom,
        code_slot: offset + 2 * w,
        child_slots: (0..count).map(|i| offset + (4 + i) * w).collect(),
    })
}

/// Freshly compiled unit: a tagged image plus its slot side table.
///
/// Pointer slots hold absolute addresses valid at [`CompiledUnit::base_addr`].
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    width: PointerWidth,
    memory: Box<[u8]>,
    base_addr: u64,
    entry_offset: u64,
    string_pool_offset: u64,
    slots: Vec<SlotDescriptor>,
}

impl CompiledUnit {
    /// Word width of the image
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    /// Image bytes
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Address the image pointers are expressed against
    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    /// Offset of the top-level function block
    pub fn entry_offset(&self) -> u64 {
        self.entry_offset
    }

    /// Offset of the string pool block
    pub fn string_pool_offset(&self) -> u64 {
        self.string_pool_offset
    }

    /// Pointer slots recorded while building the image, in ascending order
    pub fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
    }
}

/// Handle to a block added to an [`ImageBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) usize);

/// Function block contents
#[derive(Debug, Clone)]
pub struct FunctionBlock {
    /// Declared parameter count
    pub arg_count: u8,
    /// Registers used by the body
    pub register_count: u8,
    /// Local variable slots
    pub local_count: u8,
    /// Name as a string pool index
    pub name_atom: Option<u32>,
    /// Code block of the body
    pub code: BlockId,
    /// Nested functions, addressed by position from `Closure` instructions
    pub children: Vec<BlockId>,
}

#[derive(Debug, Clone)]
enum PendingBlock {
    Bytes { tag: BlockTag, bytes: Vec<u8> },
    Function(FunctionBlock),
    StringPool(Vec<BlockId>),
}

/// Lays out blocks and records pointer fixups
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    width: PointerWidth,
    blocks: Vec<PendingBlock>,
}

impl ImageBuilder {
    /// Create a builder for `width`-sized words
    pub fn new(width: PointerWidth) -> Self {
        Self {
            width,
            blocks: Vec::new(),
        }
    }

    /// Word width
    pub fn width(&self) -> PointerWidth {
        self.width
    }

    fn push(&mut self, block: PendingBlock) -> BlockId {
        self.blocks.push(block);
        BlockId(self.blocks.len() - 1)
    }

    /// Add a String block
    pub fn add_string(&mut self, bytes: impl Into<Vec<u8>>) -> BlockId {
        self.push(PendingBlock::Bytes {
            tag: BlockTag::String,
            bytes: bytes.into(),
        })
    }

    /// Add a Code block
    pub fn add_code(&mut self, bytes: Vec<u8>) -> BlockId {
        self.push(PendingBlock::Bytes {
            tag: BlockTag::Code,
            bytes,
        })
    }

    /// Add a Function block
    pub fn add_function(&mut self, function: FunctionBlock) -> BlockId {
        self.push(PendingBlock::Function(function))
    }

    /// Add the StringPool block
    pub fn add_string_pool(&mut self, entries: Vec<BlockId>) -> BlockId {
        self.push(PendingBlock::StringPool(entries))
    }

    /// Lay the image out in a fresh buffer whose own address becomes the base
    pub fn finish(self, entry: BlockId, pool: BlockId) -> Result<CompiledUnit> {
        let (offsets, total) = self.layout()?;
        let mut memory = vec![0u8; total as usize].into_boxed_slice();
        let base = memory.as_ptr() as u64;
        let slots = self.emit(&mut memory, &offsets, base)?;
        self.into_unit(memory, base, &offsets, entry, pool, slots)
    }

    /// Lay the image out with pointers expressed against `base`
    pub fn finish_at(self, entry: BlockId, pool: BlockId, base: u64) -> Result<CompiledUnit> {
        let (offsets, total) = self.layout()?;
        let mut memory = vec![0u8; total as usize].into_boxed_slice();
        let slots = self.emit(&mut memory, &offsets, base)?;
        self.into_unit(memory, base, &offsets, entry, pool, slots)
    }

    fn into_unit(
        &self,
        memory: Box<[u8]>,
        base: u64,
        offsets: &[u64],
        entry: BlockId,
        pool: BlockId,
        slots: Vec<SlotDescriptor>,
    ) -> Result<CompiledUnit> {
        let entry_offset = self.offset_of(offsets, entry, BlockTag::Function, 0)?;
        let string_pool_offset = self.offset_of(offsets, pool, BlockTag::StringPool, 0)?;
        Ok(CompiledUnit {
            width: self.width,
            memory,
            base_addr: base,
            entry_offset,
            string_pool_offset,
            slots,
        })
    }

    fn tag_of(&self, id: BlockId) -> Option<BlockTag> {
        self.blocks.get(id.0).map(|block| match block {
            PendingBlock::Bytes { tag, .. } => *tag,
            PendingBlock::Function(_) => BlockTag::Function,
            PendingBlock::StringPool(_) => BlockTag::StringPool,
        })
    }

    fn offset_of(&self, offsets: &[u64], id: BlockId, tag: BlockTag, from: u64) -> Result<u64> {
        match self.tag_of(id) {
            Some(found) if found == tag => Ok(offsets[id.0]),
            _ => Err(BytecodeError::inconsistency(
                from,
                format!("reference to block #{} is not a {tag:?} block", id.0),
            )),
        }
    }

    fn layout(&self) -> Result<(Vec<u64>, u64)> {
        let w = self.width.bytes() as u64;
        let mut offsets = Vec::with_capacity(self.blocks.len());
        let mut at = 0u64;
        for block in &self.blocks {
            offsets.push(at);
            let size = match block {
                PendingBlock::Bytes { bytes, .. } => {
                    payload_fits("block length", bytes.len())?;
                    w + self.width.align_up(bytes.len() as u64)
                }
                PendingBlock::Function(f) => (4 + f.children.len() as u64) * w,
                PendingBlock::StringPool(entries) => {
                    payload_fits("string pool size", entries.len())?;
                    (1 + entries.len() as u64) * w
                }
            };
            at += size;
        }
        Ok((offsets, at))
    }

    fn emit(&self, memory: &mut [u8], offsets: &[u64], base: u64) -> Result<Vec<SlotDescriptor>> {
        let width = self.width;
        let w = width.bytes() as u64;
        let mut slots = Vec::new();
        let pointer = |target: u64| {
            base.checked_add(target)
                .ok_or(BytecodeError::width("pointer", target, 64))
        };

        for (block, &at) in self.blocks.iter().zip(offsets) {
            match block {
                PendingBlock::Bytes { tag, bytes } => {
                    let header = *tag as u64 | (bytes.len() as u64) << 8;
                    width.write_word(memory, at, "block header", header)?;
                    let start = (at + w) as usize;
                    memory[start..start + bytes.len()].copy_from_slice(bytes);
                }
                PendingBlock::Function(f) => {
                    let payload = u64::from(f.arg_count)
                        | u64::from(f.register_count) << 8
                        | u64::from(f.local_count) << 16;
                    width.write_word(memory, at, "block header", BlockTag::Function as u64 | payload << 8)?;
                    let name = u64::from(f.name_atom.unwrap_or(NO_NAME));
                    width.write_word(memory, at + w, "name atom", name)?;
                    let code = self.offset_of(offsets, f.code, BlockTag::Code, at)?;
                    width.write_word(memory, at + 2 * w, "code pointer", pointer(code)?)?;
                    slots.push(SlotDescriptor {
                        offset: at + 2 * w,
                        kind: SlotKind::Code,
                    });
                    width.write_word(memory, at + 3 * w, "child count", f.children.len() as u64)?;
                    for (i, &child) in f.children.iter().enumerate() {
                        let slot = at + (4 + i as u64) * w;
                        let target = self.offset_of(offsets, child, BlockTag::Function, at)?;
                        width.write_word(memory, slot, "child pointer", pointer(target)?)?;
                        slots.push(SlotDescriptor {
                            offset: slot,
                            kind: SlotKind::NestedUnit,
                        });
                    }
                }
                PendingBlock::StringPool(entries) => {
                    let header = BlockTag::StringPool as u64 | (entries.len() as u64) << 8;
                    width.write_word(memory, at, "block header", header)?;
                    for (i, &entry) in entries.iter().enumerate() {
                        let slot = at + (1 + i as u64) * w;
                        let target = self.offset_of(offsets, entry, BlockTag::String, at)?;
                        width.write_word(memory, slot, "string pointer", pointer(target)?)?;
                        slots.push(SlotDescriptor {
                            offset: slot,
                            kind: SlotKind::String,
                        });
                    }
                }
            }
        }

        Ok(slots)
    }
}

fn payload_fits(what: &'static str, len: usize) -> Result<()> {
    if len as u64 > u64::from(MAX_PAYLOAD) {
        return Err(BytecodeError::width(what, len as u64, 24));
    }
    Ok(())
}

/// Rebuild the blocks of a scanned image with another word width.
///
/// Block order is preserved; pointers are expressed against `base`.
pub(crate) fn rebuild(
    data: &[u8],
    layout: &Layout,
    from: PointerWidth,
    to: PointerWidth,
    entry: u64,
    pool: u64,
    base: u64,
) -> Result<CompiledUnit> {
    let ids: FxHashMap<u64, BlockId> = layout
        .blocks()
        .iter()
        .enumerate()
        .map(|(i, block)| (block.offset, BlockId(i)))
        .collect();
    let id_for_slot = |slot: u64| -> Result<BlockId> {
        match layout.slot_at(slot).map(|s| s.target) {
            Some(SlotTarget::Block(target)) => ids
                .get(&target)
                .copied()
                .ok_or_else(|| BytecodeError::inconsistency(slot, "slot target is not a block")),
            _ => Err(BytecodeError::inconsistency(slot, "slot cannot be re-encoded")),
        }
    };

    let mut builder = ImageBuilder::new(to);
    for block in layout.blocks() {
        match block.tag {
            BlockTag::String | BlockTag::Code => {
                let body = block_bytes(data, from, block.offset, block.tag)?.to_vec();
                builder.push(PendingBlock::Bytes {
                    tag: block.tag,
                    bytes: body,
                });
            }
            BlockTag::Function => {
                let record = read_function(data, from, block.offset)?;
                let children = record
                    .child_slots
                    .iter()
                    .map(|&slot| id_for_slot(slot))
                    .collect::<Result<Vec<_>>>()?;
                builder.add_function(FunctionBlock {
                    arg_count: record.arg_count,
                    register_count: record.register_count,
                    local_count: record.local_count,
                    name_atom: record.name_atom,
                    code: id_for_slot(record.code_slot)?,
                    children,
                });
            }
            BlockTag::StringPool => {
                let w = from.bytes() as u64;
                let entries = (0..u64::from(block.payload))
                    .map(|i| id_for_slot(block.offset + (1 + i) * w))
                    .collect::<Result<Vec<_>>>()?;
                builder.add_string_pool(entries);
            }
        }
    }

    let lookup = |offset: u64| {
        ids.get(&offset)
            .copied()
            .ok_or_else(|| BytecodeError::inconsistency(offset, "not a block start"))
    };
    builder.finish_at(lookup(entry)?, lookup(pool)?, base)
}
