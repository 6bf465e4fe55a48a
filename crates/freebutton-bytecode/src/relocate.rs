//! Relocation engine
//!
//! Save-time relocation optionally externalizes well-known strings into the
//! ROM table, drops the string blocks nothing references any more and rewrites
//! every remaining pointer to a target base. Load-time relocation rewrites the
//! pointers to the resident address and resolves ROM slots to live atoms.
//! Both passes compute every new value before the first byte is written.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::codec::{Container, ContainerView};
use crate::error::{BytecodeError, Result};
use crate::header::{BytecodeHeader, BytecodeVersion};
use crate::image::{self, BlockTag, SlotKind, SlotTarget};
use crate::rom::{self, RomAtomEntry, RomResolver, RomTable, SymbolTable};

/// Counters reported by a relocation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocationSummary {
    /// Pointer slots rewritten to the new base
    pub pointers: usize,
    /// Slots holding ROM references
    pub rom_slots: usize,
    /// Slots newly moved into the ROM table
    pub externalized: usize,
    /// String blocks dropped from the data section
    pub dropped_blocks: usize,
}

/// Rewrite `container` so its pointers are valid at `target_base`.
///
/// With `externalize`, every string slot whose bytes equal a well-known symbol
/// becomes a ROM reference before any address is adjusted.
pub fn relocate_for_storage(
    container: &Container,
    target_base: u64,
    externalize: Option<&dyn SymbolTable>,
) -> Result<Container> {
    relocate_for_storage_with_summary(container, target_base, externalize).map(|(c, _)| c)
}

/// [`relocate_for_storage`] that also reports what it did
pub fn relocate_for_storage_with_summary(
    container: &Container,
    target_base: u64,
    externalize: Option<&dyn SymbolTable>,
) -> Result<(Container, RelocationSummary)> {
    container.validate()?;
    let header = &container.header;
    let width = header.width;
    let data = container.data.as_slice();
    width.check("target base", target_base)?;

    let layout = image::scan(data, width, header.base_addr, &container.rom_table)?;
    let mut summary = RelocationSummary::default();

    let mut rom: FxHashMap<u64, u16> = container
        .rom_table
        .entries()
        .iter()
        .map(|e| (u64::from(e.bytecode_offset), e.rom_index))
        .collect();

    if let Some(table) = externalize {
        for slot in layout.slots() {
            let SlotTarget::Block(target) = slot.target else {
                continue;
            };
            if slot.kind != SlotKind::String {
                continue;
            }
            let bytes = image::block_bytes(data, width, target, BlockTag::String)?;
            let Some(index) = table.lookup(bytes) else {
                continue;
            };
            match table.symbol(index) {
                Some(name) if name == bytes => {}
                _ => {
                    return Err(BytecodeError::inconsistency(
                        slot.offset,
                        format!(
                            "ROM atom {index} does not match {:?}",
                            String::from_utf8_lossy(bytes)
                        ),
                    ));
                }
            }
            rom.insert(slot.offset, index);
            summary.externalized += 1;
        }
    }

    let referenced: FxHashSet<u64> = layout
        .slots()
        .iter()
        .filter(|slot| !rom.contains_key(&slot.offset))
        .filter_map(|slot| match slot.target {
            SlotTarget::Block(target) => Some(target),
            SlotTarget::Rom(_) => None,
        })
        .collect();

    let mut remap: FxHashMap<u64, u64> = FxHashMap::default();
    let mut out = Vec::with_capacity(data.len());
    for block in layout.blocks() {
        if block.tag == BlockTag::String && !referenced.contains(&block.offset) {
            summary.dropped_blocks += 1;
            continue;
        }
        remap.insert(block.offset, out.len() as u64);
        let start = block.offset as usize;
        out.extend_from_slice(&data[start..start + block.len as usize]);
    }

    let moved = |offset: u64| {
        remap
            .get(&offset)
            .copied()
            .ok_or_else(|| BytecodeError::inconsistency(offset, "reference to a dropped block"))
    };

    let mut entries = Vec::with_capacity(rom.len());
    for slot in layout.slots() {
        let new_slot = moved(slot.block)? + (slot.offset - slot.block);
        if let Some(&index) = rom.get(&slot.offset) {
            width.write_word(&mut out, new_slot, "ROM marker", u64::from(index))?;
            let bytecode_offset = u32::try_from(new_slot)
                .map_err(|_| BytecodeError::width("ROM slot offset", new_slot, 32))?;
            entries.push(RomAtomEntry {
                bytecode_offset,
                rom_index: index,
            });
            summary.rom_slots += 1;
            continue;
        }
        let SlotTarget::Block(target) = slot.target else {
            return Err(BytecodeError::inconsistency(
                slot.offset,
                "ROM slot missing from the ROM table",
            ));
        };
        let new_target = moved(target)?;
        let value = target_base
            .checked_add(new_target)
            .ok_or(BytecodeError::width("pointer", new_target, 64))?;
        width.write_word(&mut out, new_slot, "pointer", value)?;
        summary.pointers += 1;
    }

    layout.expect_block(header.entry_offset, BlockTag::Function)?;
    layout.expect_block(header.string_pool_offset, BlockTag::StringPool)?;

    let rom_table = RomTable::from_entries(entries)?;
    let rom_atom_count = u16::try_from(rom_table.len())
        .map_err(|_| BytecodeError::width("ROM atom count", rom_table.len() as u64, 16))?;
    let version = if rom_table.is_empty() {
        BytecodeVersion::V1
    } else {
        BytecodeVersion::V2
    };

    let relocated = Container {
        header: BytecodeHeader {
            version,
            width,
            base_addr: target_base,
            entry_offset: moved(header.entry_offset)?,
            string_pool_offset: moved(header.string_pool_offset)?,
            data_len: out.len() as u64,
            rom_atom_count,
            reserved: 0,
        },
        rom_table,
        data: out,
    };

    tracing::debug!(
        target_base,
        pointers = summary.pointers,
        rom_slots = summary.rom_slots,
        externalized = summary.externalized,
        dropped = summary.dropped_blocks,
        "relocated container for storage"
    );

    Ok((relocated, summary))
}

/// Rewrite `data` so its pointers are valid at `current_addr` and resolve ROM slots.
///
/// Every ROM index is checked against `resolver` before anything is written.
pub fn relocate_for_load(
    header: &mut BytecodeHeader,
    rom_table: &RomTable,
    data: &mut [u8],
    current_addr: u64,
    resolver: &dyn RomResolver,
) -> Result<RelocationSummary> {
    let resolved = rom::resolve_all(rom_table, resolver)?;
    let live: FxHashMap<u64, u64> = rom_table
        .entries()
        .iter()
        .zip(resolved)
        .map(|(entry, addr)| (u64::from(entry.bytecode_offset), addr))
        .collect();

    if usize::from(header.rom_atom_count) != rom_table.len() {
        return Err(BytecodeError::format(format!(
            "header declares {} ROM entries, table holds {}",
            header.rom_atom_count,
            rom_table.len()
        )));
    }
    if header.data_len != data.len() as u64 {
        return Err(BytecodeError::inconsistency(
            0,
            format!(
                "header declares {} data bytes, section holds {}",
                header.data_len,
                data.len()
            ),
        ));
    }

    let width = header.width;
    width.check("load address", current_addr)?;
    let layout = image::scan(data, width, header.base_addr, rom_table)?;
    layout.expect_block(header.entry_offset, BlockTag::Function)?;
    layout.expect_block(header.string_pool_offset, BlockTag::StringPool)?;

    let mut summary = RelocationSummary::default();
    let mut writes = Vec::with_capacity(layout.slots().len());
    for slot in layout.slots() {
        let value = match slot.target {
            SlotTarget::Block(target) => {
                summary.pointers += 1;
                current_addr
                    .checked_add(target)
                    .ok_or(BytecodeError::width("pointer", target, 64))?
            }
            SlotTarget::Rom(_) => {
                summary.rom_slots += 1;
                live.get(&slot.offset).copied().ok_or_else(|| {
                    BytecodeError::inconsistency(slot.offset, "ROM slot was not resolved")
                })?
            }
        };
        writes.push((slot.offset, width.check("pointer", value)?));
    }

    for (offset, value) in writes {
        width.write_word(data, offset, "pointer", value)?;
    }
    header.base_addr = current_addr;

    tracing::debug!(
        current_addr,
        pointers = summary.pointers,
        rom_slots = summary.rom_slots,
        "relocated container for load"
    );

    Ok(summary)
}

/// Relocate a whole container buffer in place, header included.
///
/// `container_addr` is the address of the first byte of `bytes`.
pub fn relocate_container_in_place(
    bytes: &mut [u8],
    container_addr: u64,
    resolver: &dyn RomResolver,
) -> Result<RelocationSummary> {
    let (mut header, rom_table) = {
        let view = ContainerView::parse(bytes)?;
        (view.header, view.rom_table)
    };
    let start = header.data_offset();
    let end = header.total_len().ok_or(BytecodeError::UnexpectedEnd)?;
    let data_base = container_addr
        .checked_add(start as u64)
        .ok_or(BytecodeError::width("data base address", container_addr, 64))?;

    let data = bytes.get_mut(start..end).ok_or(BytecodeError::UnexpectedEnd)?;
    let summary = relocate_for_load(&mut header, &rom_table, data, data_base, resolver)?;
    header.write_into(bytes)?;
    Ok(summary)
}

/// Check every ROM index against `resolver` without touching any data
pub fn validate_rom_indices(rom_table: &RomTable, resolver: &dyn RomResolver) -> Result<()> {
    rom::resolve_all(rom_table, resolver).map(|_| ())
}
