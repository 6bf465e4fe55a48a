//! ROM atom translation table
//!
//! Each entry names a string slot of the data section whose target lives in the
//! host's well-known atom table instead of the container's own string pool.

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};

/// Encoded size of one entry: `bytecode_offset: u32, rom_index: u16, padding: u16`
pub const ROM_ENTRY_SIZE: usize = 8;

/// One `(bytecode_offset, rom_index)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RomAtomEntry {
    /// Offset of the string slot within the data section
    pub bytecode_offset: u32,
    /// Index into the well-known atom table
    pub rom_index: u16,
}

/// ROM table, always sorted ascending by `bytecode_offset`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RomTable {
    entries: Vec<RomAtomEntry>,
}

impl RomTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from unordered entries
    pub fn from_entries(mut entries: Vec<RomAtomEntry>) -> Result<Self> {
        entries.sort_unstable_by_key(|e| e.bytecode_offset);
        if let Some(pair) = entries
            .windows(2)
            .find(|pair| pair[0].bytecode_offset == pair[1].bytecode_offset)
        {
            return Err(BytecodeError::inconsistency(
                u64::from(pair[0].bytecode_offset),
                "slot externalized twice",
            ));
        }
        Ok(Self { entries })
    }

    /// Entries in ascending offset order
    #[inline]
    pub fn entries(&self) -> &[RomAtomEntry] {
        &self.entries
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary search for the entry of the slot at `offset`
    pub fn find(&self, offset: u64) -> Option<&RomAtomEntry> {
        let offset = u32::try_from(offset).ok()?;
        self.entries
            .binary_search_by_key(&offset, |e| e.bytecode_offset)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Whether entries are strictly ascending
    pub fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| pair[0].bytecode_offset < pair[1].bytecode_offset)
    }

    /// Encoded size in bytes
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.entries.len() * ROM_ENTRY_SIZE
    }

    /// Append the encoded table to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        for entry in &self.entries {
            out.extend_from_slice(&entry.bytecode_offset.to_le_bytes());
            out.extend_from_slice(&entry.rom_index.to_le_bytes());
            out.extend_from_slice(&[0, 0]);
        }
    }

    /// Decode `count` entries from the start of `bytes`
    pub fn decode(bytes: &[u8], count: u16) -> Result<Self> {
        let len = usize::from(count) * ROM_ENTRY_SIZE;
        let raw = bytes.get(..len).ok_or(BytecodeError::UnexpectedEnd)?;
        let entries: Vec<RomAtomEntry> = raw
            .chunks_exact(ROM_ENTRY_SIZE)
            .map(|chunk| RomAtomEntry {
                bytecode_offset: u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                rom_index: u16::from_le_bytes([chunk[4], chunk[5]]),
            })
            .collect();
        let table = Self { entries };
        if !table.is_sorted() {
            return Err(BytecodeError::format("ROM table is not sorted by offset"));
        }
        Ok(table)
    }
}

/// Well-known symbols eligible for externalization
pub trait SymbolTable {
    /// Index of the symbol whose bytes equal `name`
    fn lookup(&self, name: &[u8]) -> Option<u16>;

    /// Bytes of the symbol at `index`
    fn symbol(&self, index: u16) -> Option<&[u8]>;
}

/// Resolves ROM indices to live addresses in the running executor
pub trait RomResolver {
    /// Live address of the atom at `index`
    fn resolve(&self, index: u16) -> Option<u64>;

    /// Number of atoms known to this resolver
    fn atom_count(&self) -> usize;
}

/// Resolve every entry, failing on the first index the resolver does not know
pub fn resolve_all(table: &RomTable, resolver: &dyn RomResolver) -> Result<Vec<u64>> {
    table
        .entries()
        .iter()
        .map(|entry| {
            resolver
                .resolve(entry.rom_index)
                .ok_or(BytecodeError::RomResolution {
                    index: entry.rom_index,
                    available: resolver.atom_count(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(bytecode_offset: u32, rom_index: u16) -> RomAtomEntry {
        RomAtomEntry {
            bytecode_offset,
            rom_index,
        }
    }

    #[test]
    fn test_from_entries_sorts() {
        let table = RomTable::from_entries(vec![entry(24, 1), entry(8, 7), entry(16, 0)]).unwrap();
        assert!(table.is_sorted());
        assert_eq!(table.find(16).map(|e| e.rom_index), Some(0));
        assert!(table.find(12).is_none());
    }

    #[test]
    fn test_duplicate_offset_rejected() {
        assert!(RomTable::from_entries(vec![entry(8, 1), entry(8, 2)]).is_err());
    }

    #[test]
    fn test_decode_rejects_unsorted() {
        let mut out = Vec::new();
        RomTable {
            entries: vec![entry(16, 0), entry(8, 1)],
        }
        .encode(&mut out);
        assert!(matches!(
            RomTable::decode(&out, 2),
            Err(BytecodeError::Format(_))
        ));
    }
}
