//! Well-known atom table
//!
//! The table is built once before the first unit is loaded and is read-only
//! afterwards. Atom names live in a single arena so every atom has a stable
//! address for the lifetime of the table; ROM slots of a relocated unit hold
//! those addresses.

use freebutton_bytecode::{RomResolver, SymbolTable};
use rustc_hash::FxHashMap;

/// Names of the standard library, in atom index order
pub const STDLIB_ATOMS: &[&str] = &[
    "print",
    "gc",
    "load",
    "loadMapped",
    "loadUserBytecode",
    "setTimeout",
    "clearTimeout",
    "Date",
    "now",
    "performance",
    "led",
    "count",
    "on",
    "off",
    "setColor",
    "button",
    "setLabel",
    "setTopLabel",
    "onClick",
    "onLongPress",
    "onRelease",
    "sensor",
    "getValue",
    "getType",
    "getInfo",
    "getAll",
    "onChange",
    "mqtt",
    "publish",
    "subscribe",
    "unsubscribe",
    "onConnect",
    "onDisconnect",
    "isConnected",
    "getBrokerName",
    "getBrokerCount",
    "id",
    "name",
    "type",
    "unit",
    "value",
    "online",
    "length",
    "undefined",
];

/// Immutable table of well-known atoms
#[derive(Debug)]
pub struct AtomTable {
    arena: Box<[u8]>,
    spans: Vec<(u32, u32)>,
    index: FxHashMap<Box<[u8]>, u16>,
}

impl AtomTable {
    /// Table holding exactly the standard library atoms
    pub fn standard() -> Self {
        AtomTableBuilder::new().with_stdlib().build()
    }

    /// Start building a table
    pub fn builder() -> AtomTableBuilder {
        AtomTableBuilder::new()
    }

    /// Number of atoms
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Bytes of the atom at `index`
    pub fn bytes(&self, index: u16) -> Option<&[u8]> {
        let &(start, len) = self.spans.get(usize::from(index))?;
        self.arena.get(start as usize..(start + len) as usize)
    }

    /// Name of the atom at `index`
    pub fn name(&self, index: u16) -> Option<&str> {
        self.bytes(index).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Index of the atom called `name`
    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.index.get(name.as_bytes()).copied()
    }

    /// Address of the first byte of the atom at `index`
    pub fn address_of(&self, index: u16) -> Option<u64> {
        let &(start, _) = self.spans.get(usize::from(index))?;
        (self.arena.as_ptr() as u64).checked_add(u64::from(start))
    }

    /// Index of the atom whose name starts at `addr`
    pub fn index_of_address(&self, addr: u64) -> Option<u16> {
        let start = addr.checked_sub(self.arena.as_ptr() as u64)?;
        let start = u32::try_from(start).ok()?;
        let pos = self.spans.binary_search_by_key(&start, |&(s, _)| s).ok()?;
        u16::try_from(pos).ok()
    }
}

impl SymbolTable for AtomTable {
    fn lookup(&self, name: &[u8]) -> Option<u16> {
        self.index.get(name).copied()
    }

    fn symbol(&self, index: u16) -> Option<&[u8]> {
        self.bytes(index)
    }
}

impl RomResolver for AtomTable {
    fn resolve(&self, index: u16) -> Option<u64> {
        self.address_of(index)
    }

    fn atom_count(&self) -> usize {
        self.len()
    }
}

/// Builder for [`AtomTable`]
#[derive(Debug, Default)]
pub struct AtomTableBuilder {
    names: Vec<String>,
}

impl AtomTableBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the standard library atoms
    pub fn with_stdlib(self) -> Self {
        STDLIB_ATOMS.iter().fold(self, |b, name| b.atom(*name))
    }

    /// Append one atom. Duplicates and empty names are ignored.
    pub fn atom(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() && !self.names.contains(&name) && self.names.len() < usize::from(u16::MAX) {
            self.names.push(name);
        }
        self
    }

    /// Freeze the table
    pub fn build(self) -> AtomTable {
        let mut arena = Vec::new();
        let mut spans = Vec::with_capacity(self.names.len());
        let mut index = FxHashMap::default();

        for (i, name) in self.names.iter().enumerate() {
            let start = arena.len() as u32;
            arena.extend_from_slice(name.as_bytes());
            // NUL separator keeps atom addresses distinct
            arena.push(0);
            spans.push((start, name.len() as u32));
            index.insert(name.as_bytes().into(), i as u16);
        }

        AtomTable {
            arena: arena.into_boxed_slice(),
            spans,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        let atoms = AtomTable::standard();
        assert_eq!(atoms.len(), STDLIB_ATOMS.len());
        assert_eq!(atoms.index_of("print"), Some(0));
        assert_eq!(atoms.index_of("led"), Some(10));
        assert_eq!(atoms.name(12), Some("on"));
        assert_eq!(atoms.index_of("nope"), None);
    }

    #[test]
    fn test_addresses_round_trip() {
        let atoms = AtomTable::standard();
        for i in 0..atoms.len() as u16 {
            let addr = atoms.resolve(i).unwrap();
            assert_eq!(atoms.index_of_address(addr), Some(i));
        }
        let first = atoms.address_of(0).unwrap();
        assert_eq!(atoms.index_of_address(first + 1), None);
        assert_eq!(atoms.resolve(atoms.len() as u16), None);
    }

    #[test]
    fn test_builder_extensions() {
        let atoms = AtomTable::builder()
            .with_stdlib()
            .atom("relay")
            .atom("print")
            .atom("")
            .build();
        assert_eq!(atoms.len(), STDLIB_ATOMS.len() + 1);
        assert_eq!(atoms.lookup(b"relay"), Some(STDLIB_ATOMS.len() as u16));
        assert_eq!(atoms.symbol(0), Some(&b"print"[..]));
    }
}
