//! Bytecode registry
//!
//! Records where each uploaded script lives in the user partition, with its
//! CRC-32 and the address it was relocated for. Persisted as JSON.

use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Longest script name; the on-flash record stores `char[32]`
pub const MAX_NAME_LEN: usize = 31;

/// One uploaded script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeEntry {
    /// Script name
    pub name: String,
    /// Offset within the user partition
    pub offset: u32,
    /// Container size in bytes
    pub size: u32,
    /// CRC-32 of the stored bytes
    pub checksum: u32,
    /// Address the container was pre-relocated for, 0 if position independent
    pub flash_addr: u64,
    /// Container format version
    pub version: u8,
    /// Inactive entries are ignored by lookups
    pub active: bool,
}

impl BytecodeEntry {
    /// First offset past the stored bytes
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Persisted {
    entries: Vec<BytecodeEntry>,
}

/// Name-indexed table of uploaded scripts
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<Vec<BytecodeEntry>>,
}

/// Check a script name against the record limits
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() {
        return Err(RegistryError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RegistryError::NameTooLong {
            name: name.to_string(),
            len: name.len(),
            limit: MAX_NAME_LEN,
        });
    }
    Ok(())
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Active entry named `name`
    pub fn find(&self, name: &str) -> Option<BytecodeEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.active && e.name == name)
            .cloned()
    }

    /// Add `entry`, replacing any entry of the same name
    pub fn insert(&self, entry: BytecodeEntry) -> Result<(), RegistryError> {
        validate_name(&entry.name)?;
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    /// Mark `name` inactive. Returns whether it was active.
    pub fn deactivate(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.active && e.name == name) {
            Some(entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every entry, active or not
    pub fn entries(&self) -> Vec<BytecodeEntry> {
        self.entries.read().clone()
    }

    /// Number of active entries
    pub fn active_count(&self) -> usize {
        self.entries.read().iter().filter(|e| e.active).count()
    }

    /// First `align`-aligned offset past every active entry
    pub fn next_free_offset(&self, align: u64) -> u64 {
        let end = self
            .entries
            .read()
            .iter()
            .filter(|e| e.active)
            .map(BytecodeEntry::end)
            .max()
            .unwrap_or(0);
        let align = align.max(1);
        end.div_ceil(align) * align
    }

    /// Serialize as JSON
    pub fn to_json(&self) -> Result<String, RegistryError> {
        let persisted = Persisted {
            entries: self.entries(),
        };
        Ok(serde_json::to_string_pretty(&persisted)?)
    }

    /// Parse a registry saved with [`Registry::to_json`]
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let persisted: Persisted = serde_json::from_str(json)?;
        for entry in &persisted.entries {
            validate_name(&entry.name)?;
        }
        Ok(Self {
            entries: RwLock::new(persisted.entries),
        })
    }

    /// Write the registry to `path`
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a registry from `path`
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
