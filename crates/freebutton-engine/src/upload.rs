//! Installing containers into the user partition

use std::sync::Arc;

use freebutton_bytecode::{Container, SymbolTable, relocate_for_storage};
use freebutton_vm::AtomTable;

use crate::checksum::crc32;
use crate::error::UploadError;
use crate::registry::{self, BytecodeEntry, Registry};
use crate::storage::FlashPartition;

/// Containers start on this boundary within the partition
pub const UPLOAD_ALIGN: u64 = 8;

/// Programs containers into a partition and registers them
pub struct Uploader {
    partition: Arc<dyn FlashPartition>,
    registry: Arc<Registry>,
    atoms: Arc<AtomTable>,
}

impl Uploader {
    /// Uploader writing to `partition`
    pub fn new(partition: Arc<dyn FlashPartition>, registry: Arc<Registry>, atoms: Arc<AtomTable>) -> Self {
        Self {
            partition,
            registry,
            atoms,
        }
    }

    /// Store `container_bytes` under `name`.
    ///
    /// With `pre_relocate`, well-known names are externalized and every pointer is
    /// rewritten for the address the container will occupy, so a later load runs
    /// it in place. Partitions without stable addresses store it unchanged.
    pub fn install(
        &self,
        name: &str,
        container_bytes: &[u8],
        pre_relocate: bool,
    ) -> Result<BytecodeEntry, UploadError> {
        registry::validate_name(name)?;
        let mut container = Container::from_bytes(container_bytes)?;
        let next = self.registry.next_free_offset(UPLOAD_ALIGN);
        let offset = usize::try_from(next).unwrap_or(usize::MAX);

        let mut flash_addr = 0;
        if pre_relocate {
            match self.partition.resident_addr(offset) {
                Some(addr) => {
                    let symbols: &dyn SymbolTable = self.atoms.as_ref();
                    let externalized = relocate_for_storage(&container, 0, Some(symbols))?;
                    let base = externalized.data_base_for(addr)?;
                    container = relocate_for_storage(&externalized, base, None)?;
                    flash_addr = base;
                }
                None => tracing::warn!(
                    name,
                    partition = self.partition.label(),
                    "partition has no fixed address, storing without pre-relocation"
                ),
            }
        }

        let bytes = container.to_bytes()?;
        if offset.saturating_add(bytes.len()) > self.partition.size() {
            return Err(UploadError::Full {
                offset,
                needed: bytes.len(),
                size: self.partition.size(),
            });
        }
        let out_of_range = || UploadError::OutOfRegistryRange {
            offset: next,
            size: bytes.len(),
        };
        let entry_offset = u32::try_from(next).map_err(|_| out_of_range())?;
        let entry_size = u32::try_from(bytes.len()).map_err(|_| out_of_range())?;
        self.partition.write(offset, &bytes)?;

        let entry = BytecodeEntry {
            name: name.to_string(),
            offset: entry_offset,
            size: entry_size,
            checksum: crc32(&bytes),
            flash_addr,
            version: container.header.version as u8,
            active: true,
        };
        self.registry.insert(entry.clone())?;

        tracing::info!(
            name,
            offset,
            size = entry.size,
            checksum = format_args!("{:#010x}", entry.checksum),
            flash_addr = format_args!("{:#x}", flash_addr),
            "installed bytecode"
        );
        Ok(entry)
    }
}
