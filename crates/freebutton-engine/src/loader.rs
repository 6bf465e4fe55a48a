//! Mapped-file loader
//!
//! Bridges stored containers to the VM. Every attempt walks
//!
//! ```text
//! Requested -> Mapped -> ChecksumVerified -> FormatVerified
//!           -> RelocationSkipped | Relocated -> Ready
//! ```
//!
//! and any failed step ends in `Failed(reason)` with the mapping released.
//! Failed loads are never retried here.

use std::sync::Arc;

use freebutton_bytecode::{ContainerView, is_container, validate_rom_indices};
use freebutton_vm::{AtomTable, ExecutableUnit, UnitBuffer, load_bytecode, load_relocated};
use serde::Serialize;

use crate::checksum::crc32;
use crate::compile::{CompileOptions, compile_to_container};
use crate::error::{LoadError, LoadReason, LoadResult};
use crate::registry::Registry;
use crate::storage::{FlashPartition, MappedFile};

const TARGET: &str = "freebutton::loader";

/// Step of a load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Load requested
    Requested,
    /// Bytes mapped
    Mapped,
    /// CRC-32 matched the registry entry
    ChecksumVerified,
    /// Bytes are a container (or compiled source)
    FormatVerified,
    /// Already relocated for the resident address; executing in place
    RelocationSkipped,
    /// Relocated into a private copy
    Relocated,
    /// Handed to the VM
    Ready,
    /// Attempt failed
    Failed(LoadReason),
}

/// What a successful load went through
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// States in the order they were entered
    pub states: Vec<LoadState>,
    /// The unit executes from the mapping itself
    pub zero_copy: bool,
    /// Slots rewritten during relocation
    pub relocated_slots: usize,
}

impl LoadReport {
    fn enter(&mut self, state: LoadState) {
        tracing::debug!(target: TARGET, ?state, "load state");
        self.states.push(state);
    }
}

/// A loaded unit and its report
#[derive(Debug)]
pub struct LoadedUnit {
    /// Validated unit
    pub unit: Arc<ExecutableUnit>,
    /// States visited
    pub report: LoadReport,
}

/// Loads units from the user partition, flat buffers and raw source
pub struct Loader {
    partition: Arc<dyn FlashPartition>,
    registry: Arc<Registry>,
    atoms: Arc<AtomTable>,
    compile: CompileOptions,
}

impl Loader {
    /// Loader over `partition`, resolving ROM atoms through `atoms`
    pub fn new(partition: Arc<dyn FlashPartition>, registry: Arc<Registry>, atoms: Arc<AtomTable>) -> Self {
        Self {
            partition,
            registry,
            atoms,
            compile: CompileOptions::default(),
        }
    }

    /// Options used when a flat buffer turns out to be source
    pub fn with_compile_options(mut self, options: CompileOptions) -> Self {
        self.compile = options;
        self
    }

    /// Partition loads are served from
    pub fn partition(&self) -> &Arc<dyn FlashPartition> {
        &self.partition
    }

    /// Registry consulted by [`Loader::load_by_name`]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Load the registered script `name`.
    ///
    /// A container pre-relocated for its resident address runs in place and keeps
    /// the partition mapped for as long as the unit (or any closure from it) lives.
    pub fn load_by_name(&self, name: &str) -> LoadResult<LoadedUnit> {
        let mut report = LoadReport::default();
        report.enter(LoadState::Requested);
        let result = self.load_by_name_inner(name, &mut report);
        self.finish(result, report, name)
    }

    fn load_by_name_inner(&self, name: &str, report: &mut LoadReport) -> LoadResult<Arc<ExecutableUnit>> {
        let entry = self
            .registry
            .find(name)
            .ok_or_else(|| LoadError::NotFound(name.to_string()))?;
        let mapped = self.partition.map(entry.offset as usize, entry.size as usize)?;
        report.enter(LoadState::Mapped);

        let calculated = crc32(mapped.bytes());
        tracing::info!(
            target: TARGET,
            name,
            calculated = format_args!("{calculated:#010x}"),
            stored = format_args!("{:#010x}", entry.checksum),
            size = mapped.len(),
            "load-time CRC32 check"
        );
        if calculated != entry.checksum {
            tracing::warn!(
                target: TARGET,
                name,
                calculated = format_args!("{calculated:#010x}"),
                stored = format_args!("{:#010x}", entry.checksum),
                "CRC32 mismatch"
            );
            return Err(LoadError::Integrity {
                name: name.to_string(),
                calculated,
                stored: entry.checksum,
            });
        }
        report.enter(LoadState::ChecksumVerified);

        self.load_container(mapped, report)
    }

    /// Load bytes held in memory: a container is relocated into a private copy,
    /// anything else is compiled as UTF-8 source first.
    pub fn load_from_flat_buffer(&self, bytes: &[u8]) -> LoadResult<LoadedUnit> {
        let mut report = LoadReport::default();
        report.enter(LoadState::Requested);
        let result = self.load_flat_inner(bytes, &mut report);
        self.finish(result, report, &self.compile.filename)
    }

    fn load_flat_inner(&self, bytes: &[u8], report: &mut LoadReport) -> LoadResult<Arc<ExecutableUnit>> {
        if is_container(bytes) {
            report.enter(LoadState::FormatVerified);
            return self.relocate_copy(bytes, report);
        }
        let source = std::str::from_utf8(bytes)
            .map_err(|_| LoadError::Format("neither a bytecode container nor UTF-8 source".to_string()))?;
        let container = compile_to_container(source, &self.compile, &self.atoms)?;
        report.enter(LoadState::FormatVerified);
        self.relocate_copy(&container, report)
    }

    /// Map `size` bytes at `offset` of the partition and load them through a
    /// relocated copy. No registry entry or checksum is involved.
    pub fn load_mapped(&self, offset: usize, size: usize) -> LoadResult<LoadedUnit> {
        let mut report = LoadReport::default();
        report.enter(LoadState::Requested);
        let result = self.load_mapped_inner(offset, size, &mut report);
        self.finish(result, report, self.partition.label())
    }

    fn load_mapped_inner(&self, offset: usize, size: usize, report: &mut LoadReport) -> LoadResult<Arc<ExecutableUnit>> {
        let mapped = self.partition.map(offset, size)?;
        report.enter(LoadState::Mapped);
        if !is_container(mapped.bytes()) {
            return Err(LoadError::Format(format!(
                "data at partition '{}' offset {offset} is not valid bytecode",
                self.partition.label()
            )));
        }
        report.enter(LoadState::FormatVerified);
        self.relocate_copy(mapped.bytes(), report)
    }

    /// Shared tail of a mapped load: sniff, then run in place or relocate a copy
    fn load_container(&self, mapped: MappedFile, report: &mut LoadReport) -> LoadResult<Arc<ExecutableUnit>> {
        if !is_container(mapped.bytes()) {
            return Err(LoadError::Format(format!(
                "no container at partition '{}' offset {}",
                mapped.partition(),
                mapped.offset()
            )));
        }
        report.enter(LoadState::FormatVerified);

        let resident = {
            let view = ContainerView::parse(mapped.bytes())?;
            let data_addr = mapped.addr().checked_add(view.data_offset() as u64);
            if data_addr == Some(view.header.base_addr) {
                validate_rom_indices(&view.rom_table, self.atoms.as_ref())?;
                true
            } else {
                tracing::debug!(
                    target: TARGET,
                    recorded = format_args!("{:#x}", view.header.base_addr),
                    resident = format_args!("{:#x}", data_addr.unwrap_or_default()),
                    "container not relocated for its resident address"
                );
                false
            }
        };

        if resident {
            report.enter(LoadState::RelocationSkipped);
            report.zero_copy = true;
            let buffer = UnitBuffer::Resident(mapped.into_resident());
            return Ok(load_bytecode(buffer, Arc::clone(&self.atoms))?);
        }
        self.relocate_copy(mapped.bytes(), report)
    }

    fn relocate_copy(&self, bytes: &[u8], report: &mut LoadReport) -> LoadResult<Arc<ExecutableUnit>> {
        let (unit, summary) = load_relocated(bytes, Arc::clone(&self.atoms))?;
        report.relocated_slots = summary.pointers + summary.rom_slots;
        report.enter(LoadState::Relocated);
        Ok(unit)
    }

    fn finish(
        &self,
        result: LoadResult<Arc<ExecutableUnit>>,
        mut report: LoadReport,
        what: &str,
    ) -> LoadResult<LoadedUnit> {
        match result {
            Ok(unit) => {
                report.enter(LoadState::Ready);
                tracing::debug!(
                    target: TARGET,
                    what,
                    zero_copy = report.zero_copy,
                    relocated_slots = report.relocated_slots,
                    "unit ready"
                );
                Ok(LoadedUnit { unit, report })
            }
            Err(err) => {
                let reason = err.reason();
                report.enter(LoadState::Failed(reason));
                tracing::warn!(target: TARGET, what, %reason, error = %err, "load failed");
                Err(err)
            }
        }
    }
}
