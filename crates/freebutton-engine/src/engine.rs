//! Engine facade
//!
//! Wires configuration, hardware, the user partition, the registry, the loader
//! and a script runtime together, and exposes `load`, `loadMapped` and
//! `loadUserBytecode` to scripts.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use freebutton_vm::{
    AtomTable, Clock, Console, Hardware, Runtime, Value, VmError, VmResult,
};

use crate::compile::compile_to_container;
use crate::config::EngineConfig;
use crate::error::{EngineResult, LoadError, LoadReason, LoadResult, UploadError};
use crate::loader::{LoadedUnit, Loader};
use crate::registry::{BytecodeEntry, Registry};
use crate::storage::{FlashPartition, MemoryPartition};
use crate::upload::Uploader;

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    hardware: Hardware,
    console: Option<Arc<dyn Console>>,
    clock: Option<Arc<dyn Clock>>,
    partition: Option<Arc<dyn FlashPartition>>,
    registry: Option<Arc<Registry>>,
}

impl EngineBuilder {
    /// Builder with default configuration and stub hardware
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Hardware drivers
    pub fn hardware(mut self, hardware: Hardware) -> Self {
        self.hardware = hardware;
        self
    }

    /// Output sink for `print`
    pub fn console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = Some(console);
        self
    }

    /// Time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// User partition; defaults to an in-memory partition sized by the config
    pub fn partition(mut self, partition: Arc<dyn FlashPartition>) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Registry; defaults to the persisted one, or an empty registry
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the engine
    pub fn build(self) -> EngineResult<Engine> {
        let config = self.config;

        let atoms = Arc::new(
            config
                .extra_atoms
                .iter()
                .fold(AtomTable::builder().with_stdlib(), |b, name| b.atom(name.as_str()))
                .build(),
        );

        let partition = self.partition.unwrap_or_else(|| {
            Arc::new(MemoryPartition::new(
                config.partition_label.clone(),
                config.partition_size,
            ))
        });

        let registry = match (self.registry, &config.registry_path) {
            (Some(registry), _) => registry,
            (None, Some(path)) if path.exists() => Arc::new(Registry::load(path)?),
            (None, _) => Arc::new(Registry::new()),
        };

        let loader = Arc::new(
            Loader::new(partition.clone(), registry.clone(), atoms.clone())
                .with_compile_options(config.compile.clone()),
        );
        let uploader = Uploader::new(partition, registry.clone(), atoms.clone());

        let mut runtime = Runtime::builder().atoms(atoms.clone()).hardware(self.hardware);
        if let Some(console) = self.console {
            runtime = runtime.console(console);
        }
        if let Some(clock) = self.clock {
            runtime = runtime.clock(clock);
        }
        let mut runtime = runtime.build();
        install_loader_globals(&mut runtime, &loader, config.scripts_dir.clone());

        tracing::info!(
            partition = loader.partition().label(),
            atoms = atoms.len(),
            scripts = registry.active_count(),
            "engine ready"
        );

        Ok(Engine {
            config,
            atoms,
            registry,
            loader,
            uploader,
            runtime,
        })
    }
}

/// A configured script engine
pub struct Engine {
    config: EngineConfig,
    atoms: Arc<AtomTable>,
    registry: Arc<Registry>,
    loader: Arc<Loader>,
    uploader: Uploader,
    runtime: Runtime,
}

impl Engine {
    /// Start configuring an engine
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Atom table shared by compiler, uploader and runtime
    pub fn atoms(&self) -> &Arc<AtomTable> {
        &self.atoms
    }

    /// Bytecode registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Loader
    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    /// Uploader
    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// Script runtime
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Script runtime, for dispatching events and timers
    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    /// Compile `source` into storable container bytes
    pub fn compile(&self, source: &str) -> LoadResult<Vec<u8>> {
        compile_to_container(source, &self.config.compile, &self.atoms)
    }

    /// Store container bytes under `name`
    pub fn upload(&self, name: &str, container_bytes: &[u8]) -> Result<BytecodeEntry, UploadError> {
        self.uploader
            .install(name, container_bytes, self.config.pre_relocate)
    }

    /// Compile `source` and store it under `name`
    pub fn install_source(&self, name: &str, source: &str) -> EngineResult<BytecodeEntry> {
        let bytes = self.compile(source)?;
        Ok(self.upload(name, &bytes)?)
    }

    /// Load and run source text or container bytes
    pub fn run_buffer(&mut self, bytes: &[u8]) -> LoadResult<Value> {
        let LoadedUnit { unit, .. } = self.loader.load_from_flat_buffer(bytes)?;
        Ok(self.runtime.run(&unit)?)
    }

    /// Load and run source text
    pub fn run_source(&mut self, source: &str) -> LoadResult<Value> {
        self.run_buffer(source.as_bytes())
    }

    /// Load and run the registered script `name`
    pub fn run_stored(&mut self, name: &str) -> LoadResult<Value> {
        let LoadedUnit { unit, .. } = self.loader.load_by_name(name)?;
        Ok(self.runtime.run(&unit)?)
    }

    /// Persist the registry to the configured path, if one is set
    pub fn save_registry(&self) -> EngineResult<()> {
        if let Some(path) = &self.config.registry_path {
            self.registry.save(path)?;
        }
        Ok(())
    }
}

fn install_loader_globals(runtime: &mut Runtime, loader: &Arc<Loader>, scripts_dir: PathBuf) {
    let files = Arc::clone(loader);
    runtime.register_native("load", move |runtime, args| {
        let filename = script_arg(args, 0, "load() requires filename argument")?;
        let load_failed = || VmError::host(format!("failed to load file '{filename}'"));
        let path = script_path(&scripts_dir, &filename).ok_or_else(|| {
            tracing::warn!(filename = %filename, "load() path escapes the scripts directory");
            load_failed()
        })?;
        let bytes = std::fs::read(path).map_err(|_| load_failed())?;
        let loaded = files.load_from_flat_buffer(&bytes).map_err(|err| match err {
            LoadError::Compile(_) | LoadError::Vm(_) => VmError::host(err.to_string()),
            _ => VmError::host(format!("failed to relocate bytecode '{filename}'")),
        })?;
        runtime.run(&loaded.unit)
    });

    let mapped = Arc::clone(loader);
    runtime.register_native("loadMapped", move |runtime, args| {
        if args.len() < 3 {
            return Err(VmError::type_error(
                "loadMapped() requires 3 arguments: partition, offset, size",
            ));
        }
        let partition = args[0].display_string();
        let offset = args[1].to_int32();
        let size = args[2].to_int32();
        let mmap_failed =
            || VmError::host(format!("failed to mmap partition '{partition}' at offset {offset}"));
        if partition != mapped.partition().label() {
            return Err(mmap_failed());
        }
        let (Ok(start), Ok(len)) = (usize::try_from(offset), usize::try_from(size)) else {
            return Err(mmap_failed());
        };
        let loaded = mapped.load_mapped(start, len).map_err(|err| match err.reason() {
            LoadReason::Storage => mmap_failed(),
            LoadReason::Format => VmError::host(format!(
                "data at partition '{partition}' offset {offset} is not valid bytecode"
            )),
            _ => VmError::host("failed to relocate bytecode"),
        })?;
        runtime.run(&loaded.unit)
    });

    let user = Arc::clone(loader);
    runtime.register_native("loadUserBytecode", move |runtime, args| {
        let name = script_arg(args, 0, "loadUserBytecode() requires script name")?;
        let loaded = user.load_by_name(&name).map_err(|err| {
            VmError::host(match err.reason() {
                LoadReason::NotFound => format!("bytecode '{name}' not found"),
                LoadReason::Storage => format!("failed to mmap bytecode '{name}'"),
                LoadReason::Integrity => format!("checksum mismatch for bytecode '{name}'"),
                LoadReason::Format => format!("invalid bytecode format for '{name}'"),
                _ => format!("bytecode relocation invalid for '{name}', please re-upload"),
            })
        })?;
        runtime.run(&loaded.unit)
    });
}

/// `filename` under `scripts_dir`, if it stays inside it
fn script_path(scripts_dir: &Path, filename: &str) -> Option<PathBuf> {
    let relative = Path::new(filename);
    let inside = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (inside && !filename.is_empty()).then(|| scripts_dir.join(relative))
}

fn script_arg(args: &[Value], i: usize, missing: &str) -> VmResult<String> {
    args.get(i)
        .map(Value::display_string)
        .ok_or_else(|| VmError::type_error(missing))
}
