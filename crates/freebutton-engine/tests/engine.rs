//! Engine facade and the script-level loader globals

use std::sync::Arc;

use freebutton_engine::{
    CompileOptions, Engine, EngineConfig, EngineError, LoadError, LoadReason, StorageError,
    UploadError,
};
use freebutton_vm::hal::HalResult;
use freebutton_vm::{Hardware, LedHardware, MemoryConsole, STDLIB_ATOMS, VmError};
use parking_lot::Mutex;

#[derive(Default)]
struct RecordingLeds {
    calls: Mutex<Vec<(i32, u8, u8, u8)>>,
}

impl LedHardware for RecordingLeds {
    fn count(&self) -> i32 {
        8
    }

    fn set_color(&self, position: i32, r: u8, g: u8, b: u8) -> HalResult<()> {
        self.calls.lock().push((position, r, g, b));
        Ok(())
    }
}

struct Rig {
    engine: Engine,
    console: MemoryConsole,
    leds: Arc<RecordingLeds>,
}

fn rig(config: EngineConfig) -> Rig {
    let console = MemoryConsole::new();
    let leds = Arc::new(RecordingLeds::default());
    let engine = Engine::builder()
        .config(config)
        .hardware(Hardware {
            leds: leds.clone(),
            ..Hardware::default()
        })
        .console(Arc::new(console.clone()))
        .build()
        .unwrap();
    Rig {
        engine,
        console,
        leds,
    }
}

#[test]
fn test_install_and_run_stored() {
    let mut rig = rig(EngineConfig::default());
    let entry = rig
        .engine
        .install_source("blink", "led.on(1); led.off(2);")
        .unwrap();
    assert_eq!(entry.version, 2);
    assert_ne!(entry.flash_addr, 0);

    rig.engine.run_stored("blink").unwrap();
    assert_eq!(
        *rig.leds.calls.lock(),
        [(1, 255, 255, 255), (2, 0, 0, 0)]
    );
}

#[test]
fn test_load_user_bytecode_from_script() {
    let mut rig = rig(EngineConfig::default());
    rig.engine
        .install_source("lib", r#"print("lib loaded");"#)
        .unwrap();
    rig.engine
        .run_source(r#"loadUserBytecode("lib"); print("after");"#)
        .unwrap();
    assert_eq!(rig.console.lines(), ["lib loaded", "after"]);

    let err = rig
        .engine
        .run_source(r#"loadUserBytecode("nope");"#)
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Vm(VmError::Host(ref message)) if message == "bytecode 'nope' not found"
    ));
    assert_eq!(err.reason(), LoadReason::Execution);

    let err = rig.engine.run_source("loadUserBytecode();").unwrap_err();
    assert!(matches!(
        err,
        LoadError::Vm(VmError::TypeError(ref message)) if message == "loadUserBytecode() requires script name"
    ));
}

#[test]
fn test_load_reads_scripts_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.js"), r#"print("hello from file");"#).unwrap();

    let config = EngineConfig {
        scripts_dir: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let mut rig = rig(config);
    let compiled = rig.engine.compile("led.on(4);").unwrap();
    std::fs::write(dir.path().join("blink.jsc"), &compiled).unwrap();

    rig.engine
        .run_source(r#"load("hello.js"); load("blink.jsc");"#)
        .unwrap();
    assert_eq!(rig.console.lines(), ["hello from file"]);
    assert_eq!(*rig.leds.calls.lock(), [(4, 255, 255, 255)]);

    let err = rig.engine.run_source(r#"load("missing.js");"#).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Vm(VmError::Host(ref message)) if message == "failed to load file 'missing.js'"
    ));
}

#[test]
fn test_load_stays_inside_scripts_dir() {
    let root = tempfile::tempdir().unwrap();
    let scripts = root.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    let outside = root.path().join("outside.js");
    std::fs::write(&outside, r#"print("escaped");"#).unwrap();

    let mut rig = rig(EngineConfig {
        scripts_dir: scripts,
        ..EngineConfig::default()
    });

    let absolute = outside.display().to_string();
    for filename in ["../outside.js", absolute.as_str()] {
        let err = rig
            .engine
            .run_source(&format!("load({filename:?});"))
            .unwrap_err();
        assert!(
            matches!(
                err,
                LoadError::Vm(VmError::Host(ref message))
                    if *message == format!("failed to load file '{filename}'")
            ),
            "unexpected {err:?}"
        );
    }
    assert!(rig.console.lines().is_empty());
}

#[test]
fn test_load_mapped_from_script() {
    let mut rig = rig(EngineConfig::default());
    let entry = rig
        .engine
        .install_source("blink", "led.on(6);")
        .unwrap();

    rig.engine
        .run_source(&format!(
            r#"loadMapped("js_user", {}, {});"#,
            entry.offset, entry.size
        ))
        .unwrap();
    assert_eq!(*rig.leds.calls.lock(), [(6, 255, 255, 255)]);

    let err = rig
        .engine
        .run_source(r#"loadMapped("other", 0, 16);"#)
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Vm(VmError::Host(ref message)) if message == "failed to mmap partition 'other' at offset 0"
    ));

    let err = rig
        .engine
        .run_source(r#"loadMapped("js_user", 1024, 64);"#)
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Vm(VmError::Host(ref message))
            if message == "data at partition 'js_user' offset 1024 is not valid bytecode"
    ));

    let err = rig.engine.run_source(r#"loadMapped("js_user");"#).unwrap_err();
    assert!(matches!(err, LoadError::Vm(VmError::TypeError(_))));
}

#[test]
fn test_registered_callbacks_keep_mapping() {
    let mut rig = rig(EngineConfig::default());
    rig.engine
        .install_source("buttons", r#"button.onClick(1, () => print("hi"));"#)
        .unwrap();
    rig.engine.run_stored("buttons").unwrap();

    let err = rig.engine.install_source("next", "print(1);").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Upload(UploadError::Storage(StorageError::Busy(_)))
    ));

    assert!(rig.engine.runtime_mut().dispatch_button_click(1).unwrap());
    assert_eq!(rig.console.lines(), ["hi"]);
}

#[test]
fn test_copy_mode_leaves_partition_writable() {
    let config = EngineConfig {
        pre_relocate: false,
        ..EngineConfig::default()
    };
    let mut rig = rig(config);
    rig.engine
        .install_source("buttons", r#"button.onClick(1, () => print("hi"));"#)
        .unwrap();
    rig.engine.run_stored("buttons").unwrap();
    rig.engine.install_source("next", "print(1);").unwrap();
    assert_eq!(rig.engine.registry().active_count(), 2);
}

#[test]
fn test_errors_carry_reasons() {
    let config = EngineConfig {
        compile: CompileOptions {
            max_bytecode_size: 64,
            ..CompileOptions::default()
        },
        ..EngineConfig::default()
    };
    let small = rig(config);

    let err = small.engine.install_source("big", "print(1, 2, 3);").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Load(LoadError::TooLarge { limit: 64, .. })
    ));

    let mut rig = rig(EngineConfig::default());
    assert_eq!(
        rig.engine.run_source("let = ;").unwrap_err().reason(),
        LoadReason::Compile
    );
    assert_eq!(
        rig.engine.run_source("missing();").unwrap_err().reason(),
        LoadReason::Execution
    );
    assert_eq!(
        rig.engine.run_stored("ghost").unwrap_err().reason(),
        LoadReason::NotFound
    );
}

#[test]
fn test_extra_atoms_extend_the_table() {
    let config = EngineConfig {
        extra_atoms: vec!["relay".to_string(), "led".to_string()],
        ..EngineConfig::default()
    };
    let rig = rig(config);
    let atoms = rig.engine.atoms();
    assert_eq!(atoms.len(), STDLIB_ATOMS.len() + 1);
    assert_eq!(atoms.index_of("relay"), Some(STDLIB_ATOMS.len() as u16));

    let bytes = rig.engine.compile("relay.on(1);").unwrap();
    let container = freebutton_bytecode::Container::from_bytes(&bytes).unwrap();
    assert_eq!(container.header.rom_atom_count, 2);
}

#[test]
fn test_registry_persists_across_engines() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        registry_path: Some(dir.path().join("registry.json")),
        ..EngineConfig::default()
    };

    let rig1 = rig(config.clone());
    let entry = rig1.engine.install_source("blink", "led.on(1);").unwrap();
    rig1.engine.save_registry().unwrap();

    let rig2 = rig(config);
    assert_eq!(rig2.engine.registry().find("blink"), Some(entry));
}
