//! Config parsing, registry persistence and reason-code serialization

use std::path::PathBuf;

use freebutton_engine::{
    BytecodeEntry, ConfigError, EngineConfig, LoadReason, LoadState, MAX_NAME_LEN, Registry,
    RegistryError,
};
use proptest::prelude::*;

const ALL_REASONS: [LoadReason; 11] = [
    LoadReason::NotFound,
    LoadReason::Storage,
    LoadReason::Integrity,
    LoadReason::Format,
    LoadReason::FirmwareMismatch,
    LoadReason::Relocation,
    LoadReason::Compile,
    LoadReason::Execution,
    LoadReason::TooLarge,
    LoadReason::WidthConversion,
    LoadReason::InternalDefect,
];

#[test]
fn test_config_from_toml() {
    let config = EngineConfig::from_toml_str(
        r#"
        partition_label = "scripts"
        partition_size = 65536
        scripts_dir = "/data/js"
        registry_path = "/data/registry.json"
        pre_relocate = false
        extra_atoms = ["relay", "buzzer"]

        [compile]
        narrow = true
        max_bytecode_size = 4096
        "#,
    )
    .unwrap();

    assert_eq!(config.partition_label, "scripts");
    assert_eq!(config.partition_size, 65536);
    assert_eq!(config.scripts_dir, PathBuf::from("/data/js"));
    assert_eq!(config.registry_path, Some(PathBuf::from("/data/registry.json")));
    assert!(!config.pre_relocate);
    assert_eq!(config.extra_atoms, ["relay", "buzzer"]);
    assert!(config.compile.narrow);
    assert!(config.compile.externalize);
    assert_eq!(config.compile.max_bytecode_size, 4096);
    assert_eq!(config.compile.target_base, 0);
}

#[test]
fn test_config_defaults() {
    let config = EngineConfig::from_toml_str("").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.partition_label, "js_user");
    assert_eq!(config.compile.max_bytecode_size, 1024 * 1024);

    assert!(matches!(
        EngineConfig::from_toml_str("partition_size = \"big\""),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_config_file() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "partition_size = 1024\n").unwrap();
    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.partition_size, 1024);

    let missing = file.path().with_extension("missing");
    assert!(matches!(EngineConfig::load(&missing), Err(ConfigError::Io(_))));
}

#[test]
fn test_reason_codes_are_stable() {
    for reason in ALL_REASONS {
        let json = serde_json::to_string(&reason).unwrap();
        assert_eq!(json, format!("\"{}\"", reason.as_str()));
        let back: LoadReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }
    assert_eq!(
        serde_json::to_string(&LoadReason::FirmwareMismatch).unwrap(),
        "\"firmware_mismatch\""
    );
    assert_eq!(
        serde_json::to_string(&LoadReason::WidthConversion).unwrap(),
        "\"width_conversion\""
    );
    assert_eq!(
        serde_json::to_string(&LoadReason::InternalDefect).unwrap(),
        "\"internal_defect\""
    );
    assert_eq!(
        serde_json::to_value(LoadState::Failed(LoadReason::Integrity)).unwrap(),
        serde_json::json!({ "failed": "integrity" })
    );
    assert_eq!(
        serde_json::to_value(LoadState::RelocationSkipped).unwrap(),
        serde_json::json!("relocation_skipped")
    );
}

#[test]
fn test_registry_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");

    let registry = Registry::new();
    registry
        .insert(BytecodeEntry {
            name: "blink".to_string(),
            offset: 0,
            size: 180,
            checksum: 0xDEAD_BEEF,
            flash_addr: 0x3F40_0030,
            version: 2,
            active: true,
        })
        .unwrap();
    registry.save(&path).unwrap();

    let loaded = Registry::load(&path).unwrap();
    assert_eq!(loaded.entries(), registry.entries());
    assert_eq!(loaded.find("blink").map(|e| e.checksum), Some(0xDEAD_BEEF));
}

#[test]
fn test_registry_rejects_bad_json() {
    assert!(matches!(
        Registry::from_json("{ not json"),
        Err(RegistryError::Json(_))
    ));

    let long = "n".repeat(MAX_NAME_LEN + 1);
    let json = format!(
        r#"{{"entries":[{{"name":"{long}","offset":0,"size":1,"checksum":0,"flash_addr":0,"version":1,"active":true}}]}}"#
    );
    assert!(matches!(
        Registry::from_json(&json),
        Err(RegistryError::NameTooLong { .. })
    ));
}

fn entry_strategy() -> impl Strategy<Value = (String, u32, u32, u32, u64, bool)> {
    (
        "[a-z_]{1,24}",
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
        any::<u64>(),
        any::<bool>(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_registry_json_round_trip(raw in prop::collection::vec(entry_strategy(), 0..8)) {
        let registry = Registry::new();
        for (i, (name, offset, size, checksum, flash_addr, active)) in raw.into_iter().enumerate() {
            registry.insert(BytecodeEntry {
                name: format!("{name}{i}"),
                offset,
                size,
                checksum,
                flash_addr,
                version: 2,
                active,
            }).unwrap();
        }

        let json = registry.to_json().unwrap();
        let back = Registry::from_json(&json).unwrap();
        prop_assert_eq!(back.entries(), registry.entries());
        prop_assert_eq!(back.active_count(), registry.active_count());
    }
}
