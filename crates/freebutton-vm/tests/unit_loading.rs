//! Loading units from owned copies and resident mappings

use std::sync::Arc;

use freebutton_bytecode::{
    BytecodeError, Container, SymbolTable, prepare, relocate_container_in_place, relocate_for_storage,
};
use freebutton_compiler::compile;
use freebutton_vm::{
    AtomTable, MemoryConsole, ResidentBytes, Runtime, STDLIB_ATOMS, UnitBuffer, VmError,
    load_bytecode, load_relocated,
};

/// Container with storage-relative pointers and ROM references against `atoms`
fn stored(source: &str, atoms: &AtomTable) -> Container {
    let unit = compile(source, "unit.js").unwrap();
    let container = prepare(&unit).unwrap();
    let symbols: &dyn SymbolTable = atoms;
    relocate_for_storage(&container, 0, Some(symbols)).unwrap()
}

#[derive(Debug)]
struct Mapping(Box<[u8]>);

impl ResidentBytes for Mapping {
    fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Place `container` in a fixed buffer, relocated for the address it landed at
fn map_in_place(container: &Container) -> Arc<Mapping> {
    let len = container.to_bytes().unwrap().len();
    let mut buffer = vec![0u8; len].into_boxed_slice();
    let base = container.data_base_for(buffer.as_ptr() as u64).unwrap();
    let placed = relocate_for_storage(container, base, None).unwrap();
    buffer.copy_from_slice(&placed.to_bytes().unwrap());
    Arc::new(Mapping(buffer))
}

/// Container bytes relocated for their own address with ROM slots resolved to live atoms
fn resolved_in_place(container: &Container, atoms: &AtomTable) -> Box<[u8]> {
    let mut bytes = container.to_bytes().unwrap().into_boxed_slice();
    let addr = bytes.as_ptr() as u64;
    relocate_container_in_place(&mut bytes, addr, atoms).unwrap();
    bytes
}

#[test]
fn test_owned_copy_resolves_rom_strings() {
    let atoms = Arc::new(AtomTable::standard());
    let container = stored(r#"led.on(1); print("hello");"#, &atoms);
    assert_eq!(container.rom_table.len(), 3);

    let bytes = container.to_bytes().unwrap();
    let (unit, summary) = load_relocated(&bytes, Arc::clone(&atoms)).unwrap();
    assert_eq!(summary.rom_slots, 3);
    assert!(!unit.is_resident());

    let strings: Vec<&str> = unit.strings().iter().map(|s| s.as_ref()).collect();
    for name in ["led", "on", "print", "hello"] {
        assert!(strings.contains(&name), "missing {name} in {strings:?}");
    }
}

#[test]
fn test_unrelocated_buffer_is_rejected() {
    let atoms = Arc::new(AtomTable::standard());
    let bytes = stored("led.on(1);", &atoms).to_bytes().unwrap();
    let err = load_bytecode(UnitBuffer::Owned(bytes.into_boxed_slice()), atoms).unwrap_err();
    assert!(
        matches!(err, VmError::RelocationMismatch { expected: 0, found } if found != 0),
        "unexpected {err:?}"
    );
}

#[test]
fn test_unknown_rom_index_is_rejected() {
    let extended = AtomTable::builder().with_stdlib().atom("relay").build();
    let container = stored("relay.on(1);", &extended);
    let bytes = container.to_bytes().unwrap();

    let err = load_relocated(&bytes, Arc::new(AtomTable::standard())).unwrap_err();
    assert_eq!(
        err,
        VmError::Bytecode(BytecodeError::RomResolution {
            index: STDLIB_ATOMS.len() as u16,
            available: STDLIB_ATOMS.len(),
        })
    );

    assert!(load_relocated(&bytes, Arc::new(extended)).is_ok());
}

#[test]
fn test_resident_mapping_runs_in_place() {
    let console = MemoryConsole::new();
    let mut runtime = Runtime::builder().console(Arc::new(console.clone())).build();
    let container = stored(r#"print("from flash", led.count());"#, runtime.atoms());
    let mapping = map_in_place(&container);

    let shared: Arc<dyn ResidentBytes> = mapping.clone();
    let unit = runtime.load(UnitBuffer::Resident(shared)).unwrap();
    assert!(unit.is_resident());
    assert_eq!(Arc::strong_count(&mapping), 2);

    runtime.run(&unit).unwrap();
    assert_eq!(console.lines(), ["from flash 8"]);

    drop(unit);
    assert_eq!(Arc::strong_count(&mapping), 1);
}

#[test]
fn test_callbacks_keep_mapping_alive() {
    let console = MemoryConsole::new();
    let mut runtime = Runtime::builder().console(Arc::new(console.clone())).build();
    let container = stored(r#"button.onClick(3, () => print("pressed"));"#, runtime.atoms());
    let mapping = map_in_place(&container);

    let unit = runtime.load(UnitBuffer::Resident(mapping.clone())).unwrap();
    runtime.run(&unit).unwrap();
    drop(unit);
    assert_eq!(Arc::strong_count(&mapping), 2);

    assert!(runtime.dispatch_button_click(3).unwrap());
    assert_eq!(console.lines(), ["pressed"]);
}

#[test]
fn test_functions_are_decoded_once() {
    let runtime = Runtime::new();
    let bytes = stored("function f(a, b) { return a + b; } f(1, 2);", runtime.atoms())
        .to_bytes()
        .unwrap();
    let unit = runtime.load_copy(&bytes).unwrap();

    let entry = unit.function(unit.entry_offset()).unwrap();
    let again = unit.function(unit.entry_offset()).unwrap();
    assert!(Arc::ptr_eq(&entry, &again));
    assert_eq!(entry.children.len(), 1);

    let child = unit.function(entry.children[0]).unwrap();
    assert_eq!(child.arg_count, 2);
    assert_eq!(child.name.as_deref(), Some("f"));
}

#[test]
fn test_corrupt_bytes_fail_cleanly() {
    let runtime = Runtime::new();
    let mut bytes = stored("led.on(1);", runtime.atoms()).to_bytes().unwrap();
    bytes.truncate(bytes.len() - 3);
    assert!(matches!(
        runtime.load_copy(&bytes),
        Err(VmError::Bytecode(_))
    ));
    assert!(matches!(
        runtime.load_copy(b"not a container"),
        Err(VmError::Bytecode(_))
    ));
}

#[test]
fn test_rom_slots_must_point_at_their_atom() {
    let atoms = Arc::new(AtomTable::standard());
    let container = stored("led.on(1);", &atoms);
    let entry = container.rom_table.entries()[0];
    let slot = container.data_offset() + entry.bytecode_offset as usize;

    let live = resolved_in_place(&container, &atoms);
    let word = u64::from_le_bytes(live[slot..slot + 8].try_into().unwrap());
    assert_eq!(atoms.index_of_address(word), Some(entry.rom_index));
    let unit = load_bytecode(UnitBuffer::Resident(Arc::new(Mapping(live))), atoms.clone()).unwrap();
    assert!(unit.strings().iter().any(|s| s.as_ref() == "led"));

    let mut wrong = resolved_in_place(&container, &atoms);
    let other = atoms.address_of(entry.rom_index + 1).unwrap();
    wrong[slot..slot + 8].copy_from_slice(&other.to_le_bytes());
    let err = load_bytecode(UnitBuffer::Resident(Arc::new(Mapping(wrong))), atoms.clone()).unwrap_err();
    assert!(
        matches!(
            err,
            VmError::Bytecode(BytecodeError::TraversalInconsistency { offset, .. })
                if offset == u64::from(entry.bytecode_offset)
        ),
        "unexpected {err:?}"
    );

    // Resolved against another table instance: same names, different addresses
    let foreign = resolved_in_place(&container, &AtomTable::standard());
    let err = load_bytecode(UnitBuffer::Resident(Arc::new(Mapping(foreign))), atoms).unwrap_err();
    assert!(matches!(err, VmError::Bytecode(BytecodeError::TraversalInconsistency { .. })));
}
