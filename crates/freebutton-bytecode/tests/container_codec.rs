//! Container codec tests

use freebutton_bytecode::{
    BlockTag, BytecodeError, BytecodeHeader, BytecodeVersion, CompiledUnit, Container, FunctionBlock,
    ImageBuilder, Instruction, PointerWidth, Register, RomTable, image, instruction, is_container,
    prepare, prepare_narrow,
};
use proptest::prelude::*;

fn build(width: PointerWidth, base: Option<u64>, strings: &[&str]) -> CompiledUnit {
    let mut b = ImageBuilder::new(width);
    let ids: Vec<_> = strings.iter().map(|s| b.add_string(s.as_bytes())).collect();
    let pool = b.add_string_pool(ids);
    let body = instruction::encode_all(&[
        Instruction::LoadInt32 {
            dst: Register(0),
            value: 42,
        },
        Instruction::Return { src: Register(0) },
    ]);
    let code = b.add_code(body);
    let child = b.add_function(FunctionBlock {
        arg_count: 1,
        register_count: 1,
        local_count: 1,
        name_atom: Some(0),
        code,
        children: vec![],
    });
    let main_code = b.add_code(instruction::encode_all(&[Instruction::ReturnUndefined]));
    let main = b.add_function(FunctionBlock {
        arg_count: 0,
        register_count: 2,
        local_count: 0,
        name_atom: None,
        code: main_code,
        children: vec![child],
    });
    match base {
        Some(base) => b.finish_at(main, pool, base).unwrap(),
        None => b.finish(main, pool).unwrap(),
    }
}

#[test]
fn test_prepare_uses_unit_base() {
    let unit = build(PointerWidth::native(), None, &["led", "on"]);
    let container = prepare(&unit).unwrap();

    assert_eq!(container.header.version, BytecodeVersion::V1);
    assert_eq!(container.header.base_addr, unit.memory().as_ptr() as u64);
    assert_eq!(container.header.entry_offset, unit.entry_offset());
    assert_eq!(container.header.data_len, unit.memory().len() as u64);
    assert!(container.rom_table.is_empty());
    assert_eq!(container.data, unit.memory());
}

#[test]
fn test_prepare_is_deterministic() {
    let unit = build(PointerWidth::W4, Some(0x2000), &["a", "b", "c"]);
    assert_eq!(prepare(&unit).unwrap(), prepare(&unit).unwrap());
}

#[test]
fn test_container_bytes_parse_back() {
    let unit = build(PointerWidth::W8, Some(0), &["print"]);
    let container = prepare(&unit).unwrap();
    let bytes = container.to_bytes().unwrap();

    assert_eq!(bytes.len(), 40 + unit.memory().len());
    assert!(is_container(&bytes));
    assert_eq!(Container::from_bytes(&bytes).unwrap(), container);
}

#[test]
fn test_prepare_narrow_from_native_unit() {
    let unit = build(PointerWidth::W8, Some(0x7fff_0000_0000), &["led", "setColor"]);
    let narrow = prepare_narrow(&unit).unwrap();

    assert_eq!(narrow.header.width, PointerWidth::W4);
    assert_eq!(narrow.header.base_addr, 0);
    assert!(narrow.data.len() < unit.memory().len());

    let layout = image::scan(&narrow.data, PointerWidth::W4, 0, &RomTable::new()).unwrap();
    assert_eq!(layout.slots().len(), unit.slots().len());
    let strings: Vec<&[u8]> = layout
        .blocks()
        .iter()
        .filter(|b| b.tag == BlockTag::String)
        .map(|b| image::block_bytes(&narrow.data, PointerWidth::W4, b.offset, BlockTag::String).unwrap())
        .collect();
    assert_eq!(strings, vec![b"led".as_slice(), b"setColor".as_slice()]);

    let main = image::read_function(&narrow.data, PointerWidth::W4, narrow.header.entry_offset).unwrap();
    assert_eq!(main.register_count, 2);
    assert_eq!(main.child_slots.len(), 1);
}

#[test]
fn test_narrow_builder_rejects_high_base() {
    let mut b = ImageBuilder::new(PointerWidth::W4);
    let s = b.add_string("x");
    let pool = b.add_string_pool(vec![s]);
    let code = b.add_code(vec![0x73]);
    let main = b.add_function(FunctionBlock {
        arg_count: 0,
        register_count: 0,
        local_count: 0,
        name_atom: None,
        code,
        children: vec![],
    });
    let err = b.finish_at(main, pool, 0xFFFF_FFF0).unwrap_err();
    assert!(matches!(err, BytecodeError::WidthConversion { bits: 32, .. }));
}

#[test]
fn test_is_container_rejects_script_source() {
    assert!(!is_container(b"let x = 1;"));
    assert!(!is_container(b"led.on(1); led.off(2);"));
    assert!(!is_container(b""));
    assert!(!is_container(&[0xFB]));
}

#[test]
fn test_is_container_rejects_truncated() {
    let unit = build(PointerWidth::W4, Some(0), &["on"]);
    let bytes = prepare(&unit).unwrap().to_bytes().unwrap();
    assert!(!is_container(&bytes[..bytes.len() - 1]));
    assert!(!is_container(&bytes[..BytecodeHeader::encoded_len(BytecodeVersion::V1, PointerWidth::W4)]));
}

#[test]
fn test_from_bytes_rejects_bad_version() {
    let unit = build(PointerWidth::W4, Some(0), &["on"]);
    let mut bytes = prepare(&unit).unwrap().to_bytes().unwrap();
    bytes[2] = 9;
    assert!(matches!(
        Container::from_bytes(&bytes),
        Err(BytecodeError::Format(_))
    ));
}

proptest! {
    #[test]
    fn prop_text_is_never_a_container(source in ".*") {
        prop_assert!(!is_container(source.as_bytes()));
    }

    #[test]
    fn prop_foreign_prefix_is_never_a_container(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        prop_assume!(bytes.len() < 2 || bytes[0] != 0xFB || bytes[1] != 0xAC);
        prop_assert!(!is_container(&bytes));
    }
}
