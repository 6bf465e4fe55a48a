//! Container codec: compiled unit to container and back

use crate::error::{BytecodeError, Result};
use crate::header::{BytecodeHeader, BytecodeVersion};
use crate::image::{self, BlockTag, CompiledUnit, SlotDescriptor};
use crate::rom::RomTable;
use crate::width::PointerWidth;

/// Header, ROM table and data section of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Header
    pub header: BytecodeHeader,
    /// ROM translation table, empty for v1
    pub rom_table: RomTable,
    /// Data section
    pub data: Vec<u8>,
}

impl Container {
    /// Check that header, table and data agree
    pub fn validate(&self) -> Result<()> {
        let header = &self.header;
        if header.version == BytecodeVersion::V1 && !self.rom_table.is_empty() {
            return Err(BytecodeError::format("v1 container carries a ROM table"));
        }
        if usize::from(header.rom_atom_count) != self.rom_table.len() {
            return Err(BytecodeError::format(format!(
                "header declares {} ROM entries, table holds {}",
                header.rom_atom_count,
                self.rom_table.len()
            )));
        }
        if header.data_len != self.data.len() as u64 {
            return Err(BytecodeError::inconsistency(
                0,
                format!(
                    "header declares {} data bytes, section holds {}",
                    header.data_len,
                    self.data.len()
                ),
            ));
        }
        Ok(())
    }

    /// Offset of the data section from the first container byte
    pub fn data_offset(&self) -> usize {
        self.header.data_offset()
    }

    /// Address of the data section when the container starts at `container_addr`
    pub fn data_base_for(&self, container_addr: u64) -> Result<u64> {
        container_addr
            .checked_add(self.data_offset() as u64)
            .ok_or(BytecodeError::width("data base address", container_addr, 64))
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut out = Vec::with_capacity(self.data_offset() + self.data.len());
        self.header.encode(&mut out)?;
        self.rom_table.encode(&mut out);
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Parse bytes into an owned container
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ContainerView::parse(bytes).map(ContainerView::into_owned)
    }
}

/// Borrowed view over container bytes
#[derive(Debug, Clone)]
pub struct ContainerView<'a> {
    /// Header
    pub header: BytecodeHeader,
    /// ROM translation table
    pub rom_table: RomTable,
    /// Data section
    pub data: &'a [u8],
}

impl<'a> ContainerView<'a> {
    /// Parse header and ROM table, borrowing the data section
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = BytecodeHeader::decode(bytes)?;
        let table_start = header.header_len();
        let rom_table = match header.version {
            BytecodeVersion::V1 => RomTable::new(),
            BytecodeVersion::V2 => RomTable::decode(
                bytes.get(table_start..).ok_or(BytecodeError::UnexpectedEnd)?,
                header.rom_atom_count,
            )?,
        };
        let start = header.data_offset();
        let end = header.total_len().ok_or(BytecodeError::UnexpectedEnd)?;
        let data = bytes.get(start..end).ok_or(BytecodeError::UnexpectedEnd)?;
        Ok(Self {
            header,
            rom_table,
            data,
        })
    }

    /// Offset of the data section from the first container byte
    pub fn data_offset(&self) -> usize {
        self.header.data_offset()
    }

    /// Copy into an owned container
    pub fn into_owned(self) -> Container {
        Container {
            header: self.header,
            rom_table: self.rom_table,
            data: self.data.to_vec(),
        }
    }
}

/// Flatten a compiled unit into a v1 container at the unit's own base.
///
/// The tag walk of the image must reproduce the unit's recorded slots exactly.
pub fn prepare(unit: &CompiledUnit) -> Result<Container> {
    let data = unit.memory();
    let layout = image::scan(data, unit.width(), unit.base_addr(), &RomTable::new())?;

    let walked = layout.slots().iter().map(|s| SlotDescriptor {
        offset: s.offset,
        kind: s.kind,
    });
    let mut recorded = unit.slots().iter().copied();
    for found in walked {
        match recorded.next() {
            Some(expected) if expected == found => {}
            Some(expected) => {
                return Err(BytecodeError::inconsistency(
                    found.offset,
                    format!("tag walk found {found:?}, unit recorded {expected:?}"),
                ));
            }
            None => {
                return Err(BytecodeError::inconsistency(
                    found.offset,
                    "slot missing from the unit's side table",
                ));
            }
        }
    }
    if let Some(extra) = recorded.next() {
        return Err(BytecodeError::inconsistency(
            extra.offset,
            "recorded slot not reached by the tag walk",
        ));
    }

    layout.expect_block(unit.entry_offset(), BlockTag::Function)?;
    layout.expect_block(unit.string_pool_offset(), BlockTag::StringPool)?;

    let header = BytecodeHeader {
        version: BytecodeVersion::V1,
        width: unit.width(),
        base_addr: unit.base_addr(),
        entry_offset: unit.entry_offset(),
        string_pool_offset: unit.string_pool_offset(),
        data_len: data.len() as u64,
        rom_atom_count: 0,
        reserved: 0,
    };
    header.encode(&mut Vec::with_capacity(header.header_len()))?;

    Ok(Container {
        header,
        rom_table: RomTable::new(),
        data: data.to_vec(),
    })
}

/// Re-encode a compiled unit as a position-independent 32-bit container
pub fn prepare_narrow(unit: &CompiledUnit) -> Result<Container> {
    if unit.width() == PointerWidth::W4 && unit.base_addr() == 0 {
        return prepare(unit);
    }
    let layout = image::scan(unit.memory(), unit.width(), unit.base_addr(), &RomTable::new())?;
    let narrow = image::rebuild(
        unit.memory(),
        &layout,
        unit.width(),
        PointerWidth::W4,
        unit.entry_offset(),
        unit.string_pool_offset(),
        0,
    )?;
    prepare(&narrow)
}

/// Cheap check whether `bytes` start with a container
pub fn is_container(bytes: &[u8]) -> bool {
    let Ok(header) = BytecodeHeader::decode(bytes) else {
        return false;
    };
    header.entry_offset < header.data_len
        && header.string_pool_offset < header.data_len
        && header.total_len().is_some_and(|len| bytes.len() >= len)
}
