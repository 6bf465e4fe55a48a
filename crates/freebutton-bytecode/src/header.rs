//! Container header
//!
//! Little-endian layout, `W` being the pointer width:
//!
//! ```text
//! 0   magic        u16   bytes FB AC
//! 2   version      u8    1 = no ROM table, 2 = ROM table follows
//! 3   width        u8    4 | 8
//!     [W == 8: 4 bytes padding]
//!     base_addr            W
//!     entry_offset         W
//!     string_pool_offset   W
//!     data_len             W
//!     [v2: rom_atom_count u16, reserved u16, W == 8: 4 bytes padding]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::rom::ROM_ENTRY_SIZE;
use crate::width::PointerWidth;

/// Magic number; its first byte (0xFB) never starts a UTF-8 sequence
pub const MAGIC: u16 = 0xACFB;

/// Format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BytecodeVersion {
    /// No ROM translation table
    V1 = 1,
    /// ROM translation table follows the header
    V2 = 2,
}

impl BytecodeVersion {
    /// Decode a version byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }
}

/// Fixed-size record at the start of every container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeHeader {
    /// Format version
    pub version: BytecodeVersion,
    /// Width of every word in the container
    pub width: PointerWidth,
    /// Address the data-section pointers are expressed against, 0 when position independent
    pub base_addr: u64,
    /// Offset of the top-level function block
    pub entry_offset: u64,
    /// Offset of the string pool block
    pub string_pool_offset: u64,
    /// Length of the data section in bytes
    pub data_len: u64,
    /// Number of ROM table entries (v2 only)
    pub rom_atom_count: u16,
    /// Reserved (v2 only)
    pub reserved: u16,
}

impl BytecodeHeader {
    /// Encoded size of a header
    pub const fn encoded_len(version: BytecodeVersion, width: PointerWidth) -> usize {
        let words = match width {
            PointerWidth::W4 => 4 + 4 * 4,
            PointerWidth::W8 => 8 + 4 * 8,
        };
        match (version, width) {
            (BytecodeVersion::V1, _) => words,
            (BytecodeVersion::V2, PointerWidth::W4) => words + 4,
            (BytecodeVersion::V2, PointerWidth::W8) => words + 8,
        }
    }

    /// Encoded size of this header
    #[inline]
    pub const fn header_len(&self) -> usize {
        Self::encoded_len(self.version, self.width)
    }

    /// Offset of the first data byte from the start of the container
    pub fn data_offset(&self) -> usize {
        self.header_len() + usize::from(self.rom_atom_count) * ROM_ENTRY_SIZE
    }

    /// Total container length declared by this header
    pub fn total_len(&self) -> Option<usize> {
        let data_len = usize::try_from(self.data_len).ok()?;
        self.data_offset().checked_add(data_len)
    }

    fn first_word(&self) -> u64 {
        match self.width {
            PointerWidth::W4 => 4,
            PointerWidth::W8 => 8,
        }
    }

    /// Encode the header, appending it to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.version == BytecodeVersion::V1 && (self.rom_atom_count != 0 || self.reserved != 0) {
            return Err(BytecodeError::format(
                "v1 header cannot carry ROM table fields",
            ));
        }

        let start = out.len();
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(self.version as u8);
        out.push(self.width.to_byte());
        if self.width == PointerWidth::W8 {
            out.extend_from_slice(&[0; 4]);
        }

        let w = self.width;
        w.push_word(out, "base address", self.base_addr)?;
        w.push_word(out, "entry offset", self.entry_offset)?;
        w.push_word(out, "string pool offset", self.string_pool_offset)?;
        w.push_word(out, "data length", self.data_len)?;

        if self.version == BytecodeVersion::V2 {
            out.extend_from_slice(&self.rom_atom_count.to_le_bytes());
            out.extend_from_slice(&self.reserved.to_le_bytes());
            if self.width == PointerWidth::W8 {
                out.extend_from_slice(&[0; 4]);
            }
        }

        debug_assert_eq!(out.len() - start, self.header_len());
        Ok(())
    }

    /// Overwrite the header at the start of `buf`
    pub fn write_into(&self, buf: &mut [u8]) -> Result<()> {
        let mut encoded = Vec::with_capacity(self.header_len());
        self.encode(&mut encoded)?;
        let dst = buf
            .get_mut(..encoded.len())
            .ok_or(BytecodeError::UnexpectedEnd)?;
        dst.copy_from_slice(&encoded);
        Ok(())
    }

    /// Decode a header from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let prefix = bytes.get(..4).ok_or(BytecodeError::UnexpectedEnd)?;
        let magic = u16::from_le_bytes([prefix[0], prefix[1]]);
        if magic != MAGIC {
            return Err(BytecodeError::format(format!("bad magic {magic:#06x}")));
        }
        let version = BytecodeVersion::from_byte(prefix[2])
            .ok_or_else(|| BytecodeError::format(format!("unsupported version {}", prefix[2])))?;
        let width = PointerWidth::from_byte(prefix[3])
            .ok_or_else(|| BytecodeError::format(format!("unsupported pointer width {}", prefix[3])))?;

        let len = Self::encoded_len(version, width);
        if bytes.len() < len {
            return Err(BytecodeError::UnexpectedEnd);
        }

        let mut header = Self {
            version,
            width,
            base_addr: 0,
            entry_offset: 0,
            string_pool_offset: 0,
            data_len: 0,
            rom_atom_count: 0,
            reserved: 0,
        };
        let w = width.bytes() as u64;
        let first = header.first_word();
        header.base_addr = width.read_word(bytes, first)?;
        header.entry_offset = width.read_word(bytes, first + w)?;
        header.string_pool_offset = width.read_word(bytes, first + 2 * w)?;
        header.data_len = width.read_word(bytes, first + 3 * w)?;

        if version == BytecodeVersion::V2 {
            let at = (first + 4 * w) as usize;
            header.rom_atom_count = u16::from_le_bytes([bytes[at], bytes[at + 1]]);
            header.reserved = u16::from_le_bytes([bytes[at + 2], bytes[at + 3]]);
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(version: BytecodeVersion, width: PointerWidth) -> BytecodeHeader {
        BytecodeHeader {
            version,
            width,
            base_addr: 0x4000_0000,
            entry_offset: 0x40,
            string_pool_offset: 0x10,
            data_len: 0x80,
            rom_atom_count: if version == BytecodeVersion::V2 { 3 } else { 0 },
            reserved: 0,
        }
    }

    #[test]
    fn test_header_sizes() {
        use BytecodeVersion::*;
        use PointerWidth::*;
        assert_eq!(BytecodeHeader::encoded_len(V1, W4), 20);
        assert_eq!(BytecodeHeader::encoded_len(V2, W4), 24);
        assert_eq!(BytecodeHeader::encoded_len(V1, W8), 40);
        assert_eq!(BytecodeHeader::encoded_len(V2, W8), 48);
    }

    #[test]
    fn test_header_encode_decode() {
        for version in [BytecodeVersion::V1, BytecodeVersion::V2] {
            for width in [PointerWidth::W4, PointerWidth::W8] {
                let header = sample(version, width);
                let mut out = Vec::new();
                header.encode(&mut out).unwrap();
                assert_eq!(out.len(), header.header_len());
                assert_eq!(&out[..2], &[0xFB, 0xAC]);
                assert_eq!(BytecodeHeader::decode(&out).unwrap(), header);
            }
        }
    }

    #[test]
    fn test_v1_rejects_rom_count() {
        let mut header = sample(BytecodeVersion::V1, PointerWidth::W4);
        header.rom_atom_count = 1;
        assert!(matches!(
            header.encode(&mut Vec::new()),
            Err(BytecodeError::Format(_))
        ));
    }

    #[test]
    fn test_narrow_header_rejects_wide_base() {
        let mut header = sample(BytecodeVersion::V1, PointerWidth::W4);
        header.base_addr = 0x1_0000_0000;
        assert!(matches!(
            header.encode(&mut Vec::new()),
            Err(BytecodeError::WidthConversion { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_source_text() {
        assert!(BytecodeHeader::decode(b"let x = 1;").is_err());
        assert!(BytecodeHeader::decode(&[0xFB, 0xAC, 3, 4]).is_err());
        assert!(matches!(
            BytecodeHeader::decode(&[0xFB, 0xAC, 1, 4, 0]),
            Err(BytecodeError::UnexpectedEnd)
        ));
    }
}
