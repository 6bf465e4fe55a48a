//! Pointer width of a container

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};

/// Width of every pointer-sized word in a container.
///
/// The header and the data section share one width. A container produced on a
/// 64-bit host for a 32-bit target is re-encoded with [`PointerWidth::W4`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerWidth {
    /// 32-bit words
    W4,
    /// 64-bit words
    W8,
}

impl PointerWidth {
    /// Width of the running process
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::W8
        } else {
            Self::W4
        }
    }

    /// Word size in bytes
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::W4 => 4,
            Self::W8 => 8,
        }
    }

    /// Word size in bits
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W4 => 32,
            Self::W8 => 64,
        }
    }

    /// Decode the width byte stored in a header
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            4 => Some(Self::W4),
            8 => Some(Self::W8),
            _ => None,
        }
    }

    /// Encode as the width byte stored in a header
    #[inline]
    pub const fn to_byte(self) -> u8 {
        self.bytes() as u8
    }

    /// Largest value a word can hold
    #[inline]
    pub const fn max_value(self) -> u64 {
        match self {
            Self::W4 => u32::MAX as u64,
            Self::W8 => u64::MAX,
        }
    }

    /// Ensure `value` fits a word
    pub fn check(self, what: &'static str, value: u64) -> Result<u64> {
        if value > self.max_value() {
            return Err(BytecodeError::width(what, value, self.bits()));
        }
        Ok(value)
    }

    /// Round `n` up to a multiple of the word size
    #[inline]
    pub const fn align_up(self, n: u64) -> u64 {
        let w = self.bytes() as u64;
        n.div_ceil(w) * w
    }

    /// Read the little-endian word at `offset`
    pub fn read_word(self, buf: &[u8], offset: u64) -> Result<u64> {
        let start = usize::try_from(offset).map_err(|_| BytecodeError::UnexpectedEnd)?;
        let end = start
            .checked_add(self.bytes())
            .ok_or(BytecodeError::UnexpectedEnd)?;
        let bytes = buf.get(start..end).ok_or(BytecodeError::UnexpectedEnd)?;
        let mut raw = [0u8; 8];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Write `value` as a little-endian word at `offset`
    pub fn write_word(self, buf: &mut [u8], offset: u64, what: &'static str, value: u64) -> Result<()> {
        let value = self.check(what, value)?;
        let start = usize::try_from(offset).map_err(|_| BytecodeError::UnexpectedEnd)?;
        let end = start
            .checked_add(self.bytes())
            .ok_or(BytecodeError::UnexpectedEnd)?;
        let slot = buf.get_mut(start..end).ok_or(BytecodeError::UnexpectedEnd)?;
        slot.copy_from_slice(&value.to_le_bytes()[..self.bytes()]);
        Ok(())
    }

    /// Append `value` as a little-endian word
    pub fn push_word(self, out: &mut Vec<u8>, what: &'static str, value: u64) -> Result<()> {
        let value = self.check(what, value)?;
        out.extend_from_slice(&value.to_le_bytes()[..self.bytes()]);
        Ok(())
    }
}
