//! Bytecode instructions (opcodes)
//!
//! Instructions are stored in Code blocks as an opcode byte followed by
//! fixed-size little-endian operands.

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::operand::{AtomIndex, FunctionIndex, JumpOffset, LocalIndex, Register};

/// Bytecode opcodes
///
/// Register-based instruction set. Most instructions take a destination register
/// and one or more source registers/operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Constants ====================
    /// Load undefined into register: dst = undefined
    LoadUndefined = 0x00,
    /// Load null into register: dst = null
    LoadNull = 0x01,
    /// Load true into register: dst = true
    LoadTrue = 0x02,
    /// Load false into register: dst = false
    LoadFalse = 0x03,
    /// Load integer immediate (32-bit): dst = imm32
    LoadInt32 = 0x05,
    /// Load float immediate: dst = f64
    LoadNumber = 0x06,
    /// Load string from the pool: dst = atoms\[idx\]
    LoadString = 0x07,

    // ==================== Variables ====================
    /// Load local variable: dst = locals\[idx\]
    GetLocal = 0x10,
    /// Store to local variable: locals\[idx\] = src
    SetLocal = 0x11,
    /// Load global variable: dst = globals\[name\]
    GetGlobal = 0x14,
    /// Store global variable: globals\[name\] = src
    SetGlobal = 0x15,

    // ==================== Arithmetic ====================
    /// Addition: dst = lhs + rhs
    Add = 0x20,
    /// Subtraction: dst = lhs - rhs
    Sub = 0x21,
    /// Multiplication: dst = lhs * rhs
    Mul = 0x22,
    /// Division: dst = lhs / rhs
    Div = 0x23,
    /// Modulo: dst = lhs % rhs
    Mod = 0x24,

    // ==================== Comparison ====================
    /// Less than: dst = lhs < rhs
    Lt = 0x30,
    /// Less or equal: dst = lhs <= rhs
    Le = 0x31,
    /// Greater than: dst = lhs > rhs
    Gt = 0x32,
    /// Greater or equal: dst = lhs >= rhs
    Ge = 0x33,
    /// Loose equality: dst = lhs == rhs
    Eq = 0x34,
    /// Loose inequality: dst = lhs != rhs
    Ne = 0x35,
    /// Strict equality: dst = lhs === rhs
    StrictEq = 0x36,
    /// Strict inequality: dst = lhs !== rhs
    StrictNe = 0x37,

    // ==================== Unary ====================
    /// Negation: dst = -src
    Neg = 0x40,
    /// Logical not: dst = !src
    Not = 0x41,
    /// Type name: dst = typeof src
    TypeOf = 0x42,

    // ==================== Properties ====================
    /// Named property: dst = obj\[atoms\[name\]\]
    GetPropConst = 0x50,
    /// Computed property: dst = obj\[key\]
    GetProp = 0x51,

    // ==================== Control flow ====================
    /// Unconditional jump
    Jump = 0x60,
    /// Jump if truthy
    JumpIfTrue = 0x61,
    /// Jump if falsy
    JumpIfFalse = 0x62,

    // ==================== Functions ====================
    /// Create closure from a child function: dst = closure(children\[func\])
    Closure = 0x70,
    /// Call: dst = func(func+1 .. func+argc)
    Call = 0x71,
    /// Return value
    Return = 0x72,
    /// Return undefined
    ReturnUndefined = 0x73,
    /// Copy register: dst = src
    Move = 0x74,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::LoadUndefined),
            0x01 => Some(Self::LoadNull),
            0x02 => Some(Self::LoadTrue),
            0x03 => Some(Self::LoadFalse),
            0x05 => Some(Self::LoadInt32),
            0x06 => Some(Self::LoadNumber),
            0x07 => Some(Self::LoadString),

            0x10 => Some(Self::GetLocal),
            0x11 => Some(Self::SetLocal),
            0x14 => Some(Self::GetGlobal),
            0x15 => Some(Self::SetGlobal),

            0x20 => Some(Self::Add),
            0x21 => Some(Self::Sub),
            0x22 => Some(Self::Mul),
            0x23 => Some(Self::Div),
            0x24 => Some(Self::Mod),

            0x30 => Some(Self::Lt),
            0x31 => Some(Self::Le),
            0x32 => Some(Self::Gt),
            0x33 => Some(Self::Ge),
            0x34 => Some(Self::Eq),
            0x35 => Some(Self::Ne),
            0x36 => Some(Self::StrictEq),
            0x37 => Some(Self::StrictNe),

            0x40 => Some(Self::Neg),
            0x41 => Some(Self::Not),
            0x42 => Some(Self::TypeOf),

            0x50 => Some(Self::GetPropConst),
            0x51 => Some(Self::GetProp),

            0x60 => Some(Self::Jump),
            0x61 => Some(Self::JumpIfTrue),
            0x62 => Some(Self::JumpIfFalse),

            0x70 => Some(Self::Closure),
            0x71 => Some(Self::Call),
            0x72 => Some(Self::Return),
            0x73 => Some(Self::ReturnUndefined),
            0x74 => Some(Self::Move),

            _ => None,
        }
    }

    /// Encode as a byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum Instruction {
    // Constants
    LoadUndefined { dst: Register },
    LoadNull { dst: Register },
    LoadTrue { dst: Register },
    LoadFalse { dst: Register },
    LoadInt32 { dst: Register, value: i32 },
    LoadNumber { dst: Register, value: f64 },
    LoadString { dst: Register, atom: AtomIndex },

    // Variables
    GetLocal { dst: Register, idx: LocalIndex },
    SetLocal { idx: LocalIndex, src: Register },
    GetGlobal { dst: Register, name: AtomIndex },
    SetGlobal { name: AtomIndex, src: Register },

    // Arithmetic
    Add { dst: Register, lhs: Register, rhs: Register },
    Sub { dst: Register, lhs: Register, rhs: Register },
    Mul { dst: Register, lhs: Register, rhs: Register },
    Div { dst: Register, lhs: Register, rhs: Register },
    Mod { dst: Register, lhs: Register, rhs: Register },

    // Comparison
    Lt { dst: Register, lhs: Register, rhs: Register },
    Le { dst: Register, lhs: Register, rhs: Register },
    Gt { dst: Register, lhs: Register, rhs: Register },
    Ge { dst: Register, lhs: Register, rhs: Register },
    Eq { dst: Register, lhs: Register, rhs: Register },
    Ne { dst: Register, lhs: Register, rhs: Register },
    StrictEq { dst: Register, lhs: Register, rhs: Register },
    StrictNe { dst: Register, lhs: Register, rhs: Register },

    // Unary
    Neg { dst: Register, src: Register },
    Not { dst: Register, src: Register },
    TypeOf { dst: Register, src: Register },

    // Properties
    GetPropConst { dst: Register, obj: Register, name: AtomIndex },
    GetProp { dst: Register, obj: Register, key: Register },

    // Control flow
    Jump { offset: JumpOffset },
    JumpIfTrue { cond: Register, offset: JumpOffset },
    JumpIfFalse { cond: Register, offset: JumpOffset },

    // Functions
    Closure { dst: Register, func: FunctionIndex },
    Call { dst: Register, func: Register, argc: u8 },
    Return { src: Register },
    ReturnUndefined,
    Move { dst: Register, src: Register },
}

impl Instruction {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::LoadUndefined { .. } => Opcode::LoadUndefined,
            Self::LoadNull { .. } => Opcode::LoadNull,
            Self::LoadTrue { .. } => Opcode::LoadTrue,
            Self::LoadFalse { .. } => Opcode::LoadFalse,
            Self::LoadInt32 { .. } => Opcode::LoadInt32,
            Self::LoadNumber { .. } => Opcode::LoadNumber,
            Self::LoadString { .. } => Opcode::LoadString,
            Self::GetLocal { .. } => Opcode::GetLocal,
            Self::SetLocal { .. } => Opcode::SetLocal,
            Self::GetGlobal { .. } => Opcode::GetGlobal,
            Self::SetGlobal { .. } => Opcode::SetGlobal,
            Self::Add { .. } => Opcode::Add,
            Self::Sub { .. } => Opcode::Sub,
            Self::Mul { .. } => Opcode::Mul,
            Self::Div { .. } => Opcode::Div,
            Self::Mod { .. } => Opcode::Mod,
            Self::Lt { .. } => Opcode::Lt,
            Self::Le { .. } => Opcode::Le,
            Self::Gt { .. } => Opcode::Gt,
            Self::Ge { .. } => Opcode::Ge,
            Self::Eq { .. } => Opcode::Eq,
            Self::Ne { .. } => Opcode::Ne,
            Self::StrictEq { .. } => Opcode::StrictEq,
            Self::StrictNe { .. } => Opcode::StrictNe,
            Self::Neg { .. } => Opcode::Neg,
            Self::Not { .. } => Opcode::Not,
            Self::TypeOf { .. } => Opcode::TypeOf,
            Self::GetPropConst { .. } => Opcode::GetPropConst,
            Self::GetProp { .. } => Opcode::GetProp,
            Self::Jump { .. } => Opcode::Jump,
            Self::JumpIfTrue { .. } => Opcode::JumpIfTrue,
            Self::JumpIfFalse { .. } => Opcode::JumpIfFalse,
            Self::Closure { .. } => Opcode::Closure,
            Self::Call { .. } => Opcode::Call,
            Self::Return { .. } => Opcode::Return,
            Self::ReturnUndefined => Opcode::ReturnUndefined,
            Self::Move { .. } => Opcode::Move,
        }
    }

    /// Append the encoded instruction to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode().to_byte());
        match *self {
            Self::LoadUndefined { dst }
            | Self::LoadNull { dst }
            | Self::LoadTrue { dst }
            | Self::LoadFalse { dst } => out.push(dst.0),
            Self::LoadInt32 { dst, value } => {
                out.push(dst.0);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Self::LoadNumber { dst, value } => {
                out.push(dst.0);
                out.extend_from_slice(&value.to_le_bytes());
            }
            Self::LoadString { dst, atom: name } | Self::GetGlobal { dst, name } => {
                out.push(dst.0);
                out.extend_from_slice(&name.0.to_le_bytes());
            }
            Self::GetLocal { dst, idx } => out.extend_from_slice(&[dst.0, idx.0]),
            Self::SetLocal { idx, src } => out.extend_from_slice(&[idx.0, src.0]),
            Self::SetGlobal { name, src } => {
                out.extend_from_slice(&name.0.to_le_bytes());
                out.push(src.0);
            }
            Self::Add { dst, lhs, rhs }
            | Self::Sub { dst, lhs, rhs }
            | Self::Mul { dst, lhs, rhs }
            | Self::Div { dst, lhs, rhs }
            | Self::Mod { dst, lhs, rhs }
            | Self::Lt { dst, lhs, rhs }
            | Self::Le { dst, lhs, rhs }
            | Self::Gt { dst, lhs, rhs }
            | Self::Ge { dst, lhs, rhs }
            | Self::Eq { dst, lhs, rhs }
            | Self::Ne { dst, lhs, rhs }
            | Self::StrictEq { dst, lhs, rhs }
            | Self::StrictNe { dst, lhs, rhs }
            | Self::GetProp {
                dst,
                obj: lhs,
                key: rhs,
            } => out.extend_from_slice(&[dst.0, lhs.0, rhs.0]),
            Self::Neg { dst, src }
            | Self::Not { dst, src }
            | Self::TypeOf { dst, src }
            | Self::Move { dst, src } => out.extend_from_slice(&[dst.0, src.0]),
            Self::GetPropConst { dst, obj, name } => {
                out.extend_from_slice(&[dst.0, obj.0]);
                out.extend_from_slice(&name.0.to_le_bytes());
            }
            Self::Jump { offset } => out.extend_from_slice(&offset.0.to_le_bytes()),
            Self::JumpIfTrue { cond, offset } | Self::JumpIfFalse { cond, offset } => {
                out.push(cond.0);
                out.extend_from_slice(&offset.0.to_le_bytes());
            }
            Self::Closure { dst, func } => {
                out.push(dst.0);
                out.extend_from_slice(&func.0.to_le_bytes());
            }
            Self::Call { dst, func, argc } => out.extend_from_slice(&[dst.0, func.0, argc]),
            Self::Return { src } => out.push(src.0),
            Self::ReturnUndefined => {}
        }
    }

    /// Decode one instruction at `*pos`, advancing it
    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Self> {
        let mut r = Reader { bytes, pos };
        let byte = r.u8()?;
        let opcode = Opcode::from_byte(byte).ok_or(BytecodeError::InvalidOpcode(byte))?;

        let instruction = match opcode {
            Opcode::LoadUndefined => Self::LoadUndefined { dst: r.reg()? },
            Opcode::LoadNull => Self::LoadNull { dst: r.reg()? },
            Opcode::LoadTrue => Self::LoadTrue { dst: r.reg()? },
            Opcode::LoadFalse => Self::LoadFalse { dst: r.reg()? },
            Opcode::LoadInt32 => Self::LoadInt32 {
                dst: r.reg()?,
                value: r.i32()?,
            },
            Opcode::LoadNumber => Self::LoadNumber {
                dst: r.reg()?,
                value: f64::from_le_bytes(r.array()?),
            },
            Opcode::LoadString => Self::LoadString {
                dst: r.reg()?,
                atom: AtomIndex(r.u32()?),
            },
            Opcode::GetLocal => Self::GetLocal {
                dst: r.reg()?,
                idx: LocalIndex(r.u8()?),
            },
            Opcode::SetLocal => Self::SetLocal {
                idx: LocalIndex(r.u8()?),
                src: r.reg()?,
            },
            Opcode::GetGlobal => Self::GetGlobal {
                dst: r.reg()?,
                name: AtomIndex(r.u32()?),
            },
            Opcode::SetGlobal => Self::SetGlobal {
                name: AtomIndex(r.u32()?),
                src: r.reg()?,
            },
            Opcode::Add => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Add { dst, lhs, rhs }
            }
            Opcode::Sub => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Sub { dst, lhs, rhs }
            }
            Opcode::Mul => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Mul { dst, lhs, rhs }
            }
            Opcode::Div => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Div { dst, lhs, rhs }
            }
            Opcode::Mod => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Mod { dst, lhs, rhs }
            }
            Opcode::Lt => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Lt { dst, lhs, rhs }
            }
            Opcode::Le => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Le { dst, lhs, rhs }
            }
            Opcode::Gt => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Gt { dst, lhs, rhs }
            }
            Opcode::Ge => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Ge { dst, lhs, rhs }
            }
            Opcode::Eq => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Eq { dst, lhs, rhs }
            }
            Opcode::Ne => {
                let (dst, lhs, rhs) = r.three()?;
                Self::Ne { dst, lhs, rhs }
            }
            Opcode::StrictEq => {
                let (dst, lhs, rhs) = r.three()?;
                Self::StrictEq { dst, lhs, rhs }
            }
            Opcode::StrictNe => {
                let (dst, lhs, rhs) = r.three()?;
                Self::StrictNe { dst, lhs, rhs }
            }
            Opcode::Neg => Self::Neg {
                dst: r.reg()?,
                src: r.reg()?,
            },
            Opcode::Not => Self::Not {
                dst: r.reg()?,
                src: r.reg()?,
            },
            Opcode::TypeOf => Self::TypeOf {
                dst: r.reg()?,
                src: r.reg()?,
            },
            Opcode::GetPropConst => Self::GetPropConst {
                dst: r.reg()?,
                obj: r.reg()?,
                name: AtomIndex(r.u32()?),
            },
            Opcode::GetProp => {
                let (dst, obj, key) = r.three()?;
                Self::GetProp { dst, obj, key }
            }
            Opcode::Jump => Self::Jump {
                offset: JumpOffset(r.i32()?),
            },
            Opcode::JumpIfTrue => Self::JumpIfTrue {
                cond: r.reg()?,
                offset: JumpOffset(r.i32()?),
            },
            Opcode::JumpIfFalse => Self::JumpIfFalse {
                cond: r.reg()?,
                offset: JumpOffset(r.i32()?),
            },
            Opcode::Closure => Self::Closure {
                dst: r.reg()?,
                func: FunctionIndex(u16::from_le_bytes(r.array()?)),
            },
            Opcode::Call => Self::Call {
                dst: r.reg()?,
                func: r.reg()?,
                argc: r.u8()?,
            },
            Opcode::Return => Self::Return { src: r.reg()? },
            Opcode::ReturnUndefined => Self::ReturnUndefined,
            Opcode::Move => Self::Move {
                dst: r.reg()?,
                src: r.reg()?,
            },
        };

        Ok(instruction)
    }
}

/// Encode a whole function body
pub fn encode_all(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instructions.len() * 4);
    for instruction in instructions {
        instruction.encode(&mut out);
    }
    out
}

/// Decode a whole Code block body
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Instruction>> {
    let mut pos = 0;
    let mut instructions = Vec::new();
    while pos < bytes.len() {
        instructions.push(Instruction::decode(bytes, &mut pos)?);
    }
    Ok(instructions)
}

struct Reader<'a, 'p> {
    bytes: &'a [u8],
    pos: &'p mut usize,
}

impl Reader<'_, '_> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let start = *self.pos;
        let slice = self
            .bytes
            .get(start..start + N)
            .ok_or(BytecodeError::UnexpectedEnd)?;
        *self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn reg(&mut self) -> Result<Register> {
        self.u8().map(Register)
    }

    fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32> {
        self.array().map(i32::from_le_bytes)
    }

    fn three(&mut self) -> Result<(Register, Register, Register)> {
        Ok((self.reg()?, self.reg()?, self.reg()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_byte() {
        assert_eq!(Opcode::from_byte(0x20), Some(Opcode::Add));
        assert_eq!(Opcode::from_byte(0x73), Some(Opcode::ReturnUndefined));
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_function_body_decodes() {
        let body = vec![
            Instruction::GetGlobal {
                dst: Register(0),
                name: AtomIndex(0),
            },
            Instruction::GetPropConst {
                dst: Register(1),
                obj: Register(0),
                name: AtomIndex(1),
            },
            Instruction::LoadInt32 {
                dst: Register(2),
                value: -7,
            },
            Instruction::LoadNumber {
                dst: Register(3),
                value: 2.5,
            },
            Instruction::Call {
                dst: Register(4),
                func: Register(1),
                argc: 1,
            },
            Instruction::JumpIfFalse {
                cond: Register(4),
                offset: JumpOffset(-3),
            },
            Instruction::Closure {
                dst: Register(5),
                func: FunctionIndex(2),
            },
            Instruction::ReturnUndefined,
        ];
        let bytes = encode_all(&body);
        assert_eq!(decode_all(&bytes).unwrap(), body);
    }

    #[test]
    fn test_truncated_operand() {
        let mut bytes = Vec::new();
        Instruction::LoadInt32 {
            dst: Register(0),
            value: 1,
        }
        .encode(&mut bytes);
        bytes.pop();
        assert_eq!(decode_all(&bytes), Err(BytecodeError::UnexpectedEnd));
        assert_eq!(decode_all(&[0xEE]), Err(BytecodeError::InvalidOpcode(0xEE)));
    }
}
