//! Bytecode interpreter
//!
//! Executes one function per Rust call frame. Registers and locals are plain
//! vectors sized from the Function block header; arguments land in the first
//! locals.

use std::sync::Arc;

use freebutton_bytecode::{Instruction, JumpOffset, LocalIndex, Register};

use crate::error::{VmError, VmResult};
use crate::runtime::Runtime;
use crate::unit::FunctionInfo;
use crate::value::{self, Closure, Value, number_to_string};

/// Nested calls allowed before `StackOverflow`
pub const MAX_CALL_DEPTH: usize = 64;

struct Frame {
    registers: Vec<Value>,
    locals: Vec<Value>,
}

impl Frame {
    fn new(info: &FunctionInfo, args: &[Value]) -> Self {
        let mut locals = vec![Value::Undefined; usize::from(info.local_count)];
        let params = usize::from(info.arg_count).min(locals.len());
        for (slot, arg) in locals.iter_mut().take(params).zip(args) {
            *slot = arg.clone();
        }
        Self {
            registers: vec![Value::Undefined; usize::from(info.register_count)],
            locals,
        }
    }

    #[inline]
    fn get(&self, reg: Register) -> VmResult<Value> {
        self.registers
            .get(usize::from(reg.0))
            .cloned()
            .ok_or_else(|| VmError::internal(format!("register r{} out of range", reg.0)))
    }

    #[inline]
    fn set(&mut self, reg: Register, value: Value) -> VmResult<()> {
        let slot = self
            .registers
            .get_mut(usize::from(reg.0))
            .ok_or_else(|| VmError::internal(format!("register r{} out of range", reg.0)))?;
        *slot = value;
        Ok(())
    }

    fn local(&self, idx: LocalIndex) -> VmResult<Value> {
        self.locals
            .get(usize::from(idx.0))
            .cloned()
            .ok_or_else(|| VmError::internal(format!("local {} out of range", idx.0)))
    }

    fn set_local(&mut self, idx: LocalIndex, value: Value) -> VmResult<()> {
        let slot = self
            .locals
            .get_mut(usize::from(idx.0))
            .ok_or_else(|| VmError::internal(format!("local {} out of range", idx.0)))?;
        *slot = value;
        Ok(())
    }

    fn arguments(&self, func: Register, argc: u8) -> VmResult<Vec<Value>> {
        let start = usize::from(func.0) + 1;
        self.registers
            .get(start..start + usize::from(argc))
            .map(<[Value]>::to_vec)
            .ok_or_else(|| VmError::internal("call arguments out of range"))
    }
}

/// Call any callable value
pub fn call_value(runtime: &mut Runtime, callee: &Value, args: &[Value]) -> VmResult<Value> {
    match callee {
        Value::Function(closure) => {
            runtime.enter_call()?;
            let result = execute(runtime, closure, args);
            runtime.exit_call();
            result
        }
        Value::Native(native) => {
            let func = Arc::clone(&native.func);
            runtime.enter_call()?;
            let result = func(runtime, args);
            runtime.exit_call();
            result
        }
        other => Err(VmError::type_error(format!("{} is not a function", other.describe()))),
    }
}

fn jump_target(index: usize, offset: JumpOffset, len: usize) -> VmResult<usize> {
    let target = index as i64 + i64::from(offset.0);
    if target < 0 || target as usize > len {
        return Err(VmError::internal(format!("jump from {index} out of bounds")));
    }
    Ok(target as usize)
}

/// Read `key` from `object`
pub fn get_property(object: &Value, key: &str) -> VmResult<Value> {
    match object {
        Value::Undefined | Value::Null => Err(VmError::type_error(format!(
            "Cannot read properties of {object} (reading '{key}')"
        ))),
        Value::Object(obj) => Ok(obj.get(key).unwrap_or_default()),
        Value::String(s) => {
            if key == "length" {
                return Ok(Value::Number(s.encode_utf16().count() as f64));
            }
            Ok(key
                .parse::<usize>()
                .ok()
                .and_then(|i| s.encode_utf16().nth(i))
                .map(|unit| Value::string(&String::from_utf16_lossy(&[unit])))
                .unwrap_or_default())
        }
        Value::Native(native) if key == "name" => Ok(Value::String(Arc::clone(&native.name))),
        Value::Function(closure) if key == "name" => Ok(closure
            .unit
            .function_name(closure.offset)
            .map(Value::String)
            .unwrap_or_else(|| Value::string(""))),
        _ => Ok(Value::Undefined),
    }
}

fn property_key(key: &Value) -> String {
    match key {
        Value::Number(n) => number_to_string(*n),
        other => other.display_string(),
    }
}

fn execute(runtime: &mut Runtime, closure: &Closure, args: &[Value]) -> VmResult<Value> {
    let unit = &closure.unit;
    let info = unit.function(closure.offset)?;
    let code = &info.code;
    let mut frame = Frame::new(&info, args);
    let mut pc = 0usize;

    macro_rules! arith {
        ($dst:expr, $lhs:expr, $rhs:expr, $op:tt) => {{
            let l = frame.get($lhs)?.to_number();
            let r = frame.get($rhs)?.to_number();
            frame.set($dst, Value::Number(l $op r))?;
        }};
    }

    macro_rules! relational {
        ($dst:expr, $lhs:expr, $rhs:expr, $pat:pat) => {{
            let ord = value::compare(&frame.get($lhs)?, &frame.get($rhs)?);
            frame.set($dst, Value::Boolean(matches!(ord, Some($pat))))?;
        }};
    }

    while let Some(&instruction) = code.get(pc) {
        let index = pc;
        pc += 1;

        match instruction {
            Instruction::LoadUndefined { dst } => frame.set(dst, Value::Undefined)?,
            Instruction::LoadNull { dst } => frame.set(dst, Value::Null)?,
            Instruction::LoadTrue { dst } => frame.set(dst, Value::Boolean(true))?,
            Instruction::LoadFalse { dst } => frame.set(dst, Value::Boolean(false))?,
            Instruction::LoadInt32 { dst, value } => frame.set(dst, Value::int32(value))?,
            Instruction::LoadNumber { dst, value } => frame.set(dst, Value::Number(value))?,
            Instruction::LoadString { dst, atom } => {
                let s = Arc::clone(unit.string(atom.0)?);
                frame.set(dst, Value::String(s))?;
            }

            Instruction::GetLocal { dst, idx } => {
                let v = frame.local(idx)?;
                frame.set(dst, v)?;
            }
            Instruction::SetLocal { idx, src } => {
                let v = frame.get(src)?;
                frame.set_local(idx, v)?;
            }
            Instruction::GetGlobal { dst, name } => {
                let name = unit.string(name.0)?;
                let v = runtime
                    .global(name)
                    .ok_or_else(|| VmError::reference_error(format!("{name} is not defined")))?;
                frame.set(dst, v)?;
            }
            Instruction::SetGlobal { name, src } => {
                let name = Arc::clone(unit.string(name.0)?);
                let v = frame.get(src)?;
                runtime.set_global_atom(name, v);
            }

            Instruction::Add { dst, lhs, rhs } => {
                let v = value::add(&frame.get(lhs)?, &frame.get(rhs)?);
                frame.set(dst, v)?;
            }
            Instruction::Sub { dst, lhs, rhs } => arith!(dst, lhs, rhs, -),
            Instruction::Mul { dst, lhs, rhs } => arith!(dst, lhs, rhs, *),
            Instruction::Div { dst, lhs, rhs } => arith!(dst, lhs, rhs, /),
            Instruction::Mod { dst, lhs, rhs } => arith!(dst, lhs, rhs, %),

            Instruction::Lt { dst, lhs, rhs } => relational!(dst, lhs, rhs, std::cmp::Ordering::Less),
            Instruction::Le { dst, lhs, rhs } => relational!(
                dst,
                lhs,
                rhs,
                std::cmp::Ordering::Less | std::cmp::Ordering::Equal
            ),
            Instruction::Gt { dst, lhs, rhs } => {
                relational!(dst, lhs, rhs, std::cmp::Ordering::Greater)
            }
            Instruction::Ge { dst, lhs, rhs } => relational!(
                dst,
                lhs,
                rhs,
                std::cmp::Ordering::Greater | std::cmp::Ordering::Equal
            ),
            Instruction::Eq { dst, lhs, rhs } => {
                let v = frame.get(lhs)?.loose_equals(&frame.get(rhs)?);
                frame.set(dst, Value::Boolean(v))?;
            }
            Instruction::Ne { dst, lhs, rhs } => {
                let v = !frame.get(lhs)?.loose_equals(&frame.get(rhs)?);
                frame.set(dst, Value::Boolean(v))?;
            }
            Instruction::StrictEq { dst, lhs, rhs } => {
                let v = frame.get(lhs)?.strict_equals(&frame.get(rhs)?);
                frame.set(dst, Value::Boolean(v))?;
            }
            Instruction::StrictNe { dst, lhs, rhs } => {
                let v = !frame.get(lhs)?.strict_equals(&frame.get(rhs)?);
                frame.set(dst, Value::Boolean(v))?;
            }

            Instruction::Neg { dst, src } => {
                let n = frame.get(src)?.to_number();
                frame.set(dst, Value::Number(-n))?;
            }
            Instruction::Not { dst, src } => {
                let b = frame.get(src)?.to_boolean();
                frame.set(dst, Value::Boolean(!b))?;
            }
            Instruction::TypeOf { dst, src } => {
                let t = frame.get(src)?.type_of();
                frame.set(dst, Value::string(t))?;
            }

            Instruction::GetPropConst { dst, obj, name } => {
                let key = unit.string(name.0)?;
                let v = get_property(&frame.get(obj)?, key)?;
                frame.set(dst, v)?;
            }
            Instruction::GetProp { dst, obj, key } => {
                let key = property_key(&frame.get(key)?);
                let v = get_property(&frame.get(obj)?, &key)?;
                frame.set(dst, v)?;
            }

            Instruction::Jump { offset } => pc = jump_target(index, offset, code.len())?,
            Instruction::JumpIfTrue { cond, offset } => {
                if frame.get(cond)?.to_boolean() {
                    pc = jump_target(index, offset, code.len())?;
                }
            }
            Instruction::JumpIfFalse { cond, offset } => {
                if !frame.get(cond)?.to_boolean() {
                    pc = jump_target(index, offset, code.len())?;
                }
            }

            Instruction::Closure { dst, func } => {
                let child = info
                    .children
                    .get(usize::from(func.0))
                    .copied()
                    .ok_or_else(|| VmError::internal(format!("function {} out of range", func.0)))?;
                frame.set(dst, Value::Function(Closure::new(Arc::clone(unit), child)))?;
            }
            Instruction::Call { dst, func, argc } => {
                let callee = frame.get(func)?;
                let call_args = frame.arguments(func, argc)?;
                let result = call_value(runtime, &callee, &call_args)?;
                frame.set(dst, result)?;
            }
            Instruction::Return { src } => return frame.get(src),
            Instruction::ReturnUndefined => return Ok(Value::Undefined),
            Instruction::Move { dst, src } => {
                let v = frame.get(src)?;
                frame.set(dst, v)?;
            }
        }
    }

    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::JsObject;

    #[test]
    fn test_jump_bounds() {
        assert_eq!(jump_target(3, JumpOffset(2), 10).unwrap(), 5);
        assert_eq!(jump_target(3, JumpOffset(-3), 10).unwrap(), 0);
        assert_eq!(jump_target(3, JumpOffset(7), 10).unwrap(), 10);
        assert!(jump_target(3, JumpOffset(-4), 10).is_err());
        assert!(jump_target(3, JumpOffset(8), 10).is_err());
    }

    #[test]
    fn test_property_reads() {
        let obj = Value::object(JsObject::new().with("id", Value::int32(7)));
        assert_eq!(get_property(&obj, "id").unwrap(), Value::int32(7));
        assert!(get_property(&obj, "missing").unwrap().is_undefined());

        let s = Value::string("héllo");
        assert_eq!(get_property(&s, "length").unwrap(), Value::int32(5));
        assert_eq!(get_property(&s, "1").unwrap(), Value::string("é"));

        let err = get_property(&Value::Undefined, "on").unwrap_err();
        assert_eq!(
            err,
            VmError::type_error("Cannot read properties of undefined (reading 'on')")
        );
    }

    #[test]
    fn test_calling_non_function() {
        let mut runtime = Runtime::new();
        let err = call_value(&mut runtime, &Value::int32(3), &[]).unwrap_err();
        assert_eq!(err, VmError::type_error("3 is not a function"));
    }
}
