//! Bytecode generation state

use freebutton_bytecode::{
    AtomIndex, CompiledUnit, FunctionBlock, FunctionIndex, ImageBuilder, Instruction, JumpOffset,
    LocalIndex, PointerWidth, Register, instruction,
};
use rustc_hash::FxHashMap;

use crate::error::{CompileError, CompileResult};
use crate::scope::{DeclKind, ResolvedBinding, ScopeChain};

/// Registers available to one function
const MAX_REGISTERS: u16 = 255;

/// Register allocator
///
/// Registers are handed out as a stack. An expression's result is the first
/// register it allocates and everything above it is free again afterwards.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    next: u16,
    max: u16,
}

impl RegisterAllocator {
    /// Create a new register allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a register
    pub fn alloc(&mut self) -> CompileResult<Register> {
        if self.next >= MAX_REGISTERS {
            return Err(CompileError::TooManyRegisters);
        }
        let reg = Register(self.next as u8);
        self.next += 1;
        self.max = self.max.max(self.next);
        Ok(reg)
    }

    /// Get current position (for restoring later)
    pub fn position(&self) -> u16 {
        self.next
    }

    /// Restore to a previous position
    pub fn restore(&mut self, pos: u16) {
        self.next = pos;
    }

    /// Free everything above `reg`
    pub fn keep(&mut self, reg: Register) {
        self.next = u16::from(reg.0) + 1;
    }

    /// Get maximum registers used
    pub fn max_used(&self) -> u16 {
        self.max
    }
}

/// Pending jumps of the innermost loop
#[derive(Debug, Default)]
pub struct LoopLabels {
    /// `break` jumps to patch with the loop exit
    pub breaks: Vec<usize>,
    /// `continue` jumps to patch with the continue target
    pub continues: Vec<usize>,
}

/// A finished function waiting to be laid out
#[derive(Debug)]
pub struct FunctionDraft {
    /// Name as a string pool index
    pub name_atom: Option<u32>,
    /// Declared parameter count
    pub arg_count: u8,
    /// Registers used
    pub register_count: u8,
    /// Local slots used
    pub local_count: u8,
    /// Body
    pub instructions: Vec<Instruction>,
    /// Indices of nested functions in the draft list
    pub children: Vec<usize>,
}

/// Function being compiled
#[derive(Debug)]
pub struct FunctionContext {
    /// Function name
    pub name: Option<String>,
    /// Top-level code, whose declarations become globals
    pub top_level: bool,
    /// Instructions
    pub instructions: Vec<Instruction>,
    /// Register allocator
    pub registers: RegisterAllocator,
    /// Scope chain
    pub scopes: ScopeChain,
    /// Number of parameters
    pub param_count: u8,
    /// Nested functions, by draft index
    pub children: Vec<usize>,
    /// Enclosing loops, innermost last
    pub loops: Vec<LoopLabels>,
}

impl FunctionContext {
    /// Create a new function context
    pub fn new(name: Option<String>) -> Self {
        let mut scopes = ScopeChain::new();
        scopes.enter(true);

        Self {
            name,
            top_level: false,
            instructions: Vec::new(),
            registers: RegisterAllocator::new(),
            scopes,
            param_count: 0,
            children: Vec::new(),
            loops: Vec::new(),
        }
    }

    /// Context for top-level code
    pub fn top_level() -> Self {
        Self {
            top_level: true,
            ..Self::new(None)
        }
    }

    /// Emit an instruction
    pub fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Get current instruction index (for patching jumps)
    pub fn current_index(&self) -> usize {
        self.instructions.len()
    }

    /// Point the jump at `index` to `target`
    pub fn patch_jump(&mut self, index: usize, target: usize) -> CompileResult<()> {
        let offset = JumpOffset(jump_distance(index, target)?);
        match self.instructions.get_mut(index) {
            Some(Instruction::Jump { offset: o })
            | Some(Instruction::JumpIfTrue { offset: o, .. })
            | Some(Instruction::JumpIfFalse { offset: o, .. }) => {
                *o = offset;
                Ok(())
            }
            _ => Err(CompileError::internal(format!(
                "instruction {index} is not a jump"
            ))),
        }
    }

    fn into_draft(self, name_atom: Option<u32>) -> CompileResult<FunctionDraft> {
        let local_count =
            u8::try_from(self.scopes.local_count()).map_err(|_| CompileError::TooManyLocals)?;
        let register_count = u8::try_from(self.registers.max_used())
            .map_err(|_| CompileError::TooManyRegisters)?;
        Ok(FunctionDraft {
            name_atom,
            arg_count: self.param_count,
            register_count,
            local_count,
            instructions: self.instructions,
            children: self.children,
        })
    }
}

fn jump_distance(from: usize, to: usize) -> CompileResult<i32> {
    let distance = to as i64 - from as i64;
    i32::try_from(distance).map_err(|_| CompileError::internal("jump distance overflow"))
}

/// Code generator state
#[derive(Debug)]
pub struct CodeGen {
    /// Interned strings, in pool order
    strings: Vec<String>,
    string_index: FxHashMap<String, u32>,
    /// Finished functions, children before parents
    functions: Vec<FunctionDraft>,
    /// Current function context
    pub current: FunctionContext,
    /// Function context stack (for nested functions)
    func_stack: Vec<FunctionContext>,
    /// Top-level declarations
    globals: FxHashMap<String, DeclKind>,
}

impl CodeGen {
    /// Create a new code generator
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            string_index: FxHashMap::default(),
            functions: Vec::new(),
            current: FunctionContext::top_level(),
            func_stack: Vec::new(),
            globals: FxHashMap::default(),
        }
    }

    /// Intern a string into the unit's string pool
    pub fn intern(&mut self, s: &str) -> CompileResult<AtomIndex> {
        if let Some(&idx) = self.string_index.get(s) {
            return Ok(AtomIndex(idx));
        }
        let idx = u32::try_from(self.strings.len())
            .ok()
            .filter(|&idx| idx != freebutton_bytecode::NO_NAME)
            .ok_or_else(|| CompileError::internal("string pool overflow"))?;
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), idx);
        Ok(AtomIndex(idx))
    }

    /// Strings interned so far
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Emit an instruction
    pub fn emit(&mut self, instruction: Instruction) {
        self.current.emit(instruction);
    }

    /// Allocate a register
    pub fn alloc_reg(&mut self) -> CompileResult<Register> {
        self.current.registers.alloc()
    }

    /// Register allocator position
    pub fn position(&self) -> u16 {
        self.current.registers.position()
    }

    /// Restore the register allocator
    pub fn restore(&mut self, pos: u16) {
        self.current.registers.restore(pos);
    }

    /// Free everything above `reg`
    pub fn keep(&mut self, reg: Register) {
        self.current.registers.keep(reg);
    }

    /// Get current instruction index
    pub fn current_index(&self) -> usize {
        self.current.current_index()
    }

    /// Patch a jump to land on `target`
    pub fn patch_jump(&mut self, index: usize, target: usize) -> CompileResult<()> {
        self.current.patch_jump(index, target)
    }

    /// Patch a jump to land on the next instruction
    pub fn patch_jump_here(&mut self, index: usize) -> CompileResult<()> {
        let here = self.current_index();
        self.patch_jump(index, here)
    }

    /// Emit a backward jump to `target`
    pub fn emit_loop(&mut self, target: usize) -> CompileResult<()> {
        let offset = jump_distance(self.current_index(), target)?;
        self.emit(Instruction::Jump {
            offset: JumpOffset(offset),
        });
        Ok(())
    }

    /// Emit a placeholder jump (returns index for patching)
    pub fn emit_jump(&mut self) -> usize {
        let idx = self.current_index();
        self.emit(Instruction::Jump {
            offset: JumpOffset(0),
        });
        idx
    }

    /// Emit a conditional jump taken on a falsy value
    pub fn emit_jump_if_false(&mut self, cond: Register) -> usize {
        let idx = self.current_index();
        self.emit(Instruction::JumpIfFalse {
            cond,
            offset: JumpOffset(0),
        });
        idx
    }

    /// Emit a conditional jump taken on a truthy value
    pub fn emit_jump_if_true(&mut self, cond: Register) -> usize {
        let idx = self.current_index();
        self.emit(Instruction::JumpIfTrue {
            cond,
            offset: JumpOffset(0),
        });
        idx
    }

    /// Enter a block scope
    pub fn enter_scope(&mut self) {
        self.current.scopes.enter(false);
    }

    /// Exit a block scope
    pub fn exit_scope(&mut self) {
        self.current.scopes.exit();
    }

    /// Start a loop
    pub fn enter_loop(&mut self) {
        self.current.loops.push(LoopLabels::default());
    }

    /// Finish a loop, patching its `break`s to `exit` and `continue`s to `resume`
    pub fn exit_loop(&mut self, resume: usize, exit: usize) -> CompileResult<()> {
        let labels = self
            .current
            .loops
            .pop()
            .ok_or_else(|| CompileError::internal("loop stack underflow"))?;
        for jump in labels.breaks {
            self.patch_jump(jump, exit)?;
        }
        for jump in labels.continues {
            self.patch_jump(jump, resume)?;
        }
        Ok(())
    }

    /// Emit a `break` jump; `None` outside a loop
    pub fn emit_break(&mut self) -> Option<()> {
        self.current.loops.last()?;
        let jump = self.emit_jump();
        self.current.loops.last_mut()?.breaks.push(jump);
        Some(())
    }

    /// Emit a `continue` jump; `None` outside a loop
    pub fn emit_continue(&mut self) -> Option<()> {
        self.current.loops.last()?;
        let jump = self.emit_jump();
        self.current.loops.last_mut()?.continues.push(jump);
        Some(())
    }

    /// Declare a variable.
    ///
    /// Returns the binding and whether it is new, or `None` on an illegal
    /// redeclaration.
    pub fn declare_variable(&mut self, name: &str, kind: DeclKind) -> Option<(ResolvedBinding, bool)> {
        let is_const = kind == DeclKind::Const;
        if self.current.top_level {
            let fresh = match self.globals.get(name) {
                Some(existing) if existing.redeclarable() && kind.redeclarable() => false,
                Some(_) => return None,
                None => {
                    self.globals.insert(name.to_string(), kind);
                    true
                }
            };
            let binding = ResolvedBinding::Global {
                name: name.to_string(),
                is_const,
            };
            return Some((binding, fresh));
        }

        let (index, fresh) = self.current.scopes.declare(name, kind)?;
        let index = u8::try_from(index).ok()?;
        Some((ResolvedBinding::Local { index, is_const }, fresh))
    }

    /// Resolve a variable.
    ///
    /// Locals of an enclosing function other than the top level cannot be
    /// captured.
    pub fn resolve_variable(&self, name: &str) -> CompileResult<ResolvedBinding> {
        if !self.current.top_level {
            if let Some(binding) = self.current.scopes.resolve(name) {
                let index = u8::try_from(binding.index).map_err(|_| CompileError::TooManyLocals)?;
                return Ok(ResolvedBinding::Local {
                    index,
                    is_const: binding.kind == DeclKind::Const,
                });
            }
            for outer in self.func_stack.iter().rev() {
                if outer.top_level {
                    break;
                }
                if outer.scopes.resolve(name).is_some() {
                    return Err(CompileError::unsupported(format!(
                        "closure capturing local variable '{name}' of an enclosing function"
                    )));
                }
            }
        }
        Ok(ResolvedBinding::Global {
            name: name.to_string(),
            is_const: self.globals.get(name) == Some(&DeclKind::Const),
        })
    }

    /// Load a binding into `dst`
    pub fn emit_load(&mut self, binding: &ResolvedBinding, dst: Register) -> CompileResult<()> {
        match binding {
            ResolvedBinding::Local { index, .. } => self.emit(Instruction::GetLocal {
                dst,
                idx: LocalIndex(*index),
            }),
            ResolvedBinding::Global { name, .. } => {
                let name = self.intern(name)?;
                self.emit(Instruction::GetGlobal { dst, name });
            }
        }
        Ok(())
    }

    /// Store `src` into a binding
    pub fn emit_store(&mut self, binding: &ResolvedBinding, src: Register) -> CompileResult<()> {
        match binding {
            ResolvedBinding::Local { index, .. } => self.emit(Instruction::SetLocal {
                idx: LocalIndex(*index),
                src,
            }),
            ResolvedBinding::Global { name, .. } => {
                let name = self.intern(name)?;
                self.emit(Instruction::SetGlobal { name, src });
            }
        }
        Ok(())
    }

    /// Start compiling a new function
    pub fn enter_function(&mut self, name: Option<String>) {
        let old = std::mem::replace(&mut self.current, FunctionContext::new(name));
        self.func_stack.push(old);
    }

    /// Finish compiling current function, returning its index among the parent's children
    pub fn exit_function(&mut self) -> CompileResult<FunctionIndex> {
        let parent = self
            .func_stack
            .pop()
            .ok_or_else(|| CompileError::internal("function stack underflow"))?;
        let func = std::mem::replace(&mut self.current, parent);
        let name_atom = match &func.name {
            Some(name) => Some(self.intern(name)?.0),
            None => None,
        };
        let draft = func.into_draft(name_atom)?;
        let idx = self.functions.len();
        self.functions.push(draft);

        let child = u16::try_from(self.current.children.len())
            .map_err(|_| CompileError::TooManyFunctions)?;
        self.current.children.push(idx);
        Ok(FunctionIndex(child))
    }

    /// Lay out the unit image.
    ///
    /// Without `base` the image's own heap address becomes its base.
    pub fn finish(mut self, width: PointerWidth, base: Option<u64>) -> CompileResult<CompiledUnit> {
        if !self.func_stack.is_empty() {
            return Err(CompileError::internal("unterminated function"));
        }
        let main = std::mem::replace(&mut self.current, FunctionContext::top_level());
        let main = main.into_draft(None)?;
        self.functions.push(main);

        let mut builder = ImageBuilder::new(width);
        let strings = self
            .strings
            .iter()
            .map(|s| builder.add_string(s.as_bytes()))
            .collect();
        let pool = builder.add_string_pool(strings);

        let mut ids = Vec::with_capacity(self.functions.len());
        for draft in &self.functions {
            let code = builder.add_code(instruction::encode_all(&draft.instructions));
            let children = draft
                .children
                .iter()
                .map(|&child| {
                    ids.get(child)
                        .copied()
                        .ok_or_else(|| CompileError::internal("child laid out after parent"))
                })
                .collect::<CompileResult<Vec<_>>>()?;
            ids.push(builder.add_function(FunctionBlock {
                arg_count: draft.arg_count,
                register_count: draft.register_count,
                local_count: draft.local_count,
                name_atom: draft.name_atom,
                code,
                children,
            }));
        }
        let entry = *ids
            .last()
            .ok_or_else(|| CompileError::internal("no entry function"))?;

        let unit = match base {
            Some(base) => builder.finish_at(entry, pool, base)?,
            None => builder.finish(entry, pool)?,
        };
        Ok(unit)
    }
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}
