//! Main compiler implementation

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};

use freebutton_bytecode::{CompiledUnit, Instruction, PointerWidth, Register};

use crate::codegen::CodeGen;
use crate::error::{CompileError, CompileResult};
use crate::scope::{DeclKind, ResolvedBinding};

/// Byte offsets of line starts, for error locations
#[derive(Debug, Default)]
struct LineIndex {
    starts: Vec<u32>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i as u32 + 1),
        );
        Self { starts }
    }

    /// 1-based line and column of `offset`
    fn locate(&self, offset: u32) -> (u32, u32) {
        let line = self.starts.partition_point(|&start| start <= offset).max(1);
        let column = offset - self.starts[line - 1] + 1;
        (line as u32, column)
    }
}

/// The compiler
pub struct Compiler {
    /// Code generator
    codegen: CodeGen,
    width: PointerWidth,
    base: Option<u64>,
    lines: LineIndex,
}

impl Compiler {
    /// Create a compiler producing native-width images based at their own address
    pub fn new() -> Self {
        Self {
            codegen: CodeGen::new(),
            width: PointerWidth::native(),
            base: None,
            lines: LineIndex::default(),
        }
    }

    /// Create a compiler producing `width`-word images with pointers against `base`
    pub fn with_target(width: PointerWidth, base: u64) -> Self {
        Self {
            width,
            base: Some(base),
            ..Self::new()
        }
    }

    /// Compile source code to a unit image
    pub fn compile(mut self, source: &str, name: &str) -> CompileResult<CompiledUnit> {
        let allocator = Allocator::default();
        let source_type = SourceType::from_path(name).unwrap_or_default();
        let result = Parser::new(&allocator, source, source_type).parse();

        if let Some(error) = result.errors.first() {
            return Err(CompileError::Parse(error.to_string()));
        }

        self.lines = LineIndex::new(source);
        self.compile_body(&result.program.body)?;
        self.codegen.emit(Instruction::ReturnUndefined);

        self.codegen.finish(self.width, self.base)
    }

    fn syntax_error(&self, message: impl Into<String>, span: Span) -> CompileError {
        let (line, column) = self.lines.locate(span.start);
        CompileError::syntax(message, line, column)
    }

    fn unsupported(&self, feature: &str, span: Span) -> CompileError {
        let (line, column) = self.lines.locate(span.start);
        CompileError::unsupported(format!("{feature} at {line}:{column}"))
    }

    /// Compile a statement list, hoisting function declarations
    fn compile_body(&mut self, statements: &[Statement]) -> CompileResult<()> {
        for stmt in statements {
            if let Statement::FunctionDeclaration(func) = stmt {
                self.compile_function_declaration(func)?;
            }
        }
        for stmt in statements {
            if !matches!(stmt, Statement::FunctionDeclaration(_)) {
                self.compile_statement(stmt)?;
            }
        }
        Ok(())
    }

    /// Compile a statement
    fn compile_statement(&mut self, stmt: &Statement) -> CompileResult<()> {
        match stmt {
            Statement::ExpressionStatement(expr_stmt) => {
                let pos = self.codegen.position();
                self.compile_expression(&expr_stmt.expression)?;
                self.codegen.restore(pos);
                Ok(())
            }

            Statement::VariableDeclaration(decl) => self.compile_variable_declaration(decl),

            Statement::ReturnStatement(ret) => {
                if let Some(arg) = &ret.argument {
                    let pos = self.codegen.position();
                    let reg = self.compile_expression(arg)?;
                    self.codegen.emit(Instruction::Return { src: reg });
                    self.codegen.restore(pos);
                } else {
                    self.codegen.emit(Instruction::ReturnUndefined);
                }
                Ok(())
            }

            Statement::BlockStatement(block) => {
                self.codegen.enter_scope();
                self.compile_body(&block.body)?;
                self.codegen.exit_scope();
                Ok(())
            }

            Statement::IfStatement(if_stmt) => self.compile_if_statement(if_stmt),

            Statement::WhileStatement(while_stmt) => self.compile_while_statement(while_stmt),

            Statement::DoWhileStatement(do_while) => self.compile_do_while_statement(do_while),

            Statement::ForStatement(for_stmt) => self.compile_for_statement(for_stmt),

            Statement::BreakStatement(brk) => {
                if brk.label.is_some() {
                    return Err(self.unsupported("labelled break", brk.span));
                }
                self.codegen
                    .emit_break()
                    .ok_or_else(|| self.syntax_error("Illegal break statement", brk.span))
            }

            Statement::ContinueStatement(cont) => {
                if cont.label.is_some() {
                    return Err(self.unsupported("labelled continue", cont.span));
                }
                self.codegen.emit_continue().ok_or_else(|| {
                    self.syntax_error("Illegal continue statement", cont.span)
                })
            }

            Statement::FunctionDeclaration(func) => self.compile_function_declaration(func),

            Statement::EmptyStatement(_) => Ok(()),

            // Type-only declarations carry no code
            Statement::TSTypeAliasDeclaration(_) => Ok(()),
            Statement::TSInterfaceDeclaration(_) => Ok(()),

            _ => Err(self.unsupported("statement", stmt.span())),
        }
    }

    /// Compile a variable declaration
    fn compile_variable_declaration(&mut self, decl: &VariableDeclaration) -> CompileResult<()> {
        let kind = match decl.kind {
            VariableDeclarationKind::Var => DeclKind::Var,
            VariableDeclarationKind::Let => DeclKind::Let,
            VariableDeclarationKind::Const => DeclKind::Const,
            _ => return Err(self.unsupported("using declaration", decl.span)),
        };

        for declarator in &decl.declarations {
            let BindingPattern::BindingIdentifier(ident) = &declarator.id else {
                return Err(self.unsupported("destructuring pattern", declarator.span));
            };
            let (binding, fresh) = self.declare(&ident.name, kind, ident.span)?;

            let pos = self.codegen.position();
            match &declarator.init {
                Some(init) => {
                    let reg = self.compile_expression(init)?;
                    self.codegen.emit_store(&binding, reg)?;
                }
                // A bare `var` keeps an existing value
                None if kind != DeclKind::Var || fresh => {
                    let reg = self.codegen.alloc_reg()?;
                    self.codegen.emit(Instruction::LoadUndefined { dst: reg });
                    self.codegen.emit_store(&binding, reg)?;
                }
                None => {}
            }
            self.codegen.restore(pos);
        }

        Ok(())
    }

    fn declare(
        &mut self,
        name: &str,
        kind: DeclKind,
        span: Span,
    ) -> CompileResult<(ResolvedBinding, bool)> {
        match self.codegen.declare_variable(name, kind) {
            Some(declared) => Ok(declared),
            None if self.codegen.current.scopes.local_count() > 255 => {
                Err(CompileError::TooManyLocals)
            }
            None => Err(self.syntax_error(
                format!("Identifier '{}' has already been declared", name),
                span,
            )),
        }
    }

    /// Compile an if statement
    fn compile_if_statement(&mut self, if_stmt: &IfStatement) -> CompileResult<()> {
        let pos = self.codegen.position();
        let cond = self.compile_expression(&if_stmt.test)?;
        let jump_else = self.codegen.emit_jump_if_false(cond);
        self.codegen.restore(pos);

        self.compile_statement(&if_stmt.consequent)?;

        if let Some(alternate) = &if_stmt.alternate {
            let jump_end = self.codegen.emit_jump();
            self.codegen.patch_jump_here(jump_else)?;
            self.compile_statement(alternate)?;
            self.codegen.patch_jump_here(jump_end)?;
        } else {
            self.codegen.patch_jump_here(jump_else)?;
        }

        Ok(())
    }

    /// Compile a while statement
    fn compile_while_statement(&mut self, while_stmt: &WhileStatement) -> CompileResult<()> {
        let loop_start = self.codegen.current_index();

        let pos = self.codegen.position();
        let cond = self.compile_expression(&while_stmt.test)?;
        let jump_end = self.codegen.emit_jump_if_false(cond);
        self.codegen.restore(pos);

        self.codegen.enter_loop();
        self.compile_statement(&while_stmt.body)?;
        self.codegen.emit_loop(loop_start)?;

        let end = self.codegen.current_index();
        self.codegen.patch_jump(jump_end, end)?;
        self.codegen.exit_loop(loop_start, end)
    }

    /// Compile a do-while statement
    fn compile_do_while_statement(&mut self, do_while: &DoWhileStatement) -> CompileResult<()> {
        let loop_start = self.codegen.current_index();

        self.codegen.enter_loop();
        self.compile_statement(&do_while.body)?;

        let test_start = self.codegen.current_index();
        let pos = self.codegen.position();
        let cond = self.compile_expression(&do_while.test)?;
        let back = self.codegen.emit_jump_if_true(cond);
        self.codegen.restore(pos);
        self.codegen.patch_jump(back, loop_start)?;

        let end = self.codegen.current_index();
        self.codegen.exit_loop(test_start, end)
    }

    /// Compile a for statement
    fn compile_for_statement(&mut self, for_stmt: &ForStatement) -> CompileResult<()> {
        self.codegen.enter_scope();

        if let Some(init) = &for_stmt.init {
            match init {
                ForStatementInit::VariableDeclaration(decl) => {
                    self.compile_variable_declaration(decl)?;
                }
                _ => {
                    if let Some(expr) = init.as_expression() {
                        let pos = self.codegen.position();
                        self.compile_expression(expr)?;
                        self.codegen.restore(pos);
                    }
                }
            }
        }

        let loop_start = self.codegen.current_index();

        let jump_end = if let Some(test) = &for_stmt.test {
            let pos = self.codegen.position();
            let cond = self.compile_expression(test)?;
            let jump = self.codegen.emit_jump_if_false(cond);
            self.codegen.restore(pos);
            Some(jump)
        } else {
            None
        };

        self.codegen.enter_loop();
        self.compile_statement(&for_stmt.body)?;

        let update_start = self.codegen.current_index();
        if let Some(update) = &for_stmt.update {
            let pos = self.codegen.position();
            self.compile_expression(update)?;
            self.codegen.restore(pos);
        }
        self.codegen.emit_loop(loop_start)?;

        let end = self.codegen.current_index();
        if let Some(jump_end) = jump_end {
            self.codegen.patch_jump(jump_end, end)?;
        }
        self.codegen.exit_loop(update_start, end)?;

        self.codegen.exit_scope();
        Ok(())
    }

    /// Compile a function declaration
    fn compile_function_declaration(&mut self, func: &Function) -> CompileResult<()> {
        let Some(id) = &func.id else {
            return Err(self.unsupported("anonymous function declaration", func.span));
        };
        let (binding, _) = self.declare(&id.name, DeclKind::Function, id.span)?;

        let pos = self.codegen.position();
        let closure = self.compile_function(func, Some(id.name.to_string()))?;
        self.codegen.emit_store(&binding, closure)?;
        self.codegen.restore(pos);
        Ok(())
    }

    /// Compile a function or function expression into a closure register
    fn compile_function(&mut self, func: &Function, name: Option<String>) -> CompileResult<Register> {
        if func.r#async || func.generator {
            return Err(self.unsupported("async or generator function", func.span));
        }
        let statements = func.body.as_ref().map(|body| &body.statements[..]).unwrap_or(&[]);
        self.compile_closure(name, &func.params, statements, false)
    }

    /// Compile an arrow function expression
    fn compile_arrow_function(&mut self, arrow: &ArrowFunctionExpression) -> CompileResult<Register> {
        if arrow.r#async {
            return Err(self.unsupported("async arrow function", arrow.span));
        }
        self.compile_closure(None, &arrow.params, &arrow.body.statements, arrow.expression)
    }

    fn compile_closure(
        &mut self,
        name: Option<String>,
        params: &FormalParameters,
        statements: &[Statement],
        expression_body: bool,
    ) -> CompileResult<Register> {
        if params.rest.is_some() {
            return Err(self.unsupported("rest parameter", params.span));
        }

        self.codegen.enter_function(name);

        for param in &params.items {
            let BindingPattern::BindingIdentifier(ident) = &param.pattern else {
                return Err(self.unsupported("parameter pattern", param.span));
            };
            self.declare(&ident.name, DeclKind::Param, ident.span)?;
            self.codegen.current.param_count = self
                .codegen
                .current
                .param_count
                .checked_add(1)
                .ok_or(CompileError::TooManyLocals)?;
        }

        if expression_body {
            // `(x) => x + 1` parses as a single expression statement
            if let Some(Statement::ExpressionStatement(expr_stmt)) = statements.first() {
                let result = self.compile_expression(&expr_stmt.expression)?;
                self.codegen.emit(Instruction::Return { src: result });
            }
        } else {
            self.compile_body(statements)?;
        }
        self.codegen.emit(Instruction::ReturnUndefined);

        let func = self.codegen.exit_function()?;
        let dst = self.codegen.alloc_reg()?;
        self.codegen.emit(Instruction::Closure { dst, func });
        Ok(dst)
    }

    /// Compile an expression.
    ///
    /// The result lands in the first register allocated here; every register
    /// above it is free when this returns.
    fn compile_expression(&mut self, expr: &Expression) -> CompileResult<Register> {
        match expr {
            Expression::NumericLiteral(lit) => {
                let dst = self.codegen.alloc_reg()?;
                let value = lit.value;

                if value.fract() == 0.0
                    && value >= i32::MIN as f64
                    && value <= i32::MAX as f64
                    && !(value == 0.0 && value.is_sign_negative())
                {
                    self.codegen.emit(Instruction::LoadInt32 {
                        dst,
                        value: value as i32,
                    });
                } else {
                    self.codegen.emit(Instruction::LoadNumber { dst, value });
                }
                Ok(dst)
            }

            Expression::StringLiteral(lit) => {
                let dst = self.codegen.alloc_reg()?;
                let atom = self.codegen.intern(&lit.value)?;
                self.codegen.emit(Instruction::LoadString { dst, atom });
                Ok(dst)
            }

            Expression::BooleanLiteral(lit) => {
                let dst = self.codegen.alloc_reg()?;
                if lit.value {
                    self.codegen.emit(Instruction::LoadTrue { dst });
                } else {
                    self.codegen.emit(Instruction::LoadFalse { dst });
                }
                Ok(dst)
            }

            Expression::NullLiteral(_) => {
                let dst = self.codegen.alloc_reg()?;
                self.codegen.emit(Instruction::LoadNull { dst });
                Ok(dst)
            }

            Expression::Identifier(ident) => self.compile_identifier(&ident.name),

            Expression::BinaryExpression(binary) => self.compile_binary_expression(binary),

            Expression::LogicalExpression(logical) => self.compile_logical_expression(logical),

            Expression::UnaryExpression(unary) => self.compile_unary_expression(unary),

            Expression::AssignmentExpression(assign) => self.compile_assignment_expression(assign),

            Expression::CallExpression(call) => self.compile_call_expression(call),

            Expression::StaticMemberExpression(member) => {
                if member.optional {
                    return Err(self.unsupported("optional chaining", member.span));
                }
                let obj = self.compile_expression(&member.object)?;
                let name = self.codegen.intern(&member.property.name)?;
                self.codegen.emit(Instruction::GetPropConst {
                    dst: obj,
                    obj,
                    name,
                });
                Ok(obj)
            }

            Expression::ComputedMemberExpression(member) => {
                if member.optional {
                    return Err(self.unsupported("optional chaining", member.span));
                }
                let obj = self.compile_expression(&member.object)?;
                let key = self.compile_expression(&member.expression)?;
                self.codegen.emit(Instruction::GetProp { dst: obj, obj, key });
                self.codegen.keep(obj);
                Ok(obj)
            }

            Expression::ConditionalExpression(cond) => self.compile_conditional_expression(cond),

            Expression::ParenthesizedExpression(paren) => {
                self.compile_expression(&paren.expression)
            }

            Expression::FunctionExpression(func) => {
                let name = func.id.as_ref().map(|id| id.name.to_string());
                self.compile_function(func, name)
            }

            Expression::ArrowFunctionExpression(arrow) => self.compile_arrow_function(arrow),

            Expression::UpdateExpression(update) => self.compile_update_expression(update),

            // Type annotations are erased
            Expression::TSAsExpression(expr) => self.compile_expression(&expr.expression),

            Expression::TSNonNullExpression(expr) => self.compile_expression(&expr.expression),

            _ => Err(self.unsupported("expression", expr.span())),
        }
    }

    /// Compile an identifier reference
    fn compile_identifier(&mut self, name: &str) -> CompileResult<Register> {
        let binding = self.codegen.resolve_variable(name)?;
        let dst = self.codegen.alloc_reg()?;
        match binding {
            ResolvedBinding::Global { ref name, .. } if name == "undefined" => {
                self.codegen.emit(Instruction::LoadUndefined { dst });
            }
            binding => self.codegen.emit_load(&binding, dst)?,
        }
        Ok(dst)
    }

    /// Compile a binary expression
    fn compile_binary_expression(&mut self, binary: &BinaryExpression) -> CompileResult<Register> {
        let lhs = self.compile_expression(&binary.left)?;
        let rhs = self.compile_expression(&binary.right)?;
        let dst = lhs;

        let instruction = match binary.operator {
            BinaryOperator::Addition => Instruction::Add { dst, lhs, rhs },
            BinaryOperator::Subtraction => Instruction::Sub { dst, lhs, rhs },
            BinaryOperator::Multiplication => Instruction::Mul { dst, lhs, rhs },
            BinaryOperator::Division => Instruction::Div { dst, lhs, rhs },
            BinaryOperator::Remainder => Instruction::Mod { dst, lhs, rhs },
            BinaryOperator::LessThan => Instruction::Lt { dst, lhs, rhs },
            BinaryOperator::LessEqualThan => Instruction::Le { dst, lhs, rhs },
            BinaryOperator::GreaterThan => Instruction::Gt { dst, lhs, rhs },
            BinaryOperator::GreaterEqualThan => Instruction::Ge { dst, lhs, rhs },
            BinaryOperator::Equality => Instruction::Eq { dst, lhs, rhs },
            BinaryOperator::Inequality => Instruction::Ne { dst, lhs, rhs },
            BinaryOperator::StrictEquality => Instruction::StrictEq { dst, lhs, rhs },
            BinaryOperator::StrictInequality => Instruction::StrictNe { dst, lhs, rhs },
            _ => {
                return Err(self.unsupported(
                    &format!("binary operator {:?}", binary.operator),
                    binary.span,
                ));
            }
        };

        self.codegen.emit(instruction);
        self.codegen.keep(dst);
        Ok(dst)
    }

    /// Compile `&&` and `||` with short-circuiting
    fn compile_logical_expression(&mut self, logical: &LogicalExpression) -> CompileResult<Register> {
        let result = self.compile_expression(&logical.left)?;
        let skip = match logical.operator {
            LogicalOperator::And => self.codegen.emit_jump_if_false(result),
            LogicalOperator::Or => self.codegen.emit_jump_if_true(result),
            _ => return Err(self.unsupported("nullish coalescing", logical.span)),
        };

        self.codegen.restore(u16::from(result.0));
        let right = self.compile_expression(&logical.right)?;
        if right != result {
            return Err(CompileError::internal("logical operand left its register"));
        }
        self.codegen.patch_jump_here(skip)?;
        Ok(result)
    }

    /// Compile a unary expression
    fn compile_unary_expression(&mut self, unary: &UnaryExpression) -> CompileResult<Register> {
        let src = self.compile_expression(&unary.argument)?;
        let dst = src;

        match unary.operator {
            UnaryOperator::UnaryNegation => self.codegen.emit(Instruction::Neg { dst, src }),
            UnaryOperator::UnaryPlus => {
                self.codegen.emit(Instruction::Neg { dst, src });
                self.codegen.emit(Instruction::Neg { dst, src: dst });
            }
            UnaryOperator::LogicalNot => self.codegen.emit(Instruction::Not { dst, src }),
            UnaryOperator::Typeof => self.codegen.emit(Instruction::TypeOf { dst, src }),
            UnaryOperator::Void => self.codegen.emit(Instruction::LoadUndefined { dst }),
            _ => {
                return Err(self.unsupported(
                    &format!("unary operator {:?}", unary.operator),
                    unary.span,
                ));
            }
        }

        Ok(dst)
    }

    /// Resolve an identifier for writing
    fn writable_binding(&self, name: &str, span: Span) -> CompileResult<ResolvedBinding> {
        let binding = self.codegen.resolve_variable(name)?;
        if binding.is_const() {
            return Err(self.syntax_error(
                format!("Assignment to constant variable '{}'", name),
                span,
            ));
        }
        Ok(binding)
    }

    /// Compile an assignment expression
    fn compile_assignment_expression(
        &mut self,
        assign: &AssignmentExpression,
    ) -> CompileResult<Register> {
        let AssignmentTarget::AssignmentTargetIdentifier(ident) = &assign.left else {
            return Err(CompileError::InvalidAssignmentTarget);
        };
        let binding = self.writable_binding(&ident.name, ident.span)?;

        if assign.operator == AssignmentOperator::Assign {
            let value = self.compile_expression(&assign.right)?;
            self.codegen.emit_store(&binding, value)?;
            return Ok(value);
        }

        let dst = self.codegen.alloc_reg()?;
        self.codegen.emit_load(&binding, dst)?;
        let rhs = self.compile_expression(&assign.right)?;
        let lhs = dst;
        let instruction = match assign.operator {
            AssignmentOperator::Addition => Instruction::Add { dst, lhs, rhs },
            AssignmentOperator::Subtraction => Instruction::Sub { dst, lhs, rhs },
            AssignmentOperator::Multiplication => Instruction::Mul { dst, lhs, rhs },
            AssignmentOperator::Division => Instruction::Div { dst, lhs, rhs },
            AssignmentOperator::Remainder => Instruction::Mod { dst, lhs, rhs },
            _ => {
                return Err(self.unsupported(
                    &format!("assignment operator {:?}", assign.operator),
                    assign.span,
                ));
            }
        };
        self.codegen.emit(instruction);
        self.codegen.keep(dst);
        self.codegen.emit_store(&binding, dst)?;
        Ok(dst)
    }

    /// Compile a call expression
    fn compile_call_expression(&mut self, call: &CallExpression) -> CompileResult<Register> {
        if call.optional {
            return Err(self.unsupported("optional call", call.span));
        }

        // Arguments must sit at func+1, func+2, ... for the Call instruction
        let func = self.compile_expression(&call.callee)?;
        let argc = u8::try_from(call.arguments.len())
            .map_err(|_| self.unsupported("more than 255 arguments", call.span))?;

        for (i, arg) in call.arguments.iter().enumerate() {
            let Some(expr) = arg.as_expression() else {
                return Err(self.unsupported("spread argument", arg.span()));
            };
            let reg = self.compile_expression(expr)?;
            if usize::from(reg.0) != usize::from(func.0) + 1 + i {
                return Err(CompileError::internal("argument register out of place"));
            }
        }

        self.codegen.emit(Instruction::Call {
            dst: func,
            func,
            argc,
        });
        self.codegen.keep(func);
        Ok(func)
    }

    /// Compile an update expression (i++, ++i, i--, --i)
    fn compile_update_expression(&mut self, update: &UpdateExpression) -> CompileResult<Register> {
        let SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) = &update.argument else {
            return Err(self.unsupported("update of a non-identifier", update.span));
        };
        let binding = self.writable_binding(&ident.name, ident.span)?;

        let current = self.codegen.alloc_reg()?;
        self.codegen.emit_load(&binding, current)?;
        let one = self.codegen.alloc_reg()?;
        self.codegen.emit(Instruction::LoadInt32 { dst: one, value: 1 });

        // Prefix stores into and yields `current`; postfix computes in `one`
        let dst = if update.prefix { current } else { one };
        let instruction = match update.operator {
            UpdateOperator::Increment => Instruction::Add {
                dst,
                lhs: current,
                rhs: one,
            },
            UpdateOperator::Decrement => Instruction::Sub {
                dst,
                lhs: current,
                rhs: one,
            },
        };
        self.codegen.emit(instruction);
        self.codegen.emit_store(&binding, dst)?;
        self.codegen.keep(current);
        Ok(current)
    }

    /// Compile a conditional (ternary) expression
    fn compile_conditional_expression(
        &mut self,
        cond: &ConditionalExpression,
    ) -> CompileResult<Register> {
        let result = self.compile_expression(&cond.test)?;
        let jump_else = self.codegen.emit_jump_if_false(result);

        self.codegen.restore(u16::from(result.0));
        let consequent = self.compile_expression(&cond.consequent)?;
        let jump_end = self.codegen.emit_jump();

        self.codegen.patch_jump_here(jump_else)?;
        self.codegen.restore(u16::from(result.0));
        let alternate = self.compile_expression(&cond.alternate)?;

        if consequent != result || alternate != result {
            return Err(CompileError::internal("conditional branch left its register"));
        }
        self.codegen.patch_jump_here(jump_end)?;
        Ok(result)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freebutton_bytecode::{
        AtomIndex, BlockTag, FunctionIndex, JumpOffset, RomTable, image, instruction,
    };

    fn main_code(source: &str) -> (Vec<Instruction>, Vec<String>) {
        let unit = Compiler::with_target(PointerWidth::W4, 0)
            .compile(source, "test.js")
            .unwrap();
        let data = unit.memory();
        let layout = image::scan(data, PointerWidth::W4, 0, &RomTable::new()).unwrap();
        let strings = layout
            .blocks()
            .iter()
            .filter(|b| b.tag == BlockTag::String)
            .map(|b| {
                let bytes = image::block_bytes(data, PointerWidth::W4, b.offset, BlockTag::String).unwrap();
                String::from_utf8(bytes.to_vec()).unwrap()
            })
            .collect();
        let main = image::read_function(data, PointerWidth::W4, unit.entry_offset()).unwrap();
        let code_ptr = PointerWidth::W4.read_word(data, main.code_slot).unwrap();
        let code = image::block_bytes(data, PointerWidth::W4, code_ptr, BlockTag::Code).unwrap();
        (instruction::decode_all(code).unwrap(), strings)
    }

    #[test]
    fn test_compile_number() {
        let (code, _) = main_code("42;");
        assert_eq!(
            code,
            vec![
                Instruction::LoadInt32 {
                    dst: Register(0),
                    value: 42
                },
                Instruction::ReturnUndefined,
            ]
        );
    }

    #[test]
    fn test_compile_method_call() {
        let (code, strings) = main_code("led.on(1);");
        assert_eq!(strings, ["led", "on"]);
        assert_eq!(
            code,
            vec![
                Instruction::GetGlobal {
                    dst: Register(0),
                    name: AtomIndex(0)
                },
                Instruction::GetPropConst {
                    dst: Register(0),
                    obj: Register(0),
                    name: AtomIndex(1)
                },
                Instruction::LoadInt32 {
                    dst: Register(1),
                    value: 1
                },
                Instruction::Call {
                    dst: Register(0),
                    func: Register(0),
                    argc: 1
                },
                Instruction::ReturnUndefined,
            ]
        );
    }

    #[test]
    fn test_top_level_let_is_global() {
        let (code, strings) = main_code("let x = 1.5;");
        assert_eq!(strings, ["x"]);
        assert_eq!(
            code[1],
            Instruction::SetGlobal {
                name: AtomIndex(0),
                src: Register(0)
            }
        );
    }

    #[test]
    fn test_if_jumps_forward() {
        let (code, _) = main_code("if (true) { 1; }");
        assert_eq!(
            code[1],
            Instruction::JumpIfFalse {
                cond: Register(0),
                offset: JumpOffset(2)
            }
        );
    }

    #[test]
    fn test_function_declaration_is_hoisted() {
        let (code, strings) = main_code("f(); function f() {}");
        assert_eq!(
            code[0],
            Instruction::Closure {
                dst: Register(0),
                func: FunctionIndex(0)
            }
        );
        assert!(strings.contains(&"f".to_string()));
    }

    #[test]
    fn test_line_index() {
        let lines = LineIndex::new("a\nbc\n\nd");
        assert_eq!(lines.locate(0), (1, 1));
        assert_eq!(lines.locate(3), (2, 2));
        assert_eq!(lines.locate(6), (4, 1));
    }

    #[test]
    fn test_const_assignment_rejected() {
        let err = Compiler::new().compile("const a = 1; a = 2;", "t.js").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }
}
