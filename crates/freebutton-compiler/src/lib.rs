//! # FreeButton Compiler
//!
//! Compiles a small JavaScript subset into a tagged unit image using the oxc parser.
//!
//! ## Pipeline
//!
//! 1. Parse source with oxc
//! 2. Walk the AST and generate register bytecode per function
//! 3. Lay out strings, code and function blocks into a [`CompiledUnit`]
//!
//! Top-level declarations become globals; locals of nested functions live in
//! local slots and cannot be captured by inner functions.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod codegen;
pub mod compiler;
pub mod error;
pub mod scope;

pub use compiler::Compiler;
pub use error::{CompileError, CompileResult};

use freebutton_bytecode::CompiledUnit;

/// Compile `source` with a native-width compiler
pub fn compile(source: &str, name: &str) -> CompileResult<CompiledUnit> {
    Compiler::new().compile(source, name)
}
