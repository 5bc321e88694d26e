//! Schemey Compiler Library
//!
//! Lexes, reads, and compiles a small Scheme subset to stack-machine
//! bytecode, and serializes/deserializes the resulting `CodeObject`s to a
//! custom binary container.

pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod reader;

use schemey_core::CodeObject;

pub use codegen::Compiler;
pub use error::{CompileError, DeserializationError, FrontEndError, LexError, ReadError, SerializationError};
pub use reader::{read_all, Reader};

/// Read and compile `source` in one step: the composition the REPL and the
/// `-c`/`-e` CLI flags both need.
pub fn compile_source(source: &str) -> Result<CodeObject, FrontEndError> {
    let forms = read_all(source)?;
    Ok(Compiler::compile_program(&forms)?)
}
