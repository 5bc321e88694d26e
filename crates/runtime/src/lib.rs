//! Schemey Runtime
//!
//! Built-in procedures, the stack virtual machine, and the tree-walking
//! interpreter: two evaluators sharing a single value model and
//! environment chain from `schemey-core`.
//!
//! # Modules
//!
//! - `builtins`: arithmetic, comparison, list/pair, and predicate procedures
//! - `vm`: the bytecode `VirtualMachine`
//! - `interpreter`: the AST-walking `Interpreter`
//! - `error`: `VmError`, `InterpreterError`

pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod vm;

pub use builtins::{builtin_procedures, print_procedure, OutputSink};
pub use error::{InterpreterError, VmError};
pub use interpreter::Interpreter;
pub use vm::VirtualMachine;
