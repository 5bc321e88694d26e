//! Schemey Core: value model, bytecode container types, and environment chain
//!
//! This crate provides the language-agnostic foundation shared by the
//! compiler, runtime, and CLI crates:
//!
//! - `value`: the tagged `Value` enum (Integer, Boolean, Symbol, String,
//!   Pair, Nil, Procedure, Closure, CodeObject) plus the `CodeObject` and
//!   `Instruction` bytecode types.
//! - `env`: a parent-linked chain of name -> value frames.
//!
//! # Modules
//!
//! - `value`: Value, Pair, CodeObject, Instruction, Opcode
//! - `env`: Environment, EnvironmentError

pub mod env;
pub mod value;

pub use env::{Environment, EnvironmentError};
pub use value::{
    deep_eq, CodeObject, Closure, ClosureKind, Instruction, Opcode, Pair, PairCell, Procedure,
    ProcedureError, ProcedureFn, Value,
};
