//! Runtime-layer error taxonomy (spec §7): environment lookups, procedure
//! application, and the VM's dispatch loop.

use thiserror::Error;

pub use schemey_core::env::EnvironmentError;
pub use schemey_core::value::ProcedureError;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("{0}")]
    Environment(#[from] EnvironmentError),
    #[error("{0}")]
    Procedure(#[from] ProcedureError),
    #[error("\"{0}\" is not a function. Expected a function.")]
    NotCallable(String),
    #[error("procedure \"{name}\" expected {expected} argument(s), but got {got} argument(s) instead.")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("unknown opcode byte: {0}")]
    UnknownOpcode(u8),
}

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("{0}")]
    Environment(#[from] EnvironmentError),
    #[error("{0}")]
    Procedure(#[from] ProcedureError),
    #[error("\"{0}\" is not a function. Expected a function.")]
    NotCallable(String),
    #[error("procedure \"{name}\" expected {expected} argument(s), but got {got} argument(s) instead.")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{0}")]
    Compile(#[from] schemeyc::CompileError),
    #[error("{0}")]
    Read(#[from] schemeyc::ReadError),
    #[error("could not load \"{path}\": {source}")]
    Load {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("if: missing else branch: {0}")]
    IfMissingElse(String),
}
