//! Error taxonomy for the front end: lexing, reading, compiling, and
//! serializing/deserializing bytecode (spec §7).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("lexical error at byte offset {offset}: unexpected character {character:?}")]
pub struct LexError {
    pub offset: usize,
    pub character: char,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("{0}")]
    Lex(#[from] LexError),
    #[error("\nAt line {line}:\n\n{source_line}\n{caret}\n\n{message}")]
    Syntax {
        line: usize,
        column: usize,
        source_line: String,
        caret: String,
        message: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Unknown expression to compile: {0}")]
    UnknownForm(String),
    #[error("Only symbols are supported in lambda arguments")]
    NonSymbolParameter,
    #[error("Invalid definition of lambda: missing parameter list")]
    LambdaMissingParameters,
    #[error("Invalid use of define. Requires a value to bind to the variable.")]
    DefineMissingValue,
    #[error("\"if\" requires both a then-branch and an else-branch")]
    IfMissingElse,
    #[error("\"else\" is not the last clause in cond: {0}")]
    ElseNotLast(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("cannot serialize a value of this type into the bytecode container")]
    UnsupportedValue,
}

/// The union of everything that can go wrong turning source text into a
/// runnable `CodeObject`: reading followed by compiling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrontEndError {
    #[error("{0}")]
    Read(#[from] ReadError),
    #[error("{0}")]
    Compile(#[from] CompileError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeserializationError {
    #[error("magic constant does not match: expected 0x{expected:08X}, got 0x{found:08X}")]
    BadMagic { expected: u32, found: u32 },
    #[error("unknown type tag: {0:?}")]
    UnknownTag(u8),
    #[error("expected type tag {expected:?}, found {found:?}")]
    TagMismatch { expected: u8, found: u8 },
    #[error("truncated bytecode stream: expected {needed} more byte(s), found {available}")]
    Truncated { needed: usize, available: usize },
    #[error("unknown opcode byte: {0}")]
    UnknownOpcode(u32),
}
