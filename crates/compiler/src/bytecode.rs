//! Bytecode container: a custom binary serialization format for
//! `CodeObject`s (spec §4.5), modeled on CPython's `marshal` module. Every
//! serialized value is prefixed with a single ASCII type tag.
//!
//! One resolved deviation from the reference format: integers (instruction
//! args, lengths, numeric constants) are packed as **signed** 32-bit
//! little-endian, not unsigned — see `DESIGN.md`.

use std::rc::Rc;

use schemey_core::{CodeObject, Instruction, Opcode, Pair, Value};
use tracing::{debug, warn};

use crate::error::{DeserializationError, SerializationError};

const MAGIC: u32 = 0x0000_001A;

const TAG_CODEOBJECT: u8 = b'C';
const TAG_INSTRUCTION: u8 = b'I';
const TAG_PAIR: u8 = b'P';
const TAG_BOOLEAN: u8 = b'B';
const TAG_NUMBER: u8 = b'N';
const TAG_SYMBOL: u8 = b'S';
const TAG_SEQUENCE: u8 = b'[';
const TAG_STRING: u8 = b's';
const TAG_PY_STRING: u8 = b'p';
const TAG_NIL: u8 = b'n';

fn pack_i32(n: i32) -> [u8; 4] {
    n.to_le_bytes()
}

fn pack_string(out: &mut Vec<u8>, s: &str) {
    let encoded: Vec<u8> = s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect();
    out.extend_from_slice(&pack_i32(encoded.len() as i32));
    out.extend_from_slice(&encoded);
}

/// Serialize `co` into the bytecode container format, magic constant first.
pub fn serialize(co: &CodeObject) -> Result<Vec<u8>, SerializationError> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_le_bytes());
    serialize_code_object(&mut out, co)?;
    debug!(bytes = out.len(), "serialized code object");
    Ok(out)
}

fn serialize_code_object(out: &mut Vec<u8>, co: &CodeObject) -> Result<(), SerializationError> {
    out.push(TAG_CODEOBJECT);
    pack_string(out, &co.name);
    serialize_sequence(out, &co.args, |out, s| {
        pack_string(out, s);
        Ok(())
    })?;
    serialize_sequence(out, &co.code, |out, instr| {
        serialize_instruction(out, instr);
        Ok(())
    })?;
    serialize_sequence(out, &co.constants, serialize_value)?;
    serialize_sequence(out, &co.varnames, |out, s| {
        pack_string(out, s);
        Ok(())
    })?;
    Ok(())
}

fn serialize_instruction(out: &mut Vec<u8>, instr: &Instruction) {
    out.push(TAG_INSTRUCTION);
    out.extend_from_slice(&pack_i32(instr.opcode.as_u32() as i32));
    out.extend_from_slice(&pack_i32(instr.arg as i32));
}

fn serialize_sequence<T>(
    out: &mut Vec<u8>,
    items: &[T],
    mut serialize_one: impl FnMut(&mut Vec<u8>, &T) -> Result<(), SerializationError>,
) -> Result<(), SerializationError> {
    out.push(TAG_SEQUENCE);
    out.extend_from_slice(&pack_i32(items.len() as i32));
    for item in items {
        serialize_one(out, item)?;
    }
    Ok(())
}

fn serialize_value(out: &mut Vec<u8>, value: &Value) -> Result<(), SerializationError> {
    match value {
        Value::CodeObject(co) => serialize_code_object(out, co)?,
        Value::Pair(pair) => {
            out.push(TAG_PAIR);
            serialize_value(out, &pair.car())?;
            serialize_value(out, &pair.cdr())?;
        }
        Value::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.extend_from_slice(&pack_i32(*b as i32));
        }
        Value::Integer(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&pack_i32(*n));
        }
        Value::Symbol(s) => {
            out.push(TAG_SYMBOL);
            pack_string(out, s);
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            pack_string(out, s);
        }
        Value::Nil => out.push(TAG_NIL),
        Value::Procedure(_) | Value::Closure(_) | Value::Undefined => {
            return Err(SerializationError::UnsupportedValue);
        }
    }
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DeserializationError> {
        if self.pos + n > self.bytes.len() {
            return Err(DeserializationError::Truncated {
                needed: n,
                available: self.bytes.len() - self.pos,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, DeserializationError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32, DeserializationError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_tag(&mut self) -> Result<u8, DeserializationError> {
        Ok(self.take(1)?[0])
    }

    fn expect_tag(&mut self, expected: u8) -> Result<(), DeserializationError> {
        let found = self.read_tag()?;
        if found == expected {
            Ok(())
        } else {
            Err(DeserializationError::TagMismatch { expected, found })
        }
    }

    fn read_string(&mut self) -> Result<String, DeserializationError> {
        let byte_len = self.read_i32()? as usize;
        let raw = self.take(byte_len)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| DeserializationError::Truncated {
            needed: byte_len,
            available: raw.len(),
        })
    }
}

/// Deserialize a bytecode container back into a `CodeObject`, verifying the
/// magic constant first.
pub fn deserialize(bytes: &[u8]) -> Result<CodeObject, DeserializationError> {
    let mut cursor = Cursor::new(bytes);
    let magic = cursor.read_u32()?;
    if magic != MAGIC {
        warn!(found = format!("{magic:#010X}"), "magic constant mismatch");
        return Err(DeserializationError::BadMagic {
            expected: MAGIC,
            found: magic,
        });
    }
    deserialize_code_object(&mut cursor)
}

fn deserialize_code_object(cursor: &mut Cursor) -> Result<CodeObject, DeserializationError> {
    cursor.expect_tag(TAG_CODEOBJECT)?;
    let name = deserialize_py_string(cursor)?;
    let args = deserialize_sequence(cursor, deserialize_py_string)?;
    let code = deserialize_sequence(cursor, deserialize_instruction)?;
    let constants = deserialize_sequence(cursor, deserialize_value)?;
    let varnames = deserialize_sequence(cursor, deserialize_py_string)?;
    Ok(CodeObject {
        name,
        args,
        code,
        constants,
        varnames,
    })
}

fn deserialize_py_string(cursor: &mut Cursor) -> Result<String, DeserializationError> {
    cursor.expect_tag(TAG_PY_STRING)?;
    cursor.read_string()
}

fn deserialize_instruction(cursor: &mut Cursor) -> Result<Instruction, DeserializationError> {
    cursor.expect_tag(TAG_INSTRUCTION)?;
    let opcode_val = cursor.read_i32()? as u32;
    let arg = cursor.read_i32()? as u32;
    let opcode = Opcode::try_from(opcode_val).map_err(DeserializationError::UnknownOpcode)?;
    Ok(Instruction::new(opcode, arg))
}

fn deserialize_sequence<T>(
    cursor: &mut Cursor,
    mut deserialize_one: impl FnMut(&mut Cursor) -> Result<T, DeserializationError>,
) -> Result<Vec<T>, DeserializationError> {
    cursor.expect_tag(TAG_SEQUENCE)?;
    let len = cursor.read_i32()? as usize;
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(deserialize_one(cursor)?);
    }
    Ok(items)
}

fn deserialize_value(cursor: &mut Cursor) -> Result<Value, DeserializationError> {
    let tag = cursor.read_tag()?;
    match tag {
        TAG_CODEOBJECT => {
            cursor.pos -= 1;
            Ok(Value::CodeObject(Rc::new(deserialize_code_object(cursor)?)))
        }
        TAG_PAIR => {
            let first = deserialize_value(cursor)?;
            let second = deserialize_value(cursor)?;
            Ok(Value::Pair(Pair::new(first, second)))
        }
        TAG_BOOLEAN => Ok(Value::Boolean(cursor.read_i32()? != 0)),
        TAG_NUMBER => Ok(Value::Integer(cursor.read_i32()?)),
        TAG_SYMBOL => Ok(Value::symbol(cursor.read_string()?)),
        TAG_STRING => Ok(Value::string(cursor.read_string()?)),
        TAG_NIL => Ok(Value::Nil),
        other => Err(DeserializationError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::Compiler;
    use crate::reader::read_all;
    use schemey_core::value::deep_eq;

    fn list_to_value(co: &CodeObject) -> Value {
        // wraps a CodeObject as a constant so deep_eq can compare whole programs
        Value::CodeObject(Rc::new(co.clone()))
    }

    #[test]
    fn round_trips_a_simple_program() {
        let forms = read_all("(define (square x) (* x x)) (square 5)").unwrap();
        let co = Compiler::compile_program(&forms).unwrap();
        let bytes = serialize(&co).unwrap();
        let restored = deserialize(&bytes).unwrap();
        assert!(deep_eq(&list_to_value(&co), &list_to_value(&restored)));
    }

    #[test]
    fn magic_mismatch_is_rejected() {
        let mut bytes = serialize(&Compiler::compile_program(&[]).unwrap()).unwrap();
        bytes[0] ^= 0xFF;
        assert!(deserialize(&bytes).is_err());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let co = Compiler::compile_program(&read_all("42").unwrap()).unwrap();
        let bytes = serialize(&co).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(deserialize(truncated).is_err());
    }

    #[test]
    fn unicode_strings_round_trip() {
        // the reader grammar has no string literal syntax (spec §4.2 covers
        // only numbers, symbols, booleans, and lists); build one directly.
        let mut manual = CodeObject::new(vec![]);
        manual.constants.push(Value::string("caf\u{e9}"));
        let bytes = serialize(&manual).unwrap();
        let restored = deserialize(&bytes).unwrap();
        assert_eq!(restored.constants[0], Value::string("caf\u{e9}"));
    }
}
