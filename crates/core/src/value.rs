//! The tagged `Value` type shared by the reader, compiler, and runtime.
//!
//! A `Value` plays double duty the way Lisp values always have: the reader
//! builds `Value` trees (`Pair`/`Symbol`/`Integer`/`Boolean`/`Nil`) to
//! represent source code, and the same tags represent values at run time.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Error returned by a built-in or closure application.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProcedureError(pub String);

impl ProcedureError {
    pub fn new(msg: impl Into<String>) -> Self {
        ProcedureError(msg.into())
    }
}

/// The shape of a host-provided built-in procedure.
pub type ProcedureFn = Rc<dyn Fn(&[Value]) -> Result<Value, ProcedureError>>;

/// A host procedure: a name (for error messages and `repr`) plus an opaque
/// Rust closure. Two `Procedure`s are `eq?` only if they are the same
/// allocation.
#[derive(Clone)]
pub struct Procedure {
    pub name: String,
    pub func: ProcedureFn,
}

impl Procedure {
    pub fn new(name: impl Into<String>, func: ProcedureFn) -> Self {
        Procedure {
            name: name.into(),
            func,
        }
    }

    pub fn apply(&self, args: &[Value]) -> Result<Value, ProcedureError> {
        (self.func)(args)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<Procedure {}>", self.name)
    }
}

impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

/// A mutable two-slot cell: the building block of lists. `set-car!` and
/// `set-cdr!` mutate a `Pair` in place, so a `Pair` is a shared handle to a
/// `PairCell`, not a value in itself.
#[derive(Debug, Clone)]
pub struct PairCell {
    pub first: Value,
    pub second: Value,
}

#[derive(Debug, Clone)]
pub struct Pair(pub Rc<RefCell<PairCell>>);

impl Pair {
    pub fn new(first: Value, second: Value) -> Self {
        Pair(Rc::new(RefCell::new(PairCell { first, second })))
    }

    pub fn car(&self) -> Value {
        self.0.borrow().first.clone()
    }

    pub fn cdr(&self) -> Value {
        self.0.borrow().second.clone()
    }

    pub fn set_car(&self, value: Value) {
        self.0.borrow_mut().first = value;
    }

    pub fn set_cdr(&self, value: Value) {
        self.0.borrow_mut().second = value;
    }
}

impl PartialEq for Pair {
    /// Pairs compare by identity (`eq?`/`eqv?`), never structurally: two
    /// freshly-consed pairs with equal contents are not `eq?`.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Bytecode opcodes, per the stack-machine contract shared by the compiler
/// and the virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    LoadConst = 0x00,
    LoadVar = 0x01,
    SetVar = 0x02,
    DefVar = 0x03,
    DefFunc = 0x04,
    ProcCall = 0x05,
    JumpIfFalse = 0x06,
    Jump = 0x07,
    Return = 0x08,
    Pop = 0x09,
}

impl Opcode {
    pub fn as_u32(self) -> u32 {
        self as u8 as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Opcode::LoadConst),
            0x01 => Ok(Opcode::LoadVar),
            0x02 => Ok(Opcode::SetVar),
            0x03 => Ok(Opcode::DefVar),
            0x04 => Ok(Opcode::DefFunc),
            0x05 => Ok(Opcode::ProcCall),
            0x06 => Ok(Opcode::JumpIfFalse),
            0x07 => Ok(Opcode::Jump),
            0x08 => Ok(Opcode::Return),
            0x09 => Ok(Opcode::Pop),
            other => Err(other),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadVar => "LOAD_VAR",
            Opcode::SetVar => "SET_VAR",
            Opcode::DefVar => "DEF_VAR",
            Opcode::DefFunc => "DEF_FUNC",
            Opcode::ProcCall => "PROC_CALL",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::Jump => "JUMP",
            Opcode::Return => "RETURN",
            Opcode::Pop => "POP",
        };
        f.write_str(s)
    }
}

/// A single bytecode instruction. `arg` is `0` for argless opcodes
/// (`RETURN`, `POP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub arg: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, arg: u32) -> Self {
        Instruction { opcode, arg }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16}{}", self.opcode.to_string(), self.arg)
    }
}

/// A compiled Scheme procedure: instructions plus the constants and
/// variable-name pools they index into. A `CodeObject` may itself appear as
/// a constant nested inside an enclosing `CodeObject` (one per `lambda`).
#[derive(Debug, Clone, PartialEq)]
pub struct CodeObject {
    pub name: String,
    pub args: Vec<String>,
    pub code: Vec<Instruction>,
    pub constants: Vec<Value>,
    pub varnames: Vec<String>,
}

impl CodeObject {
    pub fn new(args: Vec<String>) -> Self {
        CodeObject {
            name: String::new(),
            args,
            code: Vec::new(),
            constants: Vec::new(),
            varnames: Vec::new(),
        }
    }

    /// Display name: an empty name means this code object has no binding
    /// yet (an anonymous lambda, or the top-level program).
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Anonymous procedure"
        } else {
            &self.name
        }
    }
}

impl fmt::Display for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.format_indented(f, 0)
    }
}

impl CodeObject {
    fn format_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let prefix = " ".repeat(indent);
        writeln!(f, "{prefix}---------------")?;
        writeln!(f, "{prefix}Procedure: {}", self.display_name())?;
        writeln!(f, "{prefix}Arguments: {:?}", self.args)?;
        writeln!(f, "{prefix}Variables referenced: {:?}", self.varnames)?;
        writeln!(f, "{prefix}Constants referenced:")?;
        for constant in &self.constants {
            match constant {
                Value::CodeObject(co) => co.format_indented(f, indent + 4)?,
                other => writeln!(f, "{prefix}    {other}")?,
            }
        }
        writeln!(f, "{prefix}Code:")?;
        for (pos, instr) in self.code.iter().enumerate() {
            writeln!(f, "{prefix}    ({pos}) {}{}", instr, self.annotate(instr))?;
        }
        writeln!(f, "{prefix}---------------")
    }

    fn annotate(&self, instr: &Instruction) -> String {
        match instr.opcode {
            Opcode::LoadConst => format!(" [{}]", self.constants[instr.arg as usize]),
            Opcode::LoadVar | Opcode::SetVar | Opcode::DefVar => {
                format!(" [{}]", self.varnames[instr.arg as usize])
            }
            Opcode::DefFunc => match &self.constants[instr.arg as usize] {
                Value::CodeObject(co) => format!(" [{}]", co.display_name()),
                other => format!(" [{other}]"),
            },
            _ => String::new(),
        }
    }
}

/// A user-defined procedure: either a bytecode `CodeObject` (produced by
/// `DEF_FUNC` in the compiled path) or an AST body (produced by the tree
/// interpreter's `lambda` evaluation) — paired, either way, with the
/// environment frame it was defined in. That frame is captured by
/// reference (shared ownership), so mutations to it after closure creation
/// remain visible to the closure.
#[derive(Debug, Clone)]
pub enum ClosureKind {
    Compiled(Rc<CodeObject>),
    Interpreted {
        params: Vec<String>,
        body: Vec<Value>,
        name: Rc<RefCell<String>>,
    },
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub kind: ClosureKind,
    pub env: crate::env::Environment,
}

impl Closure {
    pub fn compiled(code: Rc<CodeObject>, env: crate::env::Environment) -> Self {
        Closure {
            kind: ClosureKind::Compiled(code),
            env,
        }
    }

    pub fn interpreted(params: Vec<String>, body: Vec<Value>, env: crate::env::Environment, name: String) -> Self {
        Closure {
            kind: ClosureKind::Interpreted {
                params,
                body,
                name: Rc::new(RefCell::new(name)),
            },
            env,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.kind {
            ClosureKind::Compiled(co) => co.display_name().to_string(),
            ClosureKind::Interpreted { name, .. } => {
                let n = name.borrow();
                if n.is_empty() {
                    "Anonymous procedure".to_string()
                } else {
                    n.clone()
                }
            }
        }
    }

    /// Rename an anonymous interpreted closure once it's bound by `define`
    /// (mirrors the compiler setting a nested `CodeObject`'s name).
    pub fn set_name(&self, new_name: &str) {
        if let ClosureKind::Interpreted { name, .. } = &self.kind {
            *name.borrow_mut() = new_name.to_string();
        }
    }

    pub fn param_names(&self) -> &[String] {
        match &self.kind {
            ClosureKind::Compiled(co) => &co.args,
            ClosureKind::Interpreted { params, .. } => params,
        }
    }
}

/// The tagged value type. See `spec` §3 for the full contract.
#[derive(Debug, Clone)]
pub enum Value {
    Integer(i32),
    Boolean(bool),
    Symbol(Rc<str>),
    String(Rc<str>),
    Pair(Pair),
    Nil,
    Procedure(Rc<Procedure>),
    Closure(Rc<Closure>),
    CodeObject(Rc<CodeObject>),
    /// The sentinel returned by side-effecting operations (e.g. `print`)
    /// that have no meaningful value.
    Undefined,
}

impl Value {
    pub fn symbol(name: impl AsRef<str>) -> Self {
        Value::Symbol(Rc::from(name.as_ref()))
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn cons(first: Value, second: Value) -> Self {
        Value::Pair(Pair::new(first, second))
    }

    /// Only `Boolean(false)` is falsy; everything else, including `0`,
    /// `Nil`, and the empty string, is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Is this a symbol whose name equals `tag`? Used by the expression
    /// algebra to recognize special forms by their head symbol.
    pub fn is_tagged(&self, tag: &str) -> bool {
        self.as_pair()
            .map(|p| matches!(p.car().as_symbol(), Some(s) if s == tag))
            .unwrap_or(false)
    }

    /// "Constant" per the expression algebra: an integer or boolean.
    pub fn is_self_evaluating_const(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Boolean(_))
    }

    /// Build a proper list `(v0 v1 ... vn-1)` from a slice, right to left.
    pub fn list_from(items: &[Value]) -> Value {
        let mut tail = Value::Nil;
        for item in items.iter().rev() {
            tail = Value::cons(item.clone(), tail);
        }
        tail
    }

    /// Expand a (possibly dotted) chain of pairs into a flat `Vec`,
    /// stopping at the first non-`Pair` cdr. Mirrors the reference
    /// implementation's `expand_nested_pairs` (non-recursive form).
    pub fn expand_list(&self) -> Vec<Value> {
        let mut items = Vec::new();
        let mut cur = self.clone();
        while let Value::Pair(p) = &cur {
            items.push(p.car());
            let next = p.cdr();
            cur = next;
        }
        items
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Nil => write!(f, "()"),
            Value::Pair(p) => fmt_pair(p, f),
            Value::Procedure(p) => write!(f, "#<Procedure {}>", p.name),
            Value::Closure(c) => write!(f, "#<Closure {}>", c.display_name()),
            Value::CodeObject(co) => write!(f, "{co}"),
            Value::Undefined => write!(f, "<#undef>"),
        }
    }
}

fn fmt_pair(pair: &Pair, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "(")?;
    write!(f, "{}", pair.car())?;
    let mut cur = pair.cdr();
    loop {
        match cur {
            Value::Pair(ref p) => {
                write!(f, " {}", p.car())?;
                cur = p.cdr();
            }
            Value::Nil => break,
            other => {
                write!(f, " . {other}")?;
                break;
            }
        }
    }
    write!(f, ")")
}

/// Structural equality that recurses into pairs by content rather than by
/// identity. Distinct from `Value`'s `PartialEq` (used by `eq?`/`eqv?`),
/// which treats pairs as identity-only per spec — this helper exists for
/// round-tripping (parse/print/re-parse, serialize/deserialize) where two
/// independently-built trees with equal contents should compare equal.
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Pair(pa), Value::Pair(pb)) => {
            deep_eq(&pa.car(), &pb.car()) && deep_eq(&pa.cdr(), &pb.cdr())
        }
        (Value::CodeObject(ca), Value::CodeObject(cb)) => {
            ca.name == cb.name
                && ca.args == cb.args
                && ca.code == cb.code
                && ca.varnames == cb.varnames
                && ca.constants.len() == cb.constants.len()
                && ca
                    .constants
                    .iter()
                    .zip(cb.constants.iter())
                    .all(|(x, y)| deep_eq(x, y))
        }
        _ => a == b,
    }
}

impl PartialEq for Value {
    /// Structural equality on scalar payloads; pairs, procedures, closures,
    /// and code objects compare by identity (matching the reference
    /// implementation, which has no custom `__eq__` for those types and so
    /// falls back to Python object identity).
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Undefined, Value::Undefined) => true,
            (Value::Pair(a), Value::Pair(b)) => a == b,
            (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::CodeObject(a), Value::CodeObject(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
