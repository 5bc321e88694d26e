//! Bytecode compiler (spec §4.4): lowers the expression algebra in `ast`
//! into `CodeObject`s via two-pass label resolution — jumps are emitted
//! against symbolic labels first, then rewritten to absolute instruction
//! indices once every label in the procedure has been placed.

use std::collections::HashMap;
use std::rc::Rc;

use schemey_core::{CodeObject, Instruction, Opcode, Value};
use tracing::debug;

use crate::ast;
use crate::error::CompileError;

/// Per-procedure compilation state. One `FunctionCompiler` exists per
/// `lambda` (plus one for the top-level program), matching the one
/// `CodeObject` per procedure contract.
struct FunctionCompiler {
    name: String,
    args: Vec<String>,
    code: Vec<Instruction>,
    constants: Vec<Value>,
    varnames: Vec<String>,
    labels: HashMap<u32, usize>,
    next_label: u32,
}

impl FunctionCompiler {
    fn new(args: Vec<String>) -> Self {
        FunctionCompiler {
            name: String::new(),
            args,
            code: Vec::new(),
            constants: Vec::new(),
            varnames: Vec::new(),
            labels: HashMap::new(),
            next_label: 0,
        }
    }

    fn emit(&mut self, opcode: Opcode, arg: u32) {
        self.code.push(Instruction::new(opcode, arg));
    }

    fn new_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// Emit a jump whose `arg` is a label id, not yet an instruction index.
    /// Resolved in the final pass once every label has a position.
    fn emit_jump(&mut self, opcode: Opcode, label: u32) {
        self.code.push(Instruction::new(opcode, label));
    }

    fn mark_label(&mut self, label: u32) {
        self.labels.insert(label, self.code.len());
    }

    /// Scalar constants (`Integer`, `Boolean`, `Symbol`) are deduplicated by
    /// value; `Pair`/`String`/`CodeObject` constants are always appended
    /// fresh, since `Value`'s `PartialEq` treats those as identity-only (or,
    /// for `String`, dedup would alias text that the program may later
    /// mutate through a different handle).
    fn const_index(&mut self, value: Value) -> u32 {
        let dedup_eligible = matches!(value, Value::Integer(_) | Value::Boolean(_) | Value::Symbol(_));
        if dedup_eligible {
            if let Some(pos) = self.constants.iter().position(|v| *v == value) {
                return pos as u32;
            }
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    fn var_index(&mut self, name: &str) -> u32 {
        if let Some(pos) = self.varnames.iter().position(|n| n == name) {
            pos as u32
        } else {
            self.varnames.push(name.to_string());
            (self.varnames.len() - 1) as u32
        }
    }

    /// Resolve every jump's label-id argument to the instruction index the
    /// label was marked at, and assemble the finished `CodeObject`.
    fn finish(mut self) -> CodeObject {
        for instr in self.code.iter_mut() {
            if matches!(instr.opcode, Opcode::Jump | Opcode::JumpIfFalse) {
                let target = self.labels[&instr.arg];
                instr.arg = target as u32;
            }
        }
        CodeObject {
            name: self.name,
            args: self.args,
            code: self.code,
            constants: self.constants,
            varnames: self.varnames,
        }
    }
}

pub struct Compiler;

impl Compiler {
    /// Compile a full program: every top-level form, in order, as an
    /// implicit `begin`, followed by a trailing `RETURN`.
    pub fn compile_program(forms: &[Value]) -> Result<CodeObject, CompileError> {
        debug!(forms = forms.len(), "compiling top-level program");
        let mut fc = FunctionCompiler::new(Vec::new());
        compile_sequence(&mut fc, forms)?;
        fc.emit(Opcode::Return, 0);
        let co = fc.finish();
        debug!(instructions = co.code.len(), "compiled");
        Ok(co)
    }

    /// Compile a single expression in isolation (used by the REPL, which
    /// compiles and runs one form at a time).
    pub fn compile_expr(expr: &Value) -> Result<CodeObject, CompileError> {
        Self::compile_program(std::slice::from_ref(expr))
    }
}

/// Compile `exprs` in order, discarding every intermediate result with a
/// `POP` and leaving exactly the last expression's value on the stack. An
/// empty sequence evaluates to `Undefined`.
fn compile_sequence(fc: &mut FunctionCompiler, exprs: &[Value]) -> Result<(), CompileError> {
    if exprs.is_empty() {
        let idx = fc.const_index(Value::Undefined);
        fc.emit(Opcode::LoadConst, idx);
        return Ok(());
    }
    for (i, expr) in exprs.iter().enumerate() {
        compile_expr(fc, expr)?;
        if i + 1 < exprs.len() {
            fc.emit(Opcode::Pop, 0);
        }
    }
    Ok(())
}

fn compile_expr(fc: &mut FunctionCompiler, expr: &Value) -> Result<(), CompileError> {
    if expr.is_self_evaluating_const() {
        let idx = fc.const_index(expr.clone());
        fc.emit(Opcode::LoadConst, idx);
    } else if let Value::Symbol(name) = expr {
        let idx = fc.var_index(name);
        fc.emit(Opcode::LoadVar, idx);
    } else if ast::is_quoted(expr) {
        let idx = fc.const_index(ast::quoted_text(expr));
        fc.emit(Opcode::LoadConst, idx);
    } else if ast::is_assignment(expr) {
        compile_assignment(fc, expr)?;
    } else if ast::is_definition(expr) {
        compile_definition(fc, expr)?;
    } else if ast::is_if(expr) {
        compile_if(fc, expr)?;
    } else if ast::is_cond(expr) {
        let clauses = expr.as_pair().expect("cond is a pair").cdr();
        let desugared = ast::desugar_cond(&clauses)?;
        compile_expr(fc, &desugared)?;
    } else if ast::is_let(expr) {
        let desugared = ast::desugar_let(expr);
        compile_expr(fc, &desugared)?;
    } else if ast::is_lambda(expr) {
        compile_lambda(fc, expr, String::new())?;
    } else if ast::is_begin(expr) {
        let body = ast::begin_body(expr).expand_list();
        compile_sequence(fc, &body)?;
    } else if ast::is_proc_call(expr) {
        compile_application(fc, expr)?;
    } else {
        return Err(CompileError::UnknownForm(format!("{expr}")));
    }
    Ok(())
}

fn compile_assignment(fc: &mut FunctionCompiler, expr: &Value) -> Result<(), CompileError> {
    let name_value = ast::variable_name(expr);
    let name = name_value
        .as_symbol()
        .ok_or_else(|| CompileError::UnknownForm(format!("{expr}")))?
        .to_string();
    let value = ast::variable_value(expr).ok_or(CompileError::DefineMissingValue)?;
    compile_expr(fc, &value)?;
    let idx = fc.var_index(&name);
    fc.emit(Opcode::SetVar, idx);
    Ok(())
}

fn compile_definition(fc: &mut FunctionCompiler, expr: &Value) -> Result<(), CompileError> {
    let name_value = ast::definition_variable(expr);
    let name = name_value
        .as_symbol()
        .ok_or_else(|| CompileError::UnknownForm(format!("{expr}")))?
        .to_string();
    let value = ast::definition_value(expr).ok_or(CompileError::DefineMissingValue)?;

    if ast::is_lambda(&value) {
        let code = compile_lambda_body(&value, name.clone())?;
        let const_idx = fc.const_index(Value::CodeObject(Rc::new(code)));
        fc.emit(Opcode::DefFunc, const_idx);
        let var_idx = fc.var_index(&name);
        fc.emit(Opcode::DefVar, var_idx);
    } else {
        compile_expr(fc, &value)?;
        let var_idx = fc.var_index(&name);
        fc.emit(Opcode::DefVar, var_idx);
    }
    Ok(())
}

fn compile_if(fc: &mut FunctionCompiler, expr: &Value) -> Result<(), CompileError> {
    let cond = ast::if_cond(expr);
    let then = ast::if_then(expr);
    let else_ = ast::if_else(expr).ok_or(CompileError::IfMissingElse)?;

    compile_expr(fc, &cond)?;
    let else_label = fc.new_label();
    let end_label = fc.new_label();
    fc.emit_jump(Opcode::JumpIfFalse, else_label);
    compile_expr(fc, &then)?;
    fc.emit_jump(Opcode::Jump, end_label);
    fc.mark_label(else_label);
    compile_expr(fc, &else_)?;
    fc.mark_label(end_label);
    Ok(())
}

fn compile_lambda(fc: &mut FunctionCompiler, expr: &Value, name: String) -> Result<(), CompileError> {
    let code = compile_lambda_body(expr, name)?;
    let idx = fc.const_index(Value::CodeObject(Rc::new(code)));
    fc.emit(Opcode::LoadConst, idx);
    Ok(())
}

/// Compile a `lambda` form's parameter list and body into a fresh
/// `CodeObject`, named `name` (empty for an anonymous lambda).
fn compile_lambda_body(expr: &Value, name: String) -> Result<CodeObject, CompileError> {
    let rest = expr.as_pair().expect("lambda is a pair").cdr();
    if rest.is_nil() {
        return Err(CompileError::LambdaMissingParameters);
    }
    let rest_pair = rest.as_pair().ok_or(CompileError::LambdaMissingParameters)?;
    let params = rest_pair.car();
    let body = rest_pair.cdr().expand_list();

    let mut arg_names = Vec::new();
    for param in params.expand_list() {
        let sym = param.as_symbol().ok_or(CompileError::NonSymbolParameter)?;
        arg_names.push(sym.to_string());
    }

    debug!(name = %name, args = ?arg_names, "compiling lambda");
    let mut nested = FunctionCompiler::new(arg_names);
    nested.name = name;
    compile_sequence(&mut nested, &body)?;
    nested.emit(Opcode::Return, 0);
    Ok(nested.finish())
}

fn compile_application(fc: &mut FunctionCompiler, expr: &Value) -> Result<(), CompileError> {
    let op = ast::procedure_op(expr);
    let args = ast::procedure_args(expr).expand_list();
    compile_expr(fc, &op)?;
    for arg in &args {
        compile_expr(fc, arg)?;
    }
    fc.emit(Opcode::ProcCall, args.len() as u32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_all;

    fn compile(src: &str) -> CodeObject {
        let forms = read_all(src).unwrap();
        Compiler::compile_program(&forms).unwrap()
    }

    #[test]
    fn compiles_a_literal_and_returns() {
        let co = compile("42");
        assert_eq!(co.code.last().unwrap().opcode, Opcode::Return);
        assert_eq!(co.constants, vec![Value::Integer(42)]);
    }

    #[test]
    fn scalar_constants_dedup() {
        let co = compile("(begin 1 1 2)");
        assert_eq!(co.constants.len(), 2);
    }

    #[test]
    fn if_emits_two_jumps() {
        let co = compile("(if #t 1 2)");
        let jumps: Vec<_> = co
            .code
            .iter()
            .filter(|i| matches!(i.opcode, Opcode::Jump | Opcode::JumpIfFalse))
            .collect();
        assert_eq!(jumps.len(), 2);
    }

    #[test]
    fn if_missing_else_is_an_error() {
        let forms = read_all("(if #t 1)").unwrap();
        assert!(Compiler::compile_program(&forms).is_err());
    }

    #[test]
    fn define_of_lambda_uses_def_func_then_def_var() {
        let co = compile("(define (f x) x)");
        assert_eq!(co.code.len(), 2);
        assert_eq!(co.code[0].opcode, Opcode::DefFunc);
        assert_eq!(co.code[1].opcode, Opcode::DefVar);

        let nested = match &co.constants[co.code[0].arg as usize] {
            Value::CodeObject(nested) => nested.clone(),
            other => panic!("expected a CodeObject constant, got {other:?}"),
        };
        assert_eq!(nested.display_name(), "f");
        assert_eq!(nested.args, vec!["x".to_string()]);

        assert_eq!(co.varnames[co.code[1].arg as usize], "f");
    }

    #[test]
    fn define_of_lambda_binds_a_callable_name() {
        let forms = read_all("(define (f x) x) (f 5)").unwrap();
        let co = Compiler::compile_program(&forms).unwrap();
        // DEF_FUNC, DEF_VAR, then LOAD_VAR/LOAD_CONST/PROC_CALL for the call.
        assert!(co.code.iter().any(|i| i.opcode == Opcode::LoadVar));
        assert!(co.code.iter().any(|i| i.opcode == Opcode::ProcCall));
    }

    #[test]
    fn define_of_non_lambda_uses_def_var() {
        let co = compile("(define x 5)");
        assert!(co.code.iter().any(|i| i.opcode == Opcode::DefVar));
    }

    #[test]
    fn application_counts_arguments() {
        let co = compile("(f 1 2 3)");
        let call = co
            .code
            .iter()
            .find(|i| i.opcode == Opcode::ProcCall)
            .unwrap();
        assert_eq!(call.arg, 3);
    }

    #[test]
    fn nonsymbol_parameter_is_an_error() {
        let forms = read_all("(lambda (1) 1)").unwrap();
        assert!(Compiler::compile_program(&forms).is_err());
    }

    #[test]
    fn let_compiles_via_applied_lambda() {
        let co = compile("(let ((x 1) (y 2)) (+ x y))");
        assert!(co.code.iter().any(|i| i.opcode == Opcode::ProcCall));
    }
}
