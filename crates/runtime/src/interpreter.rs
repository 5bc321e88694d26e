//! Tree-walking interpreter (spec §4.9): an alternative evaluator that
//! walks the reader's `Value` tree directly over the same environment
//! abstraction the VM uses, instead of compiling to bytecode first.
//! Evaluation mirrors the compiler's lowering one-to-one: same truthiness,
//! same arity discipline, the same `cond`/`let` desugarings.

use std::rc::Rc;

use schemey_core::{Closure, ClosureKind, Environment, Procedure, ProcedureError, Value};
use tracing::trace;

use crate::builtins::{builtin_procedures, print_procedure, OutputSink};
use crate::error::InterpreterError;
use schemeyc::ast;

/// Evaluate a single expression against `env`.
pub fn eval(expr: &Value, env: &Environment, output: &OutputSink) -> Result<Value, InterpreterError> {
    if let Value::Symbol(name) = expr {
        return Ok(env.lookup(name)?);
    }
    if expr.as_pair().is_none() {
        // Self-evaluating atom: integer, boolean, string, or nil.
        return Ok(expr.clone());
    }

    trace!(expr = %expr, "eval");

    if ast::is_quoted(expr) {
        Ok(ast::quoted_text(expr))
    } else if ast::is_assignment(expr) {
        eval_assignment(expr, env, output)
    } else if ast::is_definition(expr) {
        eval_definition(expr, env, output)
    } else if ast::is_if(expr) {
        eval_if(expr, env, output)
    } else if ast::is_cond(expr) {
        let desugared = ast::desugar_cond(&ast::procedure_args(expr))
            .map_err(|e| InterpreterError::IfMissingElse(e.to_string()))?;
        eval(&desugared, env, output)
    } else if ast::is_let(expr) {
        let desugared = ast::desugar_let(expr);
        eval(&desugared, env, output)
    } else if ast::is_lambda(expr) {
        Ok(eval_lambda(expr, env))
    } else if ast::is_begin(expr) {
        eval_body(&ast::begin_body(expr).expand_list(), env, output)
    } else {
        eval_application(expr, env, output)
    }
}

fn eval_body(exprs: &[Value], env: &Environment, output: &OutputSink) -> Result<Value, InterpreterError> {
    let mut result = Value::Undefined;
    for e in exprs {
        result = eval(e, env, output)?;
    }
    Ok(result)
}

fn eval_assignment(expr: &Value, env: &Environment, output: &OutputSink) -> Result<Value, InterpreterError> {
    let name = ast::variable_name(expr);
    let name = name.as_symbol().ok_or_else(|| InterpreterError::NotCallable(format!("{expr}")))?;
    let value_expr = ast::variable_value(expr).unwrap_or(Value::Nil);
    let value = eval(&value_expr, env, output)?;
    env.set(name, value)?;
    Ok(Value::Undefined)
}

fn eval_definition(expr: &Value, env: &Environment, output: &OutputSink) -> Result<Value, InterpreterError> {
    let name_value = ast::definition_variable(expr);
    let name = name_value
        .as_symbol()
        .ok_or_else(|| InterpreterError::NotCallable(format!("{expr}")))?
        .to_string();
    let value_expr = ast::definition_value(expr).unwrap_or(Value::Nil);
    let value = eval(&value_expr, env, output)?;
    if let Value::Closure(c) = &value {
        c.set_name(&name);
    }
    env.define(name, value);
    Ok(Value::Undefined)
}

fn eval_if(expr: &Value, env: &Environment, output: &OutputSink) -> Result<Value, InterpreterError> {
    let cond = eval(&ast::if_cond(expr), env, output)?;
    if cond.is_truthy() {
        eval(&ast::if_then(expr), env, output)
    } else {
        match ast::if_else(expr) {
            Some(else_branch) => eval(&else_branch, env, output),
            None => Err(InterpreterError::IfMissingElse(format!("{expr}"))),
        }
    }
}

fn eval_lambda(expr: &Value, env: &Environment) -> Value {
    let params: Vec<String> = ast::lambda_parameters(expr)
        .expand_list()
        .iter()
        .filter_map(|v| v.as_symbol().map(str::to_string))
        .collect();
    let body = ast::lambda_body(expr).expand_list();
    let closure = Closure::interpreted(params, body, env.clone(), String::new());
    Value::Closure(Rc::new(closure))
}

fn eval_application(expr: &Value, env: &Environment, output: &OutputSink) -> Result<Value, InterpreterError> {
    let callee = eval(&ast::procedure_op(expr), env, output)?;
    let args: Vec<Value> = ast::procedure_args(expr)
        .expand_list()
        .iter()
        .map(|a| eval(a, env, output))
        .collect::<Result<_, _>>()?;
    apply(&callee, args, output)
}

fn apply(callee: &Value, args: Vec<Value>, output: &OutputSink) -> Result<Value, InterpreterError> {
    match callee {
        Value::Procedure(proc) => Ok(proc.apply(&args)?),
        Value::Closure(closure) => apply_closure(closure, args, output),
        other => Err(InterpreterError::NotCallable(other.to_string())),
    }
}

fn apply_closure(closure: &Rc<Closure>, args: Vec<Value>, output: &OutputSink) -> Result<Value, InterpreterError> {
    let (params, body) = match &closure.kind {
        ClosureKind::Interpreted { params, body, .. } => (params, body),
        ClosureKind::Compiled(_) => {
            unreachable!("the interpreter only ever constructs interpreted closures")
        }
    };
    if params.len() != args.len() {
        return Err(InterpreterError::ArityMismatch {
            name: closure.display_name(),
            expected: params.len(),
            got: args.len(),
        });
    }
    let call_env = Environment::new_child(&closure.env);
    for (name, value) in params.iter().zip(args) {
        call_env.define(name.clone(), value);
    }
    eval_body(body, &call_env, output)
}

/// `load`: reads a source file, parses it, and evaluates each top-level
/// form against the interpreter's global environment — not the
/// environment active at the call site, mirroring the reference
/// implementation's fixed-global `load`.
fn load_procedure(global: Environment, output: OutputSink) -> Procedure {
    Procedure::new(
        "load",
        Rc::new(move |args: &[Value]| {
            let path = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => return Err(ProcedureError::new("load expects a string path")),
            };
            let source = std::fs::read_to_string(&path)
                .map_err(|e| ProcedureError::new(format!("could not load \"{path}\": {e}")))?;
            let forms = schemeyc::read_all(&source).map_err(|e| ProcedureError::new(e.to_string()))?;
            let mut result = Value::Undefined;
            for form in &forms {
                result = eval(form, &global, &output).map_err(|e| ProcedureError::new(e.to_string()))?;
            }
            Ok(result)
        }),
    )
}

/// The tree-walking evaluator. Holds its own persistent global
/// environment, separate from any VM's, so `define`s at the REPL or via
/// `load` accumulate across calls.
pub struct Interpreter {
    output: OutputSink,
    global: Environment,
}

impl Interpreter {
    pub fn new(output: OutputSink) -> Self {
        let global = Environment::new_root();
        for proc in builtin_procedures() {
            global.define(proc.name.clone(), Value::Procedure(Rc::new(proc)));
        }
        let print = print_procedure(output.clone());
        global.define(print.name.clone(), Value::Procedure(Rc::new(print)));
        let load = load_procedure(global.clone(), output.clone());
        global.define(load.name.clone(), Value::Procedure(Rc::new(load)));
        Interpreter { output, global }
    }

    /// A handle to the persistent global environment (the REPL reuses this
    /// across inputs so top-level `define`s persist).
    pub fn global_env(&self) -> Environment {
        self.global.clone()
    }

    /// Parse and evaluate `source` as a sequence of top-level forms against
    /// the global environment, returning the last form's value.
    pub fn eval_source(&self, source: &str) -> Result<Value, InterpreterError> {
        let forms = schemeyc::read_all(source)?;
        eval_body(&forms, &self.global, &self.output)
    }

    /// Evaluate a single already-parsed form against a caller-supplied
    /// environment (the REPL needs this to report each form's value).
    pub fn eval_in(&self, expr: &Value, env: &Environment) -> Result<Value, InterpreterError> {
        eval(expr, env, &self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn sink() -> (OutputSink, Rc<RefCell<Vec<u8>>>) {
        let buf = Rc::new(RefCell::new(Vec::new()));
        (buf.clone() as OutputSink, buf)
    }

    fn interpret(src: &str) -> (Value, String) {
        let (output, buf) = sink();
        let interp = Interpreter::new(output);
        let result = interp.eval_source(src).unwrap();
        let text = String::from_utf8(buf.borrow().clone()).unwrap();
        (result, text)
    }

    #[test]
    fn arithmetic_and_print() {
        let (_, out) = interpret("(print (+ 1 2 3))");
        assert_eq!(out, "6\n");
    }

    #[test]
    fn factorial_via_recursion() {
        let (_, out) = interpret(
            "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (print (fact 5))",
        );
        assert_eq!(out, "120\n");
    }

    #[test]
    fn closures_capture_their_defining_environment() {
        let (_, out) = interpret(
            "(define (adder x) (lambda (y) (+ x y))) (define a (adder 10)) (print (a 5))",
        );
        assert_eq!(out, "15\n");
    }

    #[test]
    fn cond_and_let() {
        let (_, out) = interpret("(print (cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c)))");
        assert_eq!(out, "b\n");
        let (_, out) = interpret("(let ((x 3) (y 4)) (print (+ x y)))");
        assert_eq!(out, "7\n");
    }

    #[test]
    fn if_missing_else_is_an_error() {
        let (output, _) = sink();
        let interp = Interpreter::new(output);
        assert!(interp.eval_source("(if #t 1)").is_err());
    }

    #[test]
    fn set_car_mutates_shared_pair() {
        let (_, out) = interpret("(define p (cons 1 2)) (set-car! p 9) (print (car p))");
        assert_eq!(out, "9\n");
    }

    #[test]
    fn two_closures_from_the_same_factory_have_independent_captured_frames() {
        let (_, out) = interpret(
            "(define (make-counter) \
               (define count 0) \
               (lambda () (set! count (+ count 1)) count)) \
             (define c1 (make-counter)) \
             (define c2 (make-counter)) \
             (print (c1)) \
             (print (c1)) \
             (print (c2))",
        );
        assert_eq!(out, "1\n2\n1\n");
    }

    #[test]
    fn calling_a_non_procedure_is_an_error() {
        let (output, _) = sink();
        let interp = Interpreter::new(output);
        assert!(interp.eval_source("('a 1 2)").is_err());
    }

    #[test]
    fn load_evaluates_a_file_against_the_global_environment() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(define (double x) (* x 2))").unwrap();
        file.flush().unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let (output, out) = sink();
        let interp = Interpreter::new(output);
        interp.eval_source(&format!("(load \"{path}\")")).unwrap();
        interp.eval_source("(print (double 21))").unwrap();
        assert_eq!(String::from_utf8(out.borrow().clone()).unwrap(), "42\n");
    }
}
