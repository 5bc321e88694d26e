//! Expression algebra (spec §4.3): recognizers and accessors over the
//! `Value` tree produced by the reader, plus the `cond` and `let`
//! desugarings.

use schemey_core::Value;

use crate::error::CompileError;

pub fn is_quoted(expr: &Value) -> bool {
    expr.is_tagged("quote")
}

pub fn is_assignment(expr: &Value) -> bool {
    expr.is_tagged("set!")
}

pub fn is_begin(expr: &Value) -> bool {
    expr.is_tagged("begin")
}

pub fn is_definition(expr: &Value) -> bool {
    expr.is_tagged("define")
}

pub fn is_if(expr: &Value) -> bool {
    expr.is_tagged("if")
}

pub fn is_cond(expr: &Value) -> bool {
    expr.is_tagged("cond")
}

pub fn is_let(expr: &Value) -> bool {
    expr.is_tagged("let")
}

pub fn is_lambda(expr: &Value) -> bool {
    expr.is_tagged("lambda")
}

/// Anything else headed by a pair is a procedure call ("operator
/// application").
pub fn is_proc_call(expr: &Value) -> bool {
    expr.as_pair().is_some()
}

fn nth_cdr(expr: &Value, n: usize) -> Value {
    let mut cur = expr.clone();
    for _ in 0..n {
        cur = cur.as_pair().map(|p| p.cdr()).unwrap_or(Value::Nil);
    }
    cur
}

fn nth_car(expr: &Value, n: usize) -> Option<Value> {
    nth_cdr(expr, n).as_pair().map(|p| p.car())
}

pub fn quoted_text(expr: &Value) -> Value {
    nth_car(expr, 1).unwrap_or(Value::Nil)
}

pub fn variable_name(expr: &Value) -> Value {
    nth_car(expr, 1).unwrap_or(Value::Nil)
}

pub fn variable_value(expr: &Value) -> Option<Value> {
    nth_car(expr, 2)
}

pub fn if_cond(expr: &Value) -> Value {
    nth_car(expr, 1).unwrap_or(Value::Nil)
}

pub fn if_then(expr: &Value) -> Value {
    nth_car(expr, 2).unwrap_or(Value::Nil)
}

pub fn if_else(expr: &Value) -> Option<Value> {
    nth_car(expr, 3)
}

/// `define` supports both `(define x v)` and the formal procedure shorthand
/// `(define (f a b) body...)`, which desugars to `(define f (lambda (a b)
/// body...))`.
pub fn definition_variable(expr: &Value) -> Value {
    let head = nth_car(expr, 1).unwrap_or(Value::Nil);
    match &head {
        Value::Symbol(_) => head,
        Value::Pair(p) => p.car(),
        _ => head,
    }
}

pub fn definition_value(expr: &Value) -> Option<Value> {
    let head = nth_car(expr, 1)?;
    match &head {
        Value::Symbol(_) => nth_car(expr, 2),
        Value::Pair(p) => {
            let params = p.cdr();
            let body = nth_cdr(expr, 2);
            Some(make_lambda(params, body))
        }
        _ => None,
    }
}

pub fn lambda_parameters(expr: &Value) -> Value {
    nth_car(expr, 1).unwrap_or(Value::Nil)
}

pub fn lambda_body(expr: &Value) -> Value {
    nth_cdr(expr, 2)
}

pub fn begin_body(expr: &Value) -> Value {
    nth_cdr(expr, 1)
}

pub fn procedure_op(expr: &Value) -> Value {
    expr.as_pair().map(|p| p.car()).unwrap_or(Value::Nil)
}

pub fn procedure_args(expr: &Value) -> Value {
    expr.as_pair().map(|p| p.cdr()).unwrap_or(Value::Nil)
}

fn make_lambda(parameters: Value, body: Value) -> Value {
    Value::cons(Value::symbol("lambda"), Value::cons(parameters, body))
}

fn make_if(cond: Value, then: Value, else_: Value) -> Value {
    Value::list_from(&[Value::symbol("if"), cond, then, else_])
}

/// `begin`-wrap a list of expressions if there's more than one; a single
/// expression needs no wrapping, and no expressions desugars to `Nil`.
fn sequence_to_expression(exprs: &Value) -> Value {
    if exprs.is_nil() {
        return Value::Nil;
    }
    let items = exprs.expand_list();
    if items.len() == 1 {
        items[0].clone()
    } else {
        Value::cons(Value::symbol("begin"), exprs.clone())
    }
}

/// `cond` -> nested `if`, per spec §4.3: each `(test body...)` clause
/// becomes `(if test (begin body...) <rest>)`; a final `(else body...)`
/// clause becomes `(begin body...)`; an empty clause list is `#f`; `else`
/// anywhere but last is an error.
pub fn desugar_cond(clauses: &Value) -> Result<Value, CompileError> {
    if clauses.is_nil() {
        return Ok(Value::Boolean(false));
    }
    let pair = clauses.as_pair().expect("non-nil clause list is a pair");
    let clause = pair.car();
    let rest = pair.cdr();
    let clause_pair = clause
        .as_pair()
        .ok_or_else(|| CompileError::UnknownForm(format!("{clause}")))?;
    let test = clause_pair.car();
    let actions = clause_pair.cdr();

    if matches!(test.as_symbol(), Some("else")) {
        if rest.is_nil() {
            Ok(sequence_to_expression(&actions))
        } else {
            Err(CompileError::ElseNotLast(format!("{clauses}")))
        }
    } else {
        let then = sequence_to_expression(&actions);
        let else_ = desugar_cond(&rest)?;
        Ok(make_if(test, then, else_))
    }
}

/// `let` -> an immediately-applied `lambda`: `(let ((x a) (y b)) body...)`
/// becomes `((lambda (x y) body...) a b)`.
pub fn desugar_let(expr: &Value) -> Value {
    let bindings = lambda_parameters(expr).expand_list();
    let body = lambda_body(expr);

    let mut names = Vec::with_capacity(bindings.len());
    let mut inits = Vec::with_capacity(bindings.len());
    for binding in &bindings {
        let parts = binding.expand_list();
        names.push(parts[0].clone());
        inits.push(parts[1].clone());
    }

    let lambda = Value::cons(
        Value::symbol("lambda"),
        Value::cons(Value::list_from(&names), body),
    );
    let mut call = Value::cons(lambda, Value::Nil);
    // append the init expressions as call arguments, preserving order
    let mut tail_ptr = call.as_pair().unwrap().clone();
    for init in inits {
        let new_tail = Value::cons(init, Value::Nil);
        tail_ptr.set_cdr(new_tail.clone());
        tail_ptr = new_tail.as_pair().unwrap().clone();
    }
    call
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_all;

    #[test]
    fn cond_desugars_to_nested_if() {
        let forms = read_all("(cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c))").unwrap();
        let clauses = forms[0].as_pair().unwrap().cdr();
        let desugared = desugar_cond(&clauses).unwrap();
        assert!(is_if(&desugared));
    }

    #[test]
    fn empty_cond_is_false() {
        let desugared = desugar_cond(&Value::Nil).unwrap();
        assert_eq!(desugared, Value::Boolean(false));
    }

    #[test]
    fn else_not_last_is_an_error() {
        let forms = read_all("(cond (else 'a) ((= 1 1) 'b))").unwrap();
        let clauses = forms[0].as_pair().unwrap().cdr();
        assert!(desugar_cond(&clauses).is_err());
    }

    #[test]
    fn let_desugars_to_applied_lambda() {
        let forms = read_all("(let ((x 3) (y 4)) (+ x y))").unwrap();
        let desugared = desugar_let(&forms[0]);
        assert!(is_proc_call(&desugared));
        let op = procedure_op(&desugared);
        assert!(is_lambda(&op));
        let args = procedure_args(&desugared).expand_list();
        assert_eq!(args, vec![Value::Integer(3), Value::Integer(4)]);
    }
}
