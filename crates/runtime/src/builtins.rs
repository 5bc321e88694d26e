//! Built-in procedures (spec §4.7): arithmetic, comparison, list/pair
//! operations, type predicates, and the two non-short-circuiting logical
//! operators.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use schemey_core::{Procedure, ProcedureError, Value};

/// Where `print` writes. A trait object so the VM/interpreter can point it
/// at stdout, a REPL's line writer, or an in-memory buffer in tests.
pub type OutputSink = Rc<RefCell<dyn Write>>;

fn check_integers(args: &[Value]) -> Result<Vec<i32>, ProcedureError> {
    args.iter()
        .map(|v| v.as_integer().ok_or_else(|| ProcedureError::new("Expected numbers only")))
        .collect()
}

/// Python's reduce-with-first-element fold: a single argument passes
/// through unchanged (so `(- 5)` is `5`, not `-5`) — preserved from the
/// reference implementation's arithmetic builtins.
fn fold_integers(args: &[Value], f: impl Fn(i32, i32) -> Result<i32, ProcedureError>) -> Result<Value, ProcedureError> {
    let nums = check_integers(args)?;
    let mut acc = *nums.first().ok_or_else(|| ProcedureError::new("Expected at least one argument"))?;
    for &n in &nums[1..] {
        acc = f(acc, n)?;
    }
    Ok(Value::Integer(acc))
}

fn floor_div(a: i32, b: i32) -> Result<i32, ProcedureError> {
    if b == 0 {
        return Err(ProcedureError::new("division by zero"));
    }
    let q = a / b;
    let r = a % b;
    Ok(if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q })
}

fn floor_mod(a: i32, b: i32) -> Result<i32, ProcedureError> {
    if b == 0 {
        return Err(ProcedureError::new("division by zero"));
    }
    let r = a % b;
    Ok(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
}

/// Left-to-right chained comparison: `(< a b c)` is `a<b && b<c`, not
/// Python's type-punning `reduce(op.lt, [a, b, c])`.
fn chained_compare(args: &[Value], cmp: impl Fn(i32, i32) -> bool) -> Result<Value, ProcedureError> {
    let nums = check_integers(args)?;
    let ok = nums.windows(2).all(|w| cmp(w[0], w[1]));
    Ok(Value::Boolean(ok))
}

fn builtin_list(args: &[Value]) -> Result<Value, ProcedureError> {
    Ok(Value::list_from(args))
}

fn builtin_cons(args: &[Value]) -> Result<Value, ProcedureError> {
    match args {
        [a, b] => Ok(Value::cons(a.clone(), b.clone())),
        _ => Err(ProcedureError::new("cons expects exactly 2 arguments")),
    }
}

fn builtin_car(args: &[Value]) -> Result<Value, ProcedureError> {
    let pair = args
        .first()
        .and_then(Value::as_pair)
        .ok_or_else(|| ProcedureError::new("Expected pair or list."))?;
    Ok(pair.car())
}

fn builtin_cdr(args: &[Value]) -> Result<Value, ProcedureError> {
    let pair = args
        .first()
        .and_then(Value::as_pair)
        .ok_or_else(|| ProcedureError::new("Expected pair or list."))?;
    Ok(pair.cdr())
}

fn builtin_set_car(args: &[Value]) -> Result<Value, ProcedureError> {
    match args {
        [Value::Pair(p), v] => {
            p.set_car(v.clone());
            Ok(Value::Pair(p.clone()))
        }
        _ => Err(ProcedureError::new("Expected pair or list.")),
    }
}

fn builtin_set_cdr(args: &[Value]) -> Result<Value, ProcedureError> {
    match args {
        [Value::Pair(p), v] => {
            p.set_cdr(v.clone());
            Ok(Value::Pair(p.clone()))
        }
        _ => Err(ProcedureError::new("Expected pair or list.")),
    }
}

fn builtin_string_length(args: &[Value]) -> Result<Value, ProcedureError> {
    match args.first() {
        Some(Value::String(s)) => Ok(Value::Integer(s.chars().count() as i32)),
        _ => Err(ProcedureError::new("Expected string.")),
    }
}

/// `eq?`/`eqv?`: identity for pairs, structural value equality otherwise.
/// Extra arguments beyond the first two are an error (tightened per the
/// reference implementation's silently-ignored-extra-args anomaly).
fn builtin_eqv(args: &[Value]) -> Result<Value, ProcedureError> {
    match args {
        [a, b] => Ok(Value::Boolean(a == b)),
        _ => Err(ProcedureError::new("eq?/eqv? expects exactly 2 arguments")),
    }
}

fn builtin_and(args: &[Value]) -> Result<Value, ProcedureError> {
    for a in args {
        if !a.is_truthy() {
            return Ok(a.clone());
        }
    }
    Ok(args.last().cloned().unwrap_or(Value::Boolean(true)))
}

fn builtin_or(args: &[Value]) -> Result<Value, ProcedureError> {
    for a in args {
        if *a == Value::Boolean(true) {
            return Ok(a.clone());
        }
    }
    Ok(args.last().cloned().unwrap_or(Value::Boolean(false)))
}

fn builtin_not(args: &[Value]) -> Result<Value, ProcedureError> {
    match args.first() {
        Some(v) => Ok(Value::Boolean(!v.is_truthy())),
        None => Err(ProcedureError::new("not expects exactly 1 argument")),
    }
}

fn predicate(
    name: &'static str,
    test: impl Fn(&Value) -> bool + 'static,
) -> Procedure {
    Procedure::new(name, Rc::new(move |args: &[Value]| {
        let v = args.first().ok_or_else(|| ProcedureError::new(format!("{name} expects exactly 1 argument")))?;
        Ok(Value::Boolean(test(v)))
    }))
}

fn arith(name: &'static str, f: impl Fn(i32, i32) -> Result<i32, ProcedureError> + 'static) -> Procedure {
    Procedure::new(name, Rc::new(move |args: &[Value]| fold_integers(args, &f)))
}

fn compare(name: &'static str, f: impl Fn(i32, i32) -> bool + 'static) -> Procedure {
    Procedure::new(name, Rc::new(move |args: &[Value]| chained_compare(args, &f)))
}

fn proc(name: &'static str, f: impl Fn(&[Value]) -> Result<Value, ProcedureError> + 'static) -> Procedure {
    Procedure::new(name, Rc::new(f))
}

/// All built-ins except `print`, which needs the VM/interpreter's output
/// stream and so is bound separately by `standard_bindings`.
pub fn builtin_procedures() -> Vec<Procedure> {
    vec![
        predicate("pair?", |v| matches!(v, Value::Pair(_))),
        predicate("zero?", |v| matches!(v, Value::Integer(0))),
        predicate("boolean?", |v| matches!(v, Value::Boolean(_))),
        predicate("symbol?", |v| matches!(v, Value::Symbol(_))),
        predicate("number?", |v| matches!(v, Value::Integer(_))),
        predicate("null?", |v| v.is_nil()),
        predicate("string?", |v| matches!(v, Value::String(_))),
        arith("+", |a, b| Ok(a.wrapping_add(b))),
        arith("-", |a, b| Ok(a.wrapping_sub(b))),
        arith("*", |a, b| Ok(a.wrapping_mul(b))),
        arith("/", floor_div),
        arith("%", floor_mod),
        compare("=", |a, b| a == b),
        compare(">", |a, b| a > b),
        compare("<", |a, b| a < b),
        compare(">=", |a, b| a >= b),
        compare("<=", |a, b| a <= b),
        proc("and", builtin_and),
        proc("or", builtin_or),
        proc("not", builtin_not),
        proc("list", builtin_list),
        proc("cons", builtin_cons),
        proc("car", builtin_car),
        proc("cdr", builtin_cdr),
        proc("set-car!", builtin_set_car),
        proc("set-cdr!", builtin_set_cdr),
        proc("string-length", builtin_string_length),
        proc("eq?", builtin_eqv),
        proc("eqv?", builtin_eqv),
    ]
}

/// `print`: writes `repr(v)` plus a newline to `output`, and evaluates to
/// the undefined sentinel.
pub fn print_procedure(output: OutputSink) -> Procedure {
    Procedure::new(
        "print",
        Rc::new(move |args: &[Value]| {
            let v = args.first().ok_or_else(|| ProcedureError::new("print expects exactly 1 argument"))?;
            let mut out = output.borrow_mut();
            writeln!(out, "{v}").map_err(|e| ProcedureError::new(e.to_string()))?;
            Ok(Value::Undefined)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_minus_is_identity() {
        let minus = arith("-", |a, b| Ok(a - b));
        let result = minus.apply(&[Value::Integer(5)]).unwrap();
        assert_eq!(result, Value::Integer(5));
    }

    #[test]
    fn chained_less_than() {
        let lt = compare("<", |a, b| a < b);
        assert_eq!(lt.apply(&[Value::Integer(1), Value::Integer(2), Value::Integer(3)]).unwrap(), Value::Boolean(true));
        assert_eq!(lt.apply(&[Value::Integer(1), Value::Integer(3), Value::Integer(2)]).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert_eq!(floor_div(-7, 2).unwrap(), -4);
        assert_eq!(floor_mod(-7, 2).unwrap(), 1);
    }

    #[test]
    fn and_short_circuits_on_value_not_evaluation() {
        let result = builtin_and(&[Value::Integer(1), Value::Boolean(false), Value::Integer(2)]).unwrap();
        assert_eq!(result, Value::Boolean(false));
    }

    #[test]
    fn or_returns_first_literal_true_else_the_last_argument() {
        let result = builtin_or(&[Value::Boolean(false), Value::Integer(7), Value::Integer(2)]).unwrap();
        assert_eq!(result, Value::Integer(2));

        let result = builtin_or(&[Value::Integer(7), Value::Boolean(true), Value::Integer(2)]).unwrap();
        assert_eq!(result, Value::Boolean(true));
    }

    #[test]
    fn car_of_nil_is_an_error() {
        assert!(builtin_car(&[Value::Nil]).is_err());
    }
}
