//! Stack virtual machine (spec §4.8): frame stack, value stack, and the
//! fetch-decode-execute dispatch loop.

use std::rc::Rc;

use schemey_core::{Closure, ClosureKind, CodeObject, Environment, Opcode, Procedure, Value};
use tracing::{debug, trace};

use crate::builtins::{builtin_procedures, print_procedure, OutputSink};
use crate::error::VmError;

/// One activation of a `CodeObject`: its value stack, instruction pointer,
/// and local environment.
struct Frame {
    code: Rc<CodeObject>,
    env: Environment,
    stack: Vec<Value>,
    ip: usize,
}

impl Frame {
    fn new(code: Rc<CodeObject>, env: Environment) -> Self {
        Frame {
            code,
            env,
            stack: Vec::new(),
            ip: 0,
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        // POP tolerates an empty stack; callers that truly need a value
        // (RETURN, PROC_CALL, SET_VAR, DEF_VAR, JUMP_IF_FALSE) rely on the
        // compiler never emitting those against an empty stack.
        self.stack.pop().unwrap_or(Value::Undefined)
    }
}

/// Bounds how many nested `PROC_CALL`s the VM will recurse through on the
/// host stack, in lieu of the reference implementation's process-wide
/// recursion-limit bump (spec §9's "global state" redesign point).
const DEFAULT_MAX_DEPTH: usize = 10_000;

pub struct VirtualMachine {
    output: OutputSink,
    max_depth: usize,
    depth: usize,
}

impl VirtualMachine {
    pub fn new(output: OutputSink) -> Self {
        VirtualMachine {
            output,
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
        }
    }

    pub fn with_max_depth(output: OutputSink, max_depth: usize) -> Self {
        VirtualMachine {
            output,
            max_depth,
            depth: 0,
        }
    }

    /// The standard top-level environment: every built-in plus `print`,
    /// which is bound here because it needs this VM's output stream.
    pub fn standard_env(&self) -> Environment {
        let env = Environment::new_root();
        for proc in builtin_procedures() {
            env.define(proc.name.clone(), Value::Procedure(Rc::new(proc)));
        }
        let print = print_procedure(self.output.clone());
        env.define(print.name.clone(), Value::Procedure(Rc::new(print)));
        env
    }

    /// Run `code` as a top-level program against a fresh standard
    /// environment, returning its final value.
    pub fn run(&mut self, code: CodeObject) -> Result<Value, VmError> {
        let env = self.standard_env();
        self.run_in(code, env)
    }

    /// Run `code` against a caller-supplied environment (the REPL reuses
    /// one environment across inputs so top-level `define`s persist).
    pub fn run_in(&mut self, code: CodeObject, env: Environment) -> Result<Value, VmError> {
        debug!(name = %code.display_name(), "running code object");
        let frame = Frame::new(Rc::new(code), env);
        self.run_frame(frame)
    }

    fn run_frame(&mut self, mut frame: Frame) -> Result<Value, VmError> {
        self.depth += 1;
        let result = (|| loop {
            if frame.ip >= frame.code.code.len() {
                return Ok(frame.pop());
            }
            let instr = frame.code.code[frame.ip];
            frame.ip += 1;
            trace!(ip = frame.ip - 1, opcode = %instr.opcode, arg = instr.arg, "dispatch");

            match instr.opcode {
                Opcode::LoadConst => {
                    frame.push(frame.code.constants[instr.arg as usize].clone());
                }
                Opcode::LoadVar => {
                    let name = &frame.code.varnames[instr.arg as usize];
                    let value = frame.env.lookup(name)?;
                    frame.push(value);
                }
                Opcode::SetVar => {
                    let value = frame.pop();
                    let name = &frame.code.varnames[instr.arg as usize];
                    frame.env.set(name, value)?;
                    frame.push(Value::Undefined);
                }
                Opcode::DefVar => {
                    let value = frame.pop();
                    let name = frame.code.varnames[instr.arg as usize].clone();
                    frame.env.define(name, value);
                    frame.push(Value::Undefined);
                }
                Opcode::DefFunc => {
                    let code = match &frame.code.constants[instr.arg as usize] {
                        Value::CodeObject(co) => co.clone(),
                        _ => unreachable!("DEF_FUNC constant is always a CodeObject"),
                    };
                    let closure = Closure::compiled(code, frame.env.clone());
                    frame.push(Value::Closure(Rc::new(closure)));
                }
                Opcode::ProcCall => {
                    let retval = self.dispatch_call(&mut frame, instr.arg as usize)?;
                    frame.push(retval);
                }
                Opcode::JumpIfFalse => {
                    let cond = frame.pop();
                    if !cond.is_truthy() {
                        frame.ip = instr.arg as usize;
                    }
                }
                Opcode::Jump => {
                    frame.ip = instr.arg as usize;
                }
                Opcode::Return => {
                    return Ok(frame.pop());
                }
                Opcode::Pop => {
                    frame.stack.pop();
                }
            }
        })();
        self.depth -= 1;
        result
    }

    fn dispatch_call(&mut self, frame: &mut Frame, argc: usize) -> Result<Value, VmError> {
        let mut args: Vec<Value> = (0..argc).map(|_| frame.pop()).collect();
        args.reverse();
        let callee = frame.pop();

        match &callee {
            Value::Procedure(proc) => self.apply_builtin(proc, &args),
            Value::Closure(closure) => self.apply_closure(closure, args),
            other => Err(VmError::NotCallable(other.to_string())),
        }
    }

    fn apply_builtin(&mut self, proc: &Rc<Procedure>, args: &[Value]) -> Result<Value, VmError> {
        Ok(proc.apply(args)?)
    }

    fn apply_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Result<Value, VmError> {
        let code = match &closure.kind {
            ClosureKind::Compiled(code) => code.clone(),
            ClosureKind::Interpreted { .. } => {
                unreachable!("the VM only ever constructs compiled closures")
            }
        };
        if code.args.len() != args.len() {
            return Err(VmError::ArityMismatch {
                name: closure.display_name(),
                expected: code.args.len(),
                got: args.len(),
            });
        }
        if self.depth >= self.max_depth {
            return Err(VmError::Procedure(schemey_core::ProcedureError::new(
                "maximum recursion depth exceeded",
            )));
        }

        let call_env = Environment::new_child(&closure.env);
        for (name, value) in code.args.iter().zip(args) {
            call_env.define(name.clone(), value);
        }
        let frame = Frame::new(code, call_env);
        self.run_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemey_core::Instruction;
    use std::cell::RefCell;

    fn sink() -> (OutputSink, Rc<RefCell<Vec<u8>>>) {
        let buf = Rc::new(RefCell::new(Vec::new()));
        (buf.clone() as OutputSink, buf)
    }

    fn compile_and_run(src: &str) -> (Value, String) {
        let forms = schemeyc::read_all(src).unwrap();
        let code = schemeyc::Compiler::compile_program(&forms).unwrap();
        let (output, buf) = sink();
        let mut vm = VirtualMachine::new(output);
        let result = vm.run(code).unwrap();
        let text = String::from_utf8(buf.borrow().clone()).unwrap();
        (result, text)
    }

    #[test]
    fn arithmetic_and_print() {
        let (_, out) = compile_and_run("(print (+ 1 2 3))");
        assert_eq!(out, "6\n");
    }

    #[test]
    fn factorial_via_recursion() {
        let (_, out) = compile_and_run(
            "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (print (fact 5))",
        );
        assert_eq!(out, "120\n");
    }

    #[test]
    fn closures_capture_their_defining_environment() {
        let (_, out) = compile_and_run(
            "(define (adder x) (lambda (y) (+ x y))) (define a (adder 10)) (print (a 5))",
        );
        assert_eq!(out, "15\n");
    }

    #[test]
    fn set_car_mutates_shared_pair() {
        let (_, out) = compile_and_run("(define p (cons 1 2)) (set-car! p 9) (print (car p))");
        assert_eq!(out, "9\n");
    }

    #[test]
    fn cond_and_let() {
        let (_, out) = compile_and_run("(print (cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c)))");
        assert_eq!(out, "b\n");
        let (_, out) = compile_and_run("(let ((x 3) (y 4)) (print (+ x y)))");
        assert_eq!(out, "7\n");
    }

    #[test]
    fn two_closures_from_the_same_factory_have_independent_captured_frames() {
        let (_, out) = compile_and_run(
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
    fn pop_tolerates_an_empty_stack() {
        let forms = schemeyc::read_all("(define x 1)").unwrap();
        let mut code = schemeyc::Compiler::compile_program(&forms).unwrap();
        code.code.push(Instruction::new(Opcode::Pop, 0));
        let (output, _) = sink();
        let mut vm = VirtualMachine::new(output);
        assert!(vm.run(code).is_ok());
    }

    #[test]
    fn calling_a_non_procedure_is_an_error() {
        let forms = schemeyc::read_all("('a 1 2)").unwrap();
        let code = schemeyc::Compiler::compile_program(&forms).unwrap();
        let (output, _) = sink();
        let mut vm = VirtualMachine::new(output);
        assert!(vm.run(code).is_err());
    }
}
