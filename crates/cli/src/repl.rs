//! The read-eval-print loop. Gathers input until parentheses balance,
//! evaluates the first top-level form against a persistent global
//! environment (so `define`s accumulate across inputs), and prints
//! `=> <value>` unless the value is the undefined sentinel.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use schemey_core::Value;
use schemey_runtime::{Interpreter, OutputSink};

use crate::config::Config;

fn balanced_parens(s: &str) -> bool {
    let mut lparen = 0i32;
    let mut rparen = 0i32;
    for c in s.chars() {
        match c {
            '(' => lparen += 1,
            ')' => rparen += 1,
            _ => {}
        }
    }
    lparen == rparen
}

/// Run the REPL against stdin/stdout. Returns `Ok(())` on `exit` or EOF;
/// per-input errors are caught and printed without ending the session.
pub fn run(_config: &Config) -> Result<(), String> {
    let output: OutputSink = Rc::new(RefCell::new(io::stdout()));
    let interpreter = Interpreter::new(output);
    let env = interpreter.global_env();

    println!("Schemey REPL\nenter a scheme expression to evaluate it or \"exit\" to quit.\n");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut line_no = 0usize;

    loop {
        print!("[{line_no}]> ");
        io::stdout().flush().map_err(|e| e.to_string())?;

        let Some(first) = lines.next() else {
            break;
        };
        let mut code = first.map_err(|e| e.to_string())?;

        while !balanced_parens(&code) {
            print!("...  ");
            io::stdout().flush().map_err(|e| e.to_string())?;
            let Some(more) = lines.next() else {
                break;
            };
            code.push('\n');
            code.push_str(&more.map_err(|e| e.to_string())?);
        }

        if code.trim() == "exit" {
            break;
        }

        match schemeyc::read_all(&code) {
            Ok(forms) => {
                if let Some(expr) = forms.first() {
                    match interpreter.eval_in(expr, &env) {
                        Ok(Value::Undefined) => {}
                        Ok(value) => println!("=> {value}"),
                        Err(e) => println!("{e}"),
                    }
                }
            }
            Err(e) => println!("{e}"),
        }

        line_no += 1;
    }

    Ok(())
}
