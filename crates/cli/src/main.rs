//! Schemey CLI: compile, decompile, execute, or REPL against the Schemey
//! language — a small Scheme subset with a stack bytecode VM and an
//! alternative tree-walking interpreter.

mod config;
mod repl;

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{generate, Shell};

use schemey_runtime::{Interpreter, OutputSink, VirtualMachine};

use config::Config;

#[derive(ClapParser)]
#[command(name = "schemey")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "A small Scheme subset: lexer, reader, bytecode compiler, stack VM, and tree interpreter",
    long_about = None
)]
struct Cli {
    /// Print a shell completion script for the given shell and exit.
    #[arg(long = "completions", value_name = "SHELL")]
    completions: Option<Shell>,

    /// Compile a source file to bytecode: SRC [OUT]. Default OUT is
    /// SRC with its extension replaced by `.pcode`.
    #[arg(short = 'c', long = "compile", num_args = 1..=2, value_names = ["SRC", "OUT"])]
    compile: Option<Vec<PathBuf>>,

    /// Deserialize a bytecode file and print its top-level CodeObject.
    #[arg(short = 'd', long = "decompile", value_name = "PATH")]
    decompile: Option<PathBuf>,

    /// Deserialize a bytecode file and execute it via the virtual machine.
    #[arg(short = 'e', long = "execute", value_name = "PATH")]
    execute: Option<PathBuf>,

    /// Compile a source file, write its bytecode, reload it, and execute it.
    #[arg(long = "run", value_name = "SRC")]
    run: Option<PathBuf>,

    /// Enter the read-eval-print loop.
    #[arg(short = 'r', long = "repl")]
    repl: bool,

    /// Run the built-in test suite.
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Override the virtual machine's maximum recursion depth.
    #[arg(long = "max-depth", value_name = "N")]
    max_depth: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("schemey=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        generate(shell, &mut Cli::command(), "schemey", &mut std::io::stdout());
        return;
    }

    let mut config = Config::new();
    if let Some(depth) = cli.max_depth {
        config = config.with_max_depth(depth);
    }

    let result = if let Some(paths) = &cli.compile {
        run_compile(paths)
    } else if let Some(path) = &cli.decompile {
        run_decompile(path)
    } else if let Some(path) = &cli.execute {
        run_execute(path, &config)
    } else if let Some(path) = &cli.run {
        run_compile_then_execute(path, &config)
    } else if cli.test {
        run_test_suite(&config)
    } else {
        // `-r`, and the no-flags default, both enter the REPL.
        repl::run(&config)
    };

    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1);
    }
}

/// `<src-without-its-extension>.pcode`, in src's own directory.
fn default_output_path(src: &Path) -> PathBuf {
    src.with_extension("pcode")
}

fn run_compile(paths: &[PathBuf]) -> Result<(), String> {
    let src = &paths[0];
    let out = paths.get(1).cloned().unwrap_or_else(|| default_output_path(src));

    let source = fs::read_to_string(src).map_err(|e| format!("could not read \"{}\": {e}", src.display()))?;
    let code = schemeyc::compile_source(&source).map_err(|e| e.to_string())?;
    let bytes = schemeyc::bytecode::serialize(&code).map_err(|e| e.to_string())?;
    fs::write(&out, bytes).map_err(|e| format!("could not write \"{}\": {e}", out.display()))?;

    println!("Compiled {} -> {}", src.display(), out.display());
    Ok(())
}

fn run_decompile(path: &Path) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("could not read \"{}\": {e}", path.display()))?;
    let code = schemeyc::bytecode::deserialize(&bytes).map_err(|e| e.to_string())?;
    println!("{code}");
    Ok(())
}

fn run_execute(path: &Path, config: &Config) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|e| format!("could not read \"{}\": {e}", path.display()))?;
    let code = schemeyc::bytecode::deserialize(&bytes).map_err(|e| e.to_string())?;
    let output: OutputSink = Rc::new(RefCell::new(std::io::stdout()));
    let mut vm = VirtualMachine::with_max_depth(output, config.max_depth);
    vm.run(code).map_err(|e| e.to_string())?;
    Ok(())
}

fn run_compile_then_execute(src: &Path, config: &Config) -> Result<(), String> {
    let source = fs::read_to_string(src).map_err(|e| format!("could not read \"{}\": {e}", src.display()))?;
    let code = schemeyc::compile_source(&source).map_err(|e| e.to_string())?;
    let bytes = schemeyc::bytecode::serialize(&code).map_err(|e| e.to_string())?;

    let out = default_output_path(src);
    fs::write(&out, &bytes).map_err(|e| format!("could not write \"{}\": {e}", out.display()))?;

    let reloaded = fs::read(&out).map_err(|e| format!("could not read \"{}\": {e}", out.display()))?;
    let code = schemeyc::bytecode::deserialize(&reloaded).map_err(|e| e.to_string())?;

    let output: OutputSink = Rc::new(RefCell::new(std::io::stdout()));
    let mut vm = VirtualMachine::with_max_depth(output, config.max_depth);
    vm.run(code).map_err(|e| e.to_string())?;
    Ok(())
}

/// One of the spec's concrete testable-property scenarios: a program and
/// its expected `print` output.
struct Scenario {
    name: &'static str,
    source: &'static str,
    expected_stdout: &'static str,
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "arithmetic and print",
        source: "(print (+ 1 2 3))",
        expected_stdout: "6\n",
    },
    Scenario {
        name: "factorial via recursion",
        source: "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (print (fact 5))",
        expected_stdout: "120\n",
    },
    Scenario {
        name: "closures capture their defining environment",
        source: "(define (adder x) (lambda (y) (+ x y))) (define a (adder 10)) (print (a 5))",
        expected_stdout: "15\n",
    },
    Scenario {
        name: "set-car! mutates a shared pair",
        source: "(define p (cons 1 2)) (set-car! p 9) (print (car p))",
        expected_stdout: "9\n",
    },
    Scenario {
        name: "if takes the false branch",
        source: "(print (if (= 1 2) 'yes 'no))",
        expected_stdout: "no\n",
    },
    Scenario {
        name: "let binds local names",
        source: "(let ((x 3) (y 4)) (print (+ x y)))",
        expected_stdout: "7\n",
    },
    Scenario {
        name: "cond picks the matching clause",
        source: "(print (cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c)))",
        expected_stdout: "b\n",
    },
];

/// Runs each concrete scenario through both evaluators and checks that
/// their `print` output matches the expected stdout (spec testable
/// property 3: compile/interpret agreement).
fn run_test_suite(config: &Config) -> Result<(), String> {
    println!("Virtual machine & interpreter agreement:\n");

    let mut failures = 0;
    for scenario in SCENARIOS {
        let vm_out = run_via_vm(scenario.source, config);
        let interp_out = run_via_interpreter(scenario.source);
        let vm_ok = vm_out.as_deref() == Ok(scenario.expected_stdout);
        let interp_ok = interp_out.as_deref() == Ok(scenario.expected_stdout);

        if vm_ok && interp_ok {
            println!("ok   {}", scenario.name);
        } else {
            failures += 1;
            println!("FAIL {}", scenario.name);
            if !vm_ok {
                println!("     vm:          {vm_out:?}");
            }
            if !interp_ok {
                println!("     interpreter: {interp_out:?}");
            }
        }
    }

    println!("\n{}/{} scenarios passed", SCENARIOS.len() - failures, SCENARIOS.len());
    if failures > 0 {
        Err(format!("{failures} scenario(s) failed"))
    } else {
        Ok(())
    }
}

fn run_via_vm(source: &str, config: &Config) -> Result<String, String> {
    let forms = schemeyc::read_all(source).map_err(|e| e.to_string())?;
    let code = schemeyc::Compiler::compile_program(&forms).map_err(|e| e.to_string())?;
    let buf: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = buf.clone() as OutputSink;
    let mut vm = VirtualMachine::with_max_depth(sink, config.max_depth);
    vm.run(code).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&buf.borrow()).into_owned())
}

fn run_via_interpreter(source: &str) -> Result<String, String> {
    let buf: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = buf.clone() as OutputSink;
    let interpreter = Interpreter::new(sink);
    interpreter.eval_source(source).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&buf.borrow()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn compile_decompile_execute_round_trip_through_real_files() {
        let mut src_file = tempfile::Builder::new().suffix(".scm").tempfile().unwrap();
        writeln!(src_file, "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (print (fact 5))").unwrap();
        src_file.flush().unwrap();
        let src_path = src_file.path().to_path_buf();

        let out_path = tempfile::Builder::new().suffix(".pcode").tempfile().unwrap().into_temp_path();
        let out_path = out_path.to_path_buf();

        run_compile(&[src_path.clone(), out_path.clone()]).unwrap();
        assert!(out_path.exists());

        run_decompile(&out_path).unwrap();
        run_execute(&out_path, &Config::new()).unwrap();
    }

    #[test]
    fn compile_then_execute_writes_bytecode_next_to_the_source() {
        let mut src_file = tempfile::Builder::new().suffix(".scm").tempfile().unwrap();
        writeln!(src_file, "(print (+ 1 2 3))").unwrap();
        src_file.flush().unwrap();
        let src_path = src_file.path().to_path_buf();

        run_compile_then_execute(&src_path, &Config::new()).unwrap();
        assert!(default_output_path(&src_path).exists());
    }
}
