//! Command-line driver for the pystep bytecode interpreter.
//!
//! Ships a handful of hand-assembled demo programs; `list` names them,
//! `dis` prints their disassembly, and `run` executes them with optional
//! per-instruction tracing.

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pystep_code::{disassemble, Asm, AsmError, CodeObject, CompareKind, Opcode};
use pystep_value::{default_scopes, PyHost, PyValue};
use pystep_vm::Machine;

#[derive(Debug, Error)]
enum CliError {
    #[error("unknown program '{0}' (run `pystep list` to see what ships)")]
    UnknownProgram(String),

    #[error("assembly error: {0}")]
    Assemble(#[from] AsmError),

    #[error("fault at offset {offset}: {message}")]
    Fault { offset: usize, message: String },

    #[error("program did not finish within {0} steps")]
    StepLimit(u64),
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pystep", version)]
#[command(about = "Sandboxed single-stepping stack-bytecode interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the bundled demo programs
    List,

    /// Disassemble a demo program
    Dis {
        /// Program name
        #[arg(value_name = "PROGRAM")]
        program: String,
    },

    /// Run a demo program
    Run {
        /// Program name
        #[arg(value_name = "PROGRAM")]
        program: String,

        /// Print every executed instruction with the stack after it
        #[arg(short, long)]
        trace: bool,

        /// Abort after this many instructions
        #[arg(long, default_value = "100000")]
        max_steps: u64,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if matches!(&cli.command, Commands::Run { verbose: true, .. }) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::List => cmd_list(),
        Commands::Dis { program } => cmd_dis(&program),
        Commands::Run {
            program,
            trace,
            max_steps,
            verbose: _,
        } => cmd_run(&program, trace, max_steps),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

struct Demo {
    name: &'static str,
    summary: &'static str,
    build: fn() -> Result<CodeObject<PyValue>, AsmError>,
}

const DEMOS: &[Demo] = &[
    Demo {
        name: "arith",
        summary: "arithmetic, name binding, and a for loop with break/continue",
        build: build_arith,
    },
    Demo {
        name: "collatz",
        summary: "while loop counting Collatz steps from 6",
        build: build_collatz,
    },
    Demo {
        name: "containers",
        summary: "list and dict mutation, builtins, and a reversing slice",
        build: build_containers,
    },
    Demo {
        name: "faulty",
        summary: "divides by zero to show fault reporting",
        build: build_faulty,
    },
];

fn find_demo(name: &str) -> CliResult<&'static Demo> {
    DEMOS
        .iter()
        .find(|demo| demo.name == name)
        .ok_or_else(|| CliError::UnknownProgram(name.to_owned()))
}

fn cmd_list() -> CliResult<()> {
    for demo in DEMOS {
        println!("{:<12} {}", demo.name, demo.summary);
    }
    Ok(())
}

fn cmd_dis(name: &str) -> CliResult<()> {
    let demo = find_demo(name)?;
    let code = (demo.build)()?;
    print!("{}", disassemble(&code));
    Ok(())
}

fn cmd_run(name: &str, trace: bool, max_steps: u64) -> CliResult<()> {
    let demo = find_demo(name)?;
    let code = (demo.build)()?;
    info!(
        "{}: {} bytes, {} consts, {} names",
        demo.name,
        code.instructions.len(),
        code.consts.len(),
        code.names.len()
    );

    let mut machine = Machine::new(&code, PyHost, default_scopes());
    let mut steps = 0u64;
    while !machine.finished() {
        if steps >= max_steps {
            return Err(CliError::StepLimit(max_steps));
        }
        let offset = machine.cursor();
        match machine.step() {
            Ok((op, arg)) => {
                if trace {
                    let stack = machine
                        .stack()
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!(
                        "{steps:>5}  {offset:>4}  {:<24} {arg:>3}  stack=[{stack}]",
                        op.mnemonic()
                    );
                }
            }
            Err(fault) => {
                return Err(CliError::Fault {
                    offset,
                    message: fault.to_string(),
                })
            }
        }
        steps += 1;
    }
    info!("finished in {steps} steps");

    if let Some(value) = machine.return_value() {
        println!("return: {value}");
    }
    let scopes = machine.into_scopes();
    if !scopes.locals.is_empty() {
        println!("locals:");
        for (name, value) in &scopes.locals {
            println!("  {name} = {value}");
        }
    }
    if !scopes.globals.is_empty() {
        println!("globals:");
        for (name, value) in &scopes.globals {
            println!("  {name} = {value}");
        }
    }
    Ok(())
}

// === Demo programs ===

/// a=1 b=2 c=3 d=0; e=a*b*c*d; f=a+b+c+d;
/// for i in range(10): break at 5, decrement-and-continue at 3, else d+=1;
/// k=[d]; g=e//f+d; k.append(g); return k
fn build_arith() -> Result<CodeObject<PyValue>, AsmError> {
    let mut asm = Asm::new();
    for (name, n) in [("a", 1), ("b", 2), ("c", 3), ("d", 0)] {
        asm.load_const(PyValue::Int(n))?;
        asm.store_name(name)?;
    }

    asm.load_name("a")?;
    asm.load_name("b")?;
    asm.op(Opcode::BinaryMultiply);
    asm.load_name("c")?;
    asm.op(Opcode::BinaryMultiply);
    asm.load_name("d")?;
    asm.op(Opcode::BinaryMultiply);
    asm.store_name("e")?;

    asm.load_name("a")?;
    asm.load_name("b")?;
    asm.op(Opcode::BinaryAdd);
    asm.load_name("c")?;
    asm.op(Opcode::BinaryAdd);
    asm.load_name("d")?;
    asm.op(Opcode::BinaryAdd);
    asm.store_name("f")?;

    let loop_top = asm.label();
    let cleanup = asm.label();
    let after = asm.label();
    let not_five = asm.label();
    let not_three = asm.label();

    asm.jump_rel(Opcode::SetupLoop, after);
    asm.load_name("range")?;
    asm.load_const(PyValue::Int(10))?;
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op(Opcode::GetIter);
    asm.bind(loop_top);
    asm.jump_rel(Opcode::ForIter, cleanup);
    asm.store_name("i")?;

    asm.load_name("i")?;
    asm.load_const(PyValue::Int(5))?;
    asm.compare_op(CompareKind::Eq);
    asm.jump_abs(Opcode::PopJumpIfFalse, not_five);
    asm.op(Opcode::BreakLoop);

    asm.bind(not_five);
    asm.load_name("i")?;
    asm.load_const(PyValue::Int(3))?;
    asm.compare_op(CompareKind::Eq);
    asm.jump_abs(Opcode::PopJumpIfFalse, not_three);
    asm.load_name("d")?;
    asm.load_const(PyValue::Int(1))?;
    asm.op(Opcode::InplaceSubtract);
    asm.store_name("d")?;
    asm.jump_abs(Opcode::ContinueLoop, loop_top);

    asm.bind(not_three);
    asm.load_name("d")?;
    asm.load_const(PyValue::Int(1))?;
    asm.op(Opcode::InplaceAdd);
    asm.store_name("d")?;
    asm.jump_abs(Opcode::JumpAbsolute, loop_top);

    asm.bind(cleanup);
    asm.op(Opcode::PopBlock);
    asm.bind(after);

    asm.load_name("d")?;
    asm.op_arg(Opcode::BuildList, 1);
    asm.store_name("k")?;

    asm.load_name("e")?;
    asm.load_name("f")?;
    asm.op(Opcode::BinaryFloorDivide);
    asm.load_name("d")?;
    asm.op(Opcode::BinaryAdd);
    asm.store_name("g")?;

    asm.load_name("k")?;
    asm.load_attr("append")?;
    asm.load_name("g")?;
    asm.op_arg(Opcode::CallFunction, 1);
    asm.op(Opcode::PopTop);

    asm.load_name("k")?;
    asm.op(Opcode::ReturnValue);
    asm.finish()
}

/// n=6 steps=0; while n != 1: halve or 3n+1, counting steps; return steps
fn build_collatz() -> Result<CodeObject<PyValue>, AsmError> {
    let mut asm = Asm::new();
    let loop_top = asm.label();
    let exit_loop = asm.label();
    let after = asm.label();
    let odd = asm.label();
    let advance = asm.label();

    asm.load_const(PyValue::Int(6))?;
    asm.store_name("n")?;
    asm.load_const(PyValue::Int(0))?;
    asm.store_name("steps")?;

    asm.jump_rel(Opcode::SetupLoop, after);
    asm.bind(loop_top);
    asm.load_name("n")?;
    asm.load_const(PyValue::Int(1))?;
    asm.compare_op(CompareKind::Ne);
    asm.jump_abs(Opcode::PopJumpIfFalse, exit_loop);

    asm.load_name("n")?;
    asm.load_const(PyValue::Int(2))?;
    asm.op(Opcode::BinaryModulo);
    asm.load_const(PyValue::Int(0))?;
    asm.compare_op(CompareKind::Eq);
    asm.jump_abs(Opcode::PopJumpIfFalse, odd);
    asm.load_name("n")?;
    asm.load_const(PyValue::Int(2))?;
    asm.op(Opcode::BinaryFloorDivide);
    asm.store_name("n")?;
    asm.jump_abs(Opcode::JumpAbsolute, advance);

    asm.bind(odd);
    asm.load_const(PyValue::Int(3))?;
    asm.load_name("n")?;
    asm.op(Opcode::BinaryMultiply);
    asm.load_const(PyValue::Int(1))?;
    asm.op(Opcode::BinaryAdd);
    asm.store_name("n")?;

    asm.bind(advance);
    asm.load_name("steps")?;
    asm.load_const(PyValue::Int(1))?;
    asm.op(Opcode::InplaceAdd);
    asm.store_name("steps")?;
    asm.jump_abs(Opcode::JumpAbsolute, loop_top);

    asm.bind(exit_loop);
    asm.op(Opcode::PopBlock);
    asm.bind(after);
    asm.load_name("steps")?;
    asm.op(Opcode::ReturnValue);
    asm.finish()
}

/// k=[1,2,3]; k[1]=9; m={'x': 1}; m['sum']=sum(k); rev=k[::-1];
/// return (m, rev)
fn build_containers() -> Result<CodeObject<PyValue>, AsmError> {
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1))?;
    asm.load_const(PyValue::Int(2))?;
    asm.load_const(PyValue::Int(3))?;
    asm.op_arg(Opcode::BuildList, 3);
    asm.store_name("k")?;

    asm.load_const(PyValue::Int(9))?;
    asm.load_name("k")?;
    asm.load_const(PyValue::Int(1))?;
    asm.op(Opcode::StoreSubscr);

    asm.load_const(PyValue::str("x"))?;
    asm.load_const(PyValue::Int(1))?;
    asm.op_arg(Opcode::BuildMap, 1);
    asm.store_name("m")?;

    asm.load_name("sum")?;
    asm.load_name("k")?;
    asm.op_arg(Opcode::CallFunction, 1);
    asm.load_name("m")?;
    asm.load_const(PyValue::str("sum"))?;
    asm.op(Opcode::StoreSubscr);

    asm.load_name("k")?;
    asm.load_const(PyValue::None)?;
    asm.load_const(PyValue::None)?;
    asm.load_const(PyValue::Int(-1))?;
    asm.op_arg(Opcode::BuildSlice, 3);
    asm.op(Opcode::BinarySubscr);
    asm.store_name("rev")?;

    asm.load_name("m")?;
    asm.load_name("rev")?;
    asm.op_arg(Opcode::BuildTuple, 2);
    asm.op(Opcode::ReturnValue);
    asm.finish()
}

/// a=1; b=0; return a / b (faults with a zero-division error)
fn build_faulty() -> Result<CodeObject<PyValue>, AsmError> {
    let mut asm = Asm::new();
    asm.load_const(PyValue::Int(1))?;
    asm.store_name("a")?;
    asm.load_const(PyValue::Int(0))?;
    asm.store_name("b")?;
    asm.load_name("a")?;
    asm.load_name("b")?;
    asm.op(Opcode::BinaryTrueDivide);
    asm.op(Opcode::ReturnValue);
    asm.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_demo_assembles() {
        for demo in DEMOS {
            (demo.build)().unwrap_or_else(|e| panic!("{} failed to assemble: {e}", demo.name));
        }
    }

    #[test]
    fn test_arith_demo_outcome() {
        let code = build_arith().unwrap();
        let mut machine = Machine::new(&code, PyHost, default_scopes());
        machine.run(Some(10_000)).unwrap();
        // d ends at 3, e//f is 0//6, so k is [3, 3].
        assert_eq!(
            machine.return_value(),
            Some(&PyValue::list(vec![PyValue::Int(3), PyValue::Int(3)]))
        );
    }

    #[test]
    fn test_collatz_demo_outcome() {
        let code = build_collatz().unwrap();
        let mut machine = Machine::new(&code, PyHost, default_scopes());
        machine.run(Some(10_000)).unwrap();
        // 6 -> 3 -> 10 -> 5 -> 16 -> 8 -> 4 -> 2 -> 1
        assert_eq!(machine.return_value(), Some(&PyValue::Int(8)));
    }

    #[test]
    fn test_containers_demo_outcome() {
        let code = build_containers().unwrap();
        let mut machine = Machine::new(&code, PyHost, default_scopes());
        machine.run(Some(10_000)).unwrap();
        let expected_rev =
            PyValue::list(vec![PyValue::Int(3), PyValue::Int(9), PyValue::Int(1)]);
        match machine.return_value() {
            Some(PyValue::Tuple(items)) => {
                assert_eq!(items[1], expected_rev);
            }
            other => panic!("unexpected return: {other:?}"),
        }
    }

    #[test]
    fn test_faulty_demo_faults() {
        let code = build_faulty().unwrap();
        let mut machine = Machine::new(&code, PyHost, default_scopes());
        assert!(machine.run(Some(100)).is_err());
    }
}
