//! Thin host binary: parses CLI flags, wires up the demo standard-library
//! libraries, and hands a source file to [`mycel::Interpreter`].

mod libraries;

use std::{fs, process::ExitCode, time::Instant};

use clap::Parser as ClapParser;
use mycel::{
    config::TierPolicy, Interpreter, InterpreterConfig, RunOutcome,
};

/// Run a Mycel program.
#[derive(ClapParser, Debug)]
#[command(name = "mycel", version, about)]
struct Cli {
    /// Path to the `.myc` source file to run.
    source: String,

    /// Disable the micro-JIT; stop promotion at the bytecode tier.
    #[arg(long)]
    no_jit: bool,

    /// Disable bytecode compilation; tree-walk every call site.
    #[arg(long)]
    no_bytecode: bool,

    /// Log every VM instruction, call, promotion, and deopt to stderr.
    #[arg(long)]
    trace: bool,

    /// Print elapsed wall-clock time after the program finishes.
    #[arg(long)]
    time: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error reading {}: {err}", cli.source);
            return ExitCode::FAILURE;
        }
    };

    let tier_policy = if cli.no_bytecode {
        TierPolicy::TreeWalkOnly
    } else if cli.no_jit {
        TierPolicy::BytecodeOnly
    } else {
        TierPolicy::Adaptive
    };
    let config = InterpreterConfig { tier_policy, color_output: true, ..InterpreterConfig::default() };

    let mut interp = Interpreter::new(config);
    if cli.trace {
        interp = interp.with_observer(Box::new(mycel::observer::StderrObserver::default()));
    }
    for library in libraries::demo_libraries() {
        interp.register_library(library);
    }

    let start = Instant::now();
    let outcome = interp.run(&source, &cli.source);
    let elapsed = start.elapsed();

    match outcome {
        RunOutcome::Value(value) => {
            if cli.time {
                eprintln!("ran in {elapsed:?}");
            }
            let rendered = interp.display(&value);
            if rendered != "null" {
                println!("{rendered}");
            }
            ExitCode::SUCCESS
        }
        RunOutcome::Error(err) => {
            eprintln!("{}", interp.report(&err));
            ExitCode::FAILURE
        }
    }
}
