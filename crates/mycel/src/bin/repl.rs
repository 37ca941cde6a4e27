use std::{
    io::{self, Write},
    process::ExitCode,
};

use mycel::{Interpreter, InterpreterConfig, RunOutcome, Value};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        let path = &args[1];
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading {path}: {e}");
                return ExitCode::FAILURE;
            }
        };
        let mut interp = Interpreter::new(InterpreterConfig::default());
        return execute_snippet(&mut interp, &source, path);
    }

    let mut interp = Interpreter::new(InterpreterConfig::default());
    let mut source = String::new();

    loop {
        let prompt = if source.is_empty() { ">>> " } else { "... " };
        let Some(line) = read_line(prompt) else {
            println!();
            break;
        };

        if source.is_empty() && line.trim().is_empty() {
            continue;
        }

        if !source.is_empty() {
            source.push('\n');
        }
        source.push_str(&line);

        if needs_more_input(&source) {
            continue;
        }

        execute_snippet(&mut interp, &source, "<stdin>");
        source.clear();
    }

    ExitCode::SUCCESS
}

/// Runs one source snippet against the session and prints its result, the
/// way a REPL line prints whatever its last expression produced. Returns a
/// failing exit code only for file-execution mode; interactive mode always
/// keeps going after an error (mirroring a real REPL, which doesn't exit
/// just because one line threw).
fn execute_snippet(interp: &mut Interpreter, source: &str, file_name: &str) -> ExitCode {
    match interp.run(source, file_name) {
        RunOutcome::Value(Value::Null) => ExitCode::SUCCESS,
        RunOutcome::Value(value) => {
            println!("{}", interp.display(&value));
            ExitCode::SUCCESS
        }
        RunOutcome::Error(err) => {
            eprintln!("{}", interp.report(&err));
            ExitCode::FAILURE
        }
    }
}

/// Heuristic multiline detector for interactive input: an unbalanced
/// bracket, a trailing backslash, or a trailing `:` (block header) means the
/// snippet isn't finished yet.
fn needs_more_input(source: &str) -> bool {
    let trimmed = source.trim_end();
    if trimmed.ends_with('\\') {
        return true;
    }

    let mut balance = 0i32;
    for ch in trimmed.chars() {
        match ch {
            '(' | '[' | '{' => balance += 1,
            ')' | ']' | '}' => balance -= 1,
            _ => {}
        }
    }
    if balance > 0 {
        return true;
    }

    trimmed.lines().rev().find(|line| !line.trim().is_empty()).is_some_and(|line| line.trim_end().ends_with(':'))
}

/// Reads one line from stdin after printing a prompt. Returns `None` on EOF
/// (Ctrl+D).
fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    if io::stdout().flush().is_err() {
        return None;
    }
    let mut input = String::new();
    let read = io::stdin().read_line(&mut input).ok()?;
    if read == 0 {
        return None;
    }
    Some(input.trim_end_matches(['\r', '\n']).to_owned())
}
