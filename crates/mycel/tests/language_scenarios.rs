//! End-to-end scenarios against the public [`mycel::Interpreter`] API.
//! `print` is overridden per test to capture its arguments into a buffer
//! instead of writing to stdout, so assertions can check exactly what a
//! program printed without spawning a subprocess.

use std::cell::RefCell;
use std::rc::Rc;

use mycel::errors::ErrorCode;
use mycel::native_fn::BuiltinFunction;
use mycel::value::Value;
use mycel::{Interpreter, InterpreterConfig, RunOutcome};
use pretty_assertions::assert_eq;

fn capturing_interpreter(config: InterpreterConfig) -> (Interpreter, Rc<RefCell<Vec<String>>>) {
    let mut interp = Interpreter::new(config);
    let captured = Rc::new(RefCell::new(Vec::new()));
    let sink = captured.clone();
    interp.set_variable(
        "print",
        Value::BuiltinFunction(Rc::new(BuiltinFunction::new("print", None, move |args, heap| {
            let rendered: Vec<String> = args.iter().map(|v| v.to_display_string(heap)).collect();
            sink.borrow_mut().push(rendered.join(" "));
            Ok(Value::Null)
        }))),
    );
    (interp, captured)
}

fn run_ok(interp: &mut Interpreter, source: &str) {
    match interp.run(source, "<test>") {
        RunOutcome::Value(_) => {}
        RunOutcome::Error(err) => panic!("program raised an uncaught error: {}", err.message),
    }
}

#[test]
fn arithmetic_and_precedence() {
    let (mut interp, out) = capturing_interpreter(InterpreterConfig::default());
    run_ok(&mut interp, "print(1 + 2 * 3);");
    assert_eq!(*out.borrow(), vec!["7".to_owned()]);
}

#[test]
fn closures_and_assignment() {
    let (mut interp, out) = capturing_interpreter(InterpreterConfig::default());
    run_ok(
        &mut interp,
        r"
        let make = function(x) { return function(y) { return x + y; }; };
        let add5 = make(5);
        print(add5(3));
        print(add5(10));
        ",
    );
    assert_eq!(*out.borrow(), vec!["8".to_owned(), "15".to_owned()]);
}

#[test]
fn exception_round_trip() {
    let (mut interp, out) = capturing_interpreter(InterpreterConfig::default());
    run_ok(&mut interp, r#"try { throw "boom"; } catch (e) { print(e); } finally { print("done"); }"#);
    assert_eq!(*out.borrow(), vec!["boom".to_owned(), "done".to_owned()]);
}

#[test]
fn try_without_throw_behaves_like_the_try_block_alone() {
    let (mut interp, out) = capturing_interpreter(InterpreterConfig::default());
    run_ok(&mut interp, r#"try { print("x"); } catch (e) { print("never"); } finally { print("always"); }"#);
    assert_eq!(*out.borrow(), vec!["x".to_owned(), "always".to_owned()]);
}

#[test]
fn pattern_matching_with_spore() {
    let (mut interp, out) = capturing_interpreter(InterpreterConfig::default());
    run_ok(
        &mut interp,
        r#"
        let classify = function(v) {
          spore v {
            0 => "zero",
            n if n > 0 => "pos",
            _ => "neg"
          }
        };
        print(classify(0)); print(classify(7)); print(classify(-3));
        "#,
    );
    assert_eq!(*out.borrow(), vec!["zero".to_owned(), "pos".to_owned(), "neg".to_owned()]);
}

#[test]
fn spore_with_no_match_and_no_root_case_raises_invalid_state() {
    let (mut interp, _out) = capturing_interpreter(InterpreterConfig::default());
    let RunOutcome::Error(err) = interp.run("spore 5 { 1 => \"one\" }", "<test>") else {
        panic!("expected an unmatched spore to raise an error")
    };
    assert_eq!(err.code, ErrorCode::RuntimeInvalidState);
}

/// Hot-spot promotion is keyed by function call site (DESIGN.md/SPEC_FULL.md
/// §G.4 narrows spec.md §4.8 to call sites, not bare loops), so this drives
/// the loop body through a function call on every iteration — with
/// `warm_threshold: 1` that call site is promoted to bytecode by the second
/// iteration and stays there for the rest of the 1000, while the
/// `u32::MAX` run never promotes at all. Both must agree on the result.
#[test]
fn tier_equivalence_loop_matches_regardless_of_promotion() {
    for warm_threshold in [1, u32::MAX] {
        let config = InterpreterConfig { warm_threshold, hot_threshold: 2, ..InterpreterConfig::default() };
        let (mut interp, out) = capturing_interpreter(config);
        run_ok(
            &mut interp,
            r"
            let add = function(a, b) { return a + b; };
            let s = 0;
            for i in 0..1000 { s = add(s, i); }
            print(s);
            ",
        );
        assert_eq!(*out.borrow(), vec!["499500".to_owned()], "warm_threshold={warm_threshold}");
    }
}

#[test]
fn undefined_variable_reports_semantic_error_in_2000_range() {
    let (mut interp, _out) = capturing_interpreter(InterpreterConfig::default());
    let RunOutcome::Error(err) = interp.run("print(x);", "<test>") else { panic!("expected undefined variable to error") };
    assert_eq!(err.code, ErrorCode::SemanticUndefinedVariable);
    assert!(err.message.contains("undefined variable"));
    assert!((err.code as u32) >= 2000 && (err.code as u32) < 3000);
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let (mut interp, _out) = capturing_interpreter(InterpreterConfig::default());
    let RunOutcome::Error(err) = interp.run("print(1 / 0);", "<test>") else { panic!("expected division by zero to error") };
    assert_eq!(err.code, ErrorCode::RuntimeDivisionByZero);
}

#[test]
fn array_index_out_of_range_is_a_runtime_error() {
    let (mut interp, _out) = capturing_interpreter(InterpreterConfig::default());
    let RunOutcome::Error(err) = interp.run("let a = [1, 2, 3]; print(a[10]);", "<test>") else {
        panic!("expected out-of-range index to error")
    };
    assert_eq!(err.code, ErrorCode::RuntimeIndexOutOfBounds);
}

#[test]
fn empty_collection_iteration_runs_zero_times() {
    let (mut interp, out) = capturing_interpreter(InterpreterConfig::default());
    run_ok(&mut interp, "let a = []; for x in a { print(x); } print(\"done\");");
    assert_eq!(*out.borrow(), vec!["done".to_owned()]);
}

#[test]
fn recursion_past_the_configured_limit_overflows() {
    let config = InterpreterConfig { max_call_depth: 8, ..InterpreterConfig::default() };
    let (mut interp, _out) = capturing_interpreter(config);
    let RunOutcome::Error(err) = interp.run(
        r"
        let recurse = function(n) { return recurse(n + 1); };
        recurse(0);
        ",
        "<test>",
    ) else {
        panic!("expected unbounded recursion to overflow the stack")
    };
    assert_eq!(err.code, ErrorCode::RuntimeStackOverflow);
}

#[test]
fn globals_persist_across_successive_run_calls() {
    let (mut interp, out) = capturing_interpreter(InterpreterConfig::default());
    run_ok(&mut interp, "let counter = 0;");
    run_ok(&mut interp, "counter = counter + 1; print(counter);");
    run_ok(&mut interp, "counter = counter + 1; print(counter);");
    assert_eq!(*out.borrow(), vec!["1".to_owned(), "2".to_owned()]);
}

#[test]
fn evaluator_determinism_same_source_same_output() {
    let (mut a, out_a) = capturing_interpreter(InterpreterConfig::default());
    let (mut b, out_b) = capturing_interpreter(InterpreterConfig::default());
    let source = "let f = function(n) { spore n { 0 => 1, n if n > 0 => n * 2, _ => -1 } }; print(f(5));";
    run_ok(&mut a, source);
    run_ok(&mut b, source);
    assert_eq!(*out_a.borrow(), *out_b.borrow());
}
