//! Environment-scoping and exception-law properties from spec.md §8.

use mycel::errors::ErrorCode;
use mycel::{Interpreter, InterpreterConfig, RunOutcome};
use pretty_assertions::assert_eq;

#[test]
fn define_in_child_scope_does_not_mutate_parent() {
    let mut interp = Interpreter::new(InterpreterConfig::default());
    let RunOutcome::Value(_) = interp.run(
        r"
        let x = 1;
        {
            let x = 2;
        }
        ",
        "<test>",
    ) else {
        panic!("expected the block to evaluate cleanly")
    };
    assert_eq!(interp.get_variable("x"), Some(mycel::value::Value::Number(1.0)));
}

#[test]
fn assigning_to_an_undeclared_name_raises_undefined_variable() {
    let mut interp = Interpreter::new(InterpreterConfig::default());
    let RunOutcome::Error(err) = interp.run("never_declared = 5;", "<test>") else {
        panic!("expected assignment to an undeclared name to error")
    };
    assert_eq!(err.code, ErrorCode::SemanticUndefinedVariable);
}

#[test]
fn finally_runs_exactly_once_on_a_return_path() {
    let mut interp = Interpreter::new(InterpreterConfig::default());
    let calls = std::rc::Rc::new(std::cell::RefCell::new(0));
    let sink = calls.clone();
    interp.set_variable(
        "mark",
        mycel::value::Value::BuiltinFunction(std::rc::Rc::new(mycel::native_fn::BuiltinFunction::new(
            "mark",
            Some(0),
            move |_args, _heap| {
                *sink.borrow_mut() += 1;
                Ok(mycel::value::Value::Null)
            },
        ))),
    );
    let RunOutcome::Value(_) = interp.run(
        r"
        let f = function() {
            try {
                return 1;
            } finally {
                mark();
            }
        };
        f();
        ",
        "<test>",
    ) else {
        panic!("expected the function call to complete")
    };
    assert_eq!(*calls.borrow(), 1);
}
