//! Parser-level properties from spec.md §8: determinism of parsing, and
//! that `let`'s new always-mutable semantics didn't leak into `const`.

use mycel::ast::AstNode;
use mycel::lexer::Lexer;
use mycel::parser::Parser;
use mycel::errors::ErrorCode;
use mycel::{Interpreter, InterpreterConfig, RunOutcome};

fn parse(source: &str) -> Vec<AstNode> {
    let tokens = Lexer::new(source).tokenize();
    Parser::new(tokens).parse_program()
}

/// For every syntactically valid source, parsing it twice produces
/// identical trees — the parser holds no hidden mutable state that would
/// make re-parsing the same text diverge.
#[test]
fn parsing_the_same_source_twice_yields_identical_trees() {
    let sources = [
        "let x = 1 + 2 * 3;",
        "const pi = 3.14;",
        "function add(a, b) { return a + b; }",
        r#"try { throw "e"; } catch (err) { print(err); } finally { print("done"); }"#,
        "for i in 0..10 { print(i); }",
        r#"spore v { 0 => "zero", n if n > 0 => "pos", : { print("default"); } }"#,
        "let a = [1, 2, 3]; let m = a[0];",
        "{ let inner = 1; }",
    ];

    for source in sources {
        let first = parse(source);
        let second = parse(source);
        assert_eq!(first, second, "re-parsing diverged for: {source}");
    }
}

/// `const` stays immutable even though `let` was changed to always be
/// mutable — the two keywords are meant to stay semantically distinct.
#[test]
fn const_bindings_still_reject_reassignment() {
    let mut interp = Interpreter::new(InterpreterConfig::default());
    let RunOutcome::Error(err) = interp.run("const x = 1; x = 2;", "<test>") else {
        panic!("expected reassigning a const to error")
    };
    assert_eq!(err.code, ErrorCode::SemanticImmutableAssignment);
}

/// `let` bindings, by contrast, accept reassignment without needing `mut`.
#[test]
fn let_bindings_accept_reassignment_without_mut() {
    let mut interp = Interpreter::new(InterpreterConfig::default());
    assert!(!interp.run("let x = 1; x = 2;", "<test>").is_error());
}
