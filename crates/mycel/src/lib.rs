//! The Mycel language runtime: lexer, parser, AST, value model, tree-walking
//! evaluator, pattern matcher, structured error system, and the adaptive
//! execution pipeline (hot-spot tracker, register bytecode engine, trace
//! recorder, micro-JIT, adaptive executor) that promotes hot code between
//! tiers without changing program semantics.
//!
//! This crate is the language core only. Standard-library modules (math,
//! strings, file I/O, graphics, ...), the CLI, and the REPL's line editing
//! are host concerns — see [`native_fn`] and [`capability`] for the ABI a
//! host uses to plug those in.
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![expect(clippy::too_many_arguments, reason = "opcode dispatch and compiler entry points stay explicit")]
#![expect(clippy::large_enum_variant, reason = "Value/ASTNode favor matchability over minimal size")]

pub mod adaptive;
pub mod ast;
pub mod bytecode;
pub mod capability;
pub mod config;
pub mod env;
pub mod errors;
pub mod evaluator;
pub mod heap;
pub mod hotspot;
mod interpreter;
pub mod jit;
pub mod lexer;
pub mod module_system;
pub mod native_fn;
pub mod observer;
pub mod parser;
pub mod pattern_match;
pub mod token;
pub mod trace;
pub mod value;

pub use crate::{
    ast::AstNode,
    config::InterpreterConfig,
    env::Environment,
    errors::{
        CallFrame, ErrorCategory, ErrorCode, ErrorInfo, ErrorSeverity, ErrorSystem, ExceptionContext,
    },
    interpreter::{Interpreter, RunOutcome},
    lexer::Lexer,
    native_fn::{BuiltinFunction, Library, NativeResult},
    parser::Parser,
    token::{Token, TokenKind},
    value::Value,
};
