//! `import`/`use` resolution and circular-dependency detection (spec.md §6).
//!
//! Loading a module is a callback dance, same shape as [`crate::pattern_match`]:
//! this module owns the cache and the cycle check, but actually lexing,
//! parsing, and evaluating a loaded file's top-level is the evaluator's job,
//! so [`ModuleRegistry::load`] drives an injected [`ModuleEval`] rather than
//! depending on `evaluator` directly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{AstNode, Span};
use crate::errors::{ErrorCode, ErrorInfo};
use crate::heap::Heap;
use crate::value::{ModuleValue, Value};

/// Loads module source text given a resolved path. `mycel-cli` implements
/// this over `std::fs::read_to_string`; embedders with virtual filesystems
/// (or none at all — e.g. a sandboxed build with imports disabled) supply
/// their own.
pub trait SourceLoader {
    fn load_source(&self, path: &str) -> Result<String, ErrorInfo>;
}

/// A loader that always fails — the default for hosts that don't support
/// `import`.
pub struct NoImports;

impl SourceLoader for NoImports {
    fn load_source(&self, path: &str) -> Result<String, ErrorInfo> {
        Err(ErrorInfo::new(ErrorCode::IoFileNotFound, format!("imports are disabled; cannot load '{path}'"), Span::default()))
    }
}

/// Evaluates a freshly parsed module body, returning the bindings it
/// exports. Implemented by the evaluator.
pub trait ModuleEval {
    fn eval_module_body(&mut self, program: &[AstNode], heap: &mut Heap) -> Result<IndexMap<String, Value>, ErrorInfo>;
}

/// Tracks loaded modules (by resolved path) and the in-progress load stack,
/// so a cycle surfaces as `semantic/circular_dependency` (spec.md §6) rather
/// than unbounded recursion.
/// `loaded`/`loading` sit behind `RefCell` so `load` can take `&self`: a
/// module's top level can itself `import` another module, re-entering
/// `load` on this same registry before the outer call returns — the same
/// reentrancy [`crate::adaptive::AdaptiveExecutor`] handles the same way.
#[derive(Default)]
pub struct ModuleRegistry {
    loaded: RefCell<HashMap<String, Rc<ModuleValue>>>,
    loading: RefCell<Vec<String>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and evaluates the module at `path`, or returns the cached
    /// [`ModuleValue`] if it was already loaded this session.
    pub fn load(
        &self,
        path: &str,
        loader: &dyn SourceLoader,
        evaluator: &mut dyn ModuleEval,
        heap: &mut Heap,
    ) -> Result<Rc<ModuleValue>, ErrorInfo> {
        if let Some(existing) = self.loaded.borrow().get(path) {
            return Ok(existing.clone());
        }
        if self.loading.borrow().iter().any(|p| p == path) {
            return Err(ErrorInfo::new(
                ErrorCode::SemanticCircularDependency,
                format!("module '{path}' is already being loaded (import cycle)"),
                Span::default(),
            ));
        }

        self.loading.borrow_mut().push(path.to_owned());
        let result = self.load_inner(path, loader, evaluator, heap);
        self.loading.borrow_mut().pop();
        let module = result?;
        self.loaded.borrow_mut().insert(path.to_owned(), module.clone());
        Ok(module)
    }

    fn load_inner(
        &self,
        path: &str,
        loader: &dyn SourceLoader,
        evaluator: &mut dyn ModuleEval,
        heap: &mut Heap,
    ) -> Result<Rc<ModuleValue>, ErrorInfo> {
        let source = loader.load_source(path)?;
        let tokens = crate::lexer::Lexer::new(&source).tokenize();
        let program = crate::parser::Parser::new(tokens).parse_program();
        if let Some(err) = program.iter().find_map(|node| match node {
            AstNode::Error { message, span } => Some(ErrorInfo::new(ErrorCode::SyntaxInvalidExpression, message.clone(), *span)),
            _ => None,
        }) {
            return Err(err);
        }
        let exports = evaluator.eval_module_body(&program, heap)?;
        Ok(Rc::new(ModuleValue { name: path.to_owned(), exports: std::cell::RefCell::new(exports) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoLoader;
    impl SourceLoader for EchoLoader {
        fn load_source(&self, _path: &str) -> Result<String, ErrorInfo> {
            Ok(String::new())
        }
    }

    struct NoopEval;
    impl ModuleEval for NoopEval {
        fn eval_module_body(&mut self, _program: &[AstNode], _heap: &mut Heap) -> Result<IndexMap<String, Value>, ErrorInfo> {
            let mut exports = IndexMap::new();
            exports.insert("answer".to_owned(), Value::Number(42.0));
            Ok(exports)
        }
    }

    #[test]
    fn loads_and_caches_a_module() {
        let registry = ModuleRegistry::new();
        let mut heap = Heap::new();
        let a = registry.load("a.myc", &EchoLoader, &mut NoopEval, &mut heap).unwrap();
        let b = registry.load("a.myc", &EchoLoader, &mut NoopEval, &mut heap).unwrap();
        assert!(Rc::ptr_eq(&a, &b), "second load should hit the cache, not re-evaluate");
        assert_eq!(a.exports.borrow().get("answer"), Some(&Value::Number(42.0)));
    }

    #[test]
    fn in_progress_load_is_reported_as_a_cycle() {
        let registry = ModuleRegistry::new();
        let mut heap = Heap::new();
        registry.loading.borrow_mut().push("self.myc".to_owned());
        let result = registry.load("self.myc", &EchoLoader, &mut NoopEval, &mut heap);
        assert!(matches!(result, Err(e) if e.code == ErrorCode::SemanticCircularDependency));
    }
}
