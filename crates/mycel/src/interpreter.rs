//! The persistent host-facing session (spec.md §6 "external interfaces"),
//! grounded in the teacher's `ReplSession`: a long-lived object that keeps
//! globals, heap, and hot-spot/bytecode state alive across successive
//! `run` calls, the way a REPL line shares state with the next one.
//!
//! Unlike the teacher's session, there is no yield/resume protocol here —
//! spec.md §5 specifies async as run-to-completion, so a call into
//! [`Interpreter::run`] never pauses partway through for host input.

use std::collections::HashMap;
use std::rc::Rc;

use crate::adaptive::AdaptiveExecutor;
use crate::capability::CapabilitySet;
use crate::config::InterpreterConfig;
use crate::env::Environment;
use crate::errors::{ErrorInfo, ErrorSystem};
use crate::evaluator::{Evaluator, MacroDef, TemplateDef};
use crate::heap::{Heap, HeapStats};
use crate::lexer::Lexer;
use crate::module_system::{ModuleRegistry, NoImports, SourceLoader};
use crate::native_fn::{BuiltinFunction, Library};
use crate::observer::{NoopObserver, VmObserver};
use crate::parser::Parser;
use crate::value::Value;

/// The outcome of one [`Interpreter::run`] call: either the value the
/// program's last statement produced, or the uncaught [`ErrorInfo`] that
/// unwound past the top level (spec.md §4.7 "uncaught errors propagate to
/// the host").
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Value(Value),
    Error(ErrorInfo),
}

impl RunOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A persistent Mycel execution session: one [`Environment`] (globals), one
/// [`Heap`], and the promotion/module/macro state that must survive across
/// several top-level `run` calls (a multi-line script evaluated file by
/// file, or a REPL line at a time).
pub struct Interpreter {
    config: InterpreterConfig,
    globals: Environment,
    heap: Heap,
    errors: ErrorSystem,
    adaptive: AdaptiveExecutor,
    observer: Box<dyn VmObserver>,
    modules: ModuleRegistry,
    loader: Box<dyn SourceLoader>,
    libraries: HashMap<String, Rc<Library>>,
    macros: HashMap<String, MacroDef>,
    templates: HashMap<String, TemplateDef>,
    capabilities: CapabilitySet,
}

impl Interpreter {
    /// Builds a session with no import support (`NoImports`) and a
    /// no-op observer; a host wires in its own loader/observer via
    /// [`Self::with_loader`]/[`Self::with_observer`] before running anything
    /// that needs them.
    pub fn new(config: InterpreterConfig) -> Self {
        let caps = if config.capability_sandbox_enabled { CapabilitySet::none() } else { CapabilitySet::unrestricted() };
        let globals = Environment::new_global();
        globals.define(
            "print",
            Value::BuiltinFunction(Rc::new(BuiltinFunction::new("print", None, |args, heap| {
                let rendered: Vec<String> = args.iter().map(|v| v.to_display_string(heap)).collect();
                println!("{}", rendered.join(" "));
                Ok(Value::Null)
            }))),
            false,
        );
        Self {
            adaptive: AdaptiveExecutor::new(&config),
            errors: ErrorSystem { stack_traces_enabled: config.stack_traces_enabled, color_output: config.color_output, ..ErrorSystem::new() },
            config,
            globals,
            heap: Heap::new(),
            observer: Box::new(NoopObserver),
            modules: ModuleRegistry::new(),
            loader: Box::new(NoImports),
            libraries: HashMap::new(),
            macros: HashMap::new(),
            templates: HashMap::new(),
            capabilities: caps,
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn SourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn VmObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn set_capabilities(&mut self, capabilities: CapabilitySet) {
        self.capabilities = capabilities;
    }

    /// Registers a native-function library under `library.name`, filtering
    /// out functions the current [`CapabilitySet`] doesn't grant when the
    /// sandbox is enabled. This is spec.md §6's "restriction enforced by
    /// omission" model: a denied function simply never becomes visible to
    /// `use`, rather than being checked on every call.
    pub fn register_library(&mut self, library: Library) {
        let name = library.name.clone();
        let filtered = if self.config.capability_sandbox_enabled {
            let mut allowed = Library::new(name.clone());
            for f in &library.functions {
                if self.capabilities.allows_function(&f.name) {
                    allowed.functions.push(f.clone());
                }
            }
            allowed
        } else {
            library
        };
        self.libraries.insert(name, Rc::new(filtered));
    }

    pub fn register_function(&mut self, library_name: &str, func: BuiltinFunction) {
        let entry = self.libraries.entry(library_name.to_owned()).or_insert_with(|| Rc::new(Library::new(library_name)));
        match Rc::get_mut(entry) {
            Some(lib) => {
                lib.register(func);
            }
            None => {
                let mut rebuilt = Library { name: entry.name.clone(), functions: entry.functions.clone() };
                rebuilt.register(func);
                *entry = Rc::new(rebuilt);
            }
        }
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.globals.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.globals.define(name, value, true);
    }

    /// Lexes, parses, and evaluates `source` against the session's
    /// persistent global scope. Globals, macros, templates, cached modules,
    /// and the hot-spot tracker all survive for the next call.
    pub fn run(&mut self, source: &str, file_name: &str) -> RunOutcome {
        self.adaptive.tick();
        let tokens = Lexer::new(source).tokenize();
        let program = Parser::new(tokens).parse_program();

        if let Some(err) = program.iter().find_map(|node| match node {
            crate::ast::AstNode::Error { message, span } => {
                Some(ErrorInfo::new(crate::errors::ErrorCode::SyntaxInvalidExpression, message.clone(), *span))
            }
            _ => None,
        }) {
            self.errors.throw(err.clone());
            return RunOutcome::Error(err);
        }

        let mut evaluator = Evaluator {
            errors: &mut self.errors,
            adaptive: &self.adaptive,
            observer: self.observer.as_mut(),
            modules: &self.modules,
            loader: self.loader.as_ref(),
            libraries: &self.libraries,
            macros: &mut self.macros,
            templates: &mut self.templates,
            globals: self.globals.clone(),
            max_call_depth: self.config.max_call_depth,
            call_depth: 0,
        };

        let mut result = evaluator.eval_program(&self.globals, &program, &mut self.heap);
        if let Err(e) = &mut result {
            if e.file_name.is_none() {
                e.file_name = Some(file_name.to_owned());
            }
        }

        match result {
            Ok(value) => RunOutcome::Value(value),
            Err(error) => {
                self.errors.throw(error.clone());
                RunOutcome::Error(error)
            }
        }
    }

    /// Renders an error the way the host's console reporter would
    /// (spec.md §4.7), honoring this session's stack-trace/color settings.
    pub fn report(&self, error: &ErrorInfo) -> String {
        self.errors.default_console_report(error)
    }

    /// Renders a value the way a REPL would print it, resolving heap
    /// containers against this session's own arena.
    pub fn display(&self, value: &Value) -> String {
        value.to_display_string(&self.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_simple_expression() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        match interp.run("1 + 2", "<test>") {
            RunOutcome::Value(Value::Number(n)) => assert_eq!(n, 3.0),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn globals_persist_across_run_calls() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        assert!(!interp.run("let x = 10;", "<test>").is_error());
        match interp.run("x + 5", "<test>") {
            RunOutcome::Value(Value::Number(n)) => assert_eq!(n, 15.0),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn capability_sandbox_hides_denied_functions() {
        let config = InterpreterConfig { capability_sandbox_enabled: true, ..InterpreterConfig::default() };
        let mut interp = Interpreter::new(config);
        interp.set_capabilities(CapabilitySet::new(vec![crate::capability::Capability::CallFunction("allowed".into())]));

        let mut lib = Library::new("demo");
        lib.register(BuiltinFunction::new("allowed", Some(0), |_, _| Ok(Value::Null)));
        lib.register(BuiltinFunction::new("denied", Some(0), |_, _| Ok(Value::Null)));
        interp.register_library(lib);

        assert!(!interp.run("use demo; demo.allowed();", "<test>").is_error());
        assert!(interp.run("use demo; demo.denied();", "<test>").is_error());
    }

    #[test]
    fn uncaught_error_reports_with_file_name() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        let RunOutcome::Error(err) = interp.run("1 / 0", "script.myc") else { panic!("expected division by zero to error") };
        assert_eq!(err.file_name.as_deref(), Some("script.myc"));
    }
}
