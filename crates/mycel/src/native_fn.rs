//! The native-function ABI: how a host plugs standard-library functions
//! (math, string, array, I/O, ...) into the interpreter (spec.md §6).
//!
//! A native function is a thin, capability-checked bridge between Mycel
//! values and host (Rust) code — the [`Interpreter`](crate::Interpreter)
//! checks [`crate::capability::CapabilitySet`] before invoking one.

use std::fmt;
use std::rc::Rc;

use crate::errors::ErrorInfo;
use crate::heap::Heap;
use crate::value::Value;

pub type NativeResult = Result<Value, ErrorInfo>;
pub type NativeImpl = dyn Fn(&[Value], &mut Heap) -> NativeResult;

/// A callable implemented in host code and exposed to Mycel programs as a
/// [`Value::BuiltinFunction`].
pub struct BuiltinFunction {
    pub name: String,
    pub arity: Option<usize>,
    func: Rc<NativeImpl>,
}

impl BuiltinFunction {
    pub fn new(name: impl Into<String>, arity: Option<usize>, func: impl Fn(&[Value], &mut Heap) -> NativeResult + 'static) -> Self {
        Self { name: name.into(), arity, func: Rc::new(func) }
    }

    pub fn call(&self, args: &[Value], heap: &mut Heap) -> NativeResult {
        (self.func)(args, heap)
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunction").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

/// A named collection of native functions, registered into the global
/// environment under a single namespace — e.g. `use math;` brings `math.sqrt`
/// into scope. Mirrors the shape of the host libraries demonstrated in
/// `mycel-cli` (math/string/array/json).
#[derive(Default)]
pub struct Library {
    pub name: String,
    pub functions: Vec<Rc<BuiltinFunction>>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), functions: Vec::new() }
    }

    pub fn register(&mut self, func: BuiltinFunction) -> &mut Self {
        self.functions.push(Rc::new(func));
        self
    }

    pub fn get(&self, name: &str) -> Option<Rc<BuiltinFunction>> {
        self.functions.iter().find(|f| f.name == name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_function_invokes_closure() {
        let f = BuiltinFunction::new("double", Some(1), |args, _heap| match args {
            [Value::Number(n)] => Ok(Value::Number(n * 2.0)),
            _ => unreachable!(),
        });
        let mut heap = Heap::new();
        let result = f.call(&[Value::Number(21.0)], &mut heap).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn library_lookup_by_name() {
        let mut lib = Library::new("math");
        lib.register(BuiltinFunction::new("abs", Some(1), |args, _| match args {
            [Value::Number(n)] => Ok(Value::Number(n.abs())),
            _ => unreachable!(),
        }));
        assert!(lib.get("abs").is_some());
        assert!(lib.get("missing").is_none());
    }
}
