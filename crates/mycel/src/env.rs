//! Lexically scoped name→value bindings (spec.md §3/§4.4 "Environment").
//!
//! An `Environment` is a cheap handle (`Rc<RefCell<Scope>>`) around a scope
//! and an optional parent pointer. Closures capture the defining environment
//! by cloning the handle, which is what keeps it alive for as long as the
//! closure value is reachable (spec.md §4.4: "the evaluator extends lifetime
//! through the closure value").

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::value::Value;

struct Scope {
    bindings: HashMap<String, Binding>,
    parent: Option<Environment>,
}

struct Binding {
    value: Value,
    mutable: bool,
}

/// A lexical scope handle. Cloning an `Environment` clones the `Rc`, not the
/// scope — both handles see the same bindings.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Scope>>);

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}

/// Why an `assign` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    /// No binding with that name exists anywhere in the parent chain
    /// (spec.md §8 "an `assign` to an undeclared name raises
    /// `semantic/undefined_variable`").
    Undefined,
    /// The binding exists but was declared `let` (immutable); spec.md §3:
    /// "attempts to reassign report a semantic error".
    Immutable,
}

impl Environment {
    /// Creates a fresh global environment with no parent.
    pub fn new_global() -> Self {
        Self(Rc::new(RefCell::new(Scope { bindings: HashMap::new(), parent: None })))
    }

    /// Creates a child scope — used on function entry and block entry
    /// (spec.md §3 "Environment ... Lifetime: tied to the call frame or
    /// block that created them").
    pub fn new_child(&self) -> Self {
        Self(Rc::new(RefCell::new(Scope { bindings: HashMap::new(), parent: Some(self.clone()) })))
    }

    /// Binds `name` in the *current* scope. Re-`define`ing a name already
    /// bound in this same scope replaces it (spec.md §4.4); this is distinct
    /// from shadowing via a child scope, which is always allowed.
    pub fn define(&self, name: impl Into<String>, value: Value, mutable: bool) {
        self.0.borrow_mut().bindings.insert(name.into(), Binding { value, mutable });
    }

    /// Looks up `name`, walking the parent chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        if let Some(binding) = scope.bindings.get(name) {
            return Some(binding.value.clone());
        }
        scope.parent.as_ref()?.get(name)
    }

    /// Reassigns an existing binding, searching upward from the current
    /// scope. Fails if the name was never declared, or if it was declared
    /// immutable.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut scope = self.0.borrow_mut();
        if let Some(binding) = scope.bindings.get_mut(name) {
            if !binding.mutable {
                return Err(AssignError::Immutable);
            }
            binding.value = value;
            return Ok(());
        }
        let parent = scope.parent.clone();
        drop(scope);
        match parent {
            Some(p) => p.assign(name, value),
            None => Err(AssignError::Undefined),
        }
    }

    /// True if `name` is bound in this scope specifically (not a parent).
    pub fn is_locally_defined(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// Name/value/mutability triples bound directly in this scope (not the
    /// parent chain). Used to splice one pattern-match branch's bindings
    /// into the enclosing scope once that branch is known to have matched.
    pub fn local_bindings(&self) -> Vec<(String, Value, bool)> {
        self.0.borrow().bindings.iter().map(|(name, binding)| (name.clone(), binding.value.clone(), binding.mutable)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_define_does_not_mutate_parent() {
        let parent = Environment::new_global();
        parent.define("x", Value::Number(1.0), true);
        let child = parent.new_child();
        child.define("x", Value::Number(2.0), true);
        assert_eq!(parent.get("x"), Some(Value::Number(1.0)));
        assert_eq!(child.get("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn assign_to_undeclared_name_fails() {
        let env = Environment::new_global();
        assert_eq!(env.assign("missing", Value::Null), Err(AssignError::Undefined));
    }

    #[test]
    fn assign_through_parent_chain_succeeds() {
        let parent = Environment::new_global();
        parent.define("x", Value::Number(1.0), true);
        let child = parent.new_child();
        child.assign("x", Value::Number(5.0)).unwrap();
        assert_eq!(parent.get("x"), Some(Value::Number(5.0)));
    }

    #[test]
    fn immutable_binding_rejects_reassignment() {
        let env = Environment::new_global();
        env.define("x", Value::Number(1.0), false);
        assert_eq!(env.assign("x", Value::Number(2.0)), Err(AssignError::Immutable));
    }
}
