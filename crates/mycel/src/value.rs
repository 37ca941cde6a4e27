//! The runtime value model (spec.md §3 "Value").
//!
//! `Value` is a small tagged sum: immediate scalars are stored inline,
//! mutable aggregates are stored in the interpreter's [`crate::heap::Heap`]
//! arena and referenced by [`HeapId`]. This hybrid mirrors the teacher's
//! "small immediates inline, everything else in the arena" design, adapted
//! to this language's variant set instead of CPython's.

use std::{
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

use crate::{
    ast::AstNode,
    env::Environment,
    errors::ErrorInfo,
    heap::{Heap, HeapData, HeapId, IndexedPairs, ObjectData},
    native_fn::BuiltinFunction,
};

/// A lazily-evaluated numeric range (`a..b`, `a..=b`, `a..b by step`).
/// Stored inline rather than on the heap — it's three `f64`s and a bool, no
/// bigger than the `Rc` variants it sits next to in the enum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeValue {
    pub start: f64,
    pub end: f64,
    pub step: f64,
    pub inclusive: bool,
}

impl RangeValue {
    pub fn iter(self) -> impl Iterator<Item = f64> {
        let mut cur = self.start;
        let step = self.step;
        let end = self.end;
        let inclusive = self.inclusive;
        std::iter::from_fn(move || {
            let in_range = if step >= 0.0 {
                if inclusive { cur <= end } else { cur < end }
            } else if inclusive {
                cur >= end
            } else {
                cur > end
            };
            if !in_range || step == 0.0 {
                return None;
            }
            let v = cur;
            cur += step;
            Some(v)
        })
    }
}

/// A user-defined function's closed-over state: parameter names, body, and
/// the environment it captured at definition time. Closures extend that
/// environment's lifetime by holding an `Rc` to it (spec.md §4.4).
#[derive(Debug)]
pub struct FunctionDescriptor {
    pub name: Option<String>,
    pub parameters: Vec<crate::ast::Parameter>,
    pub body: Rc<AstNode>,
    pub closure: Environment,
    pub is_async: bool,
    /// Populated by the adaptive executor once this call site has been
    /// promoted past the tree-walking tier (spec.md §4.9, §4.12). `None`
    /// means "still interpreted" or "compilation was rejected" — either way
    /// the evaluator tier remains correct, just slower.
    pub compiled: std::cell::RefCell<Option<Rc<crate::bytecode::code::BytecodeFunction>>>,
}

/// A module produced by `import` (spec.md §6): a named table of top-level
/// bindings evaluated once in their own environment.
#[derive(Debug)]
pub struct ModuleValue {
    pub name: String,
    pub exports: std::cell::RefCell<indexmap::IndexMap<String, Value>>,
}

/// Primary runtime value. `Clone` is cheap and explicit about what it does:
/// scalars copy, `Function`/`Module`/`BuiltinFunction`/`Error` bump an `Rc`,
/// and container values copy only the `HeapId` (shallow clone — the same
/// underlying array/map/set/object). Use [`Value::deep_clone`] when the
/// language semantics calls for copying the container's contents.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(HeapId),
    HashMap(HeapId),
    Set(HeapId),
    Object(HeapId),
    Range(RangeValue),
    Function(Rc<FunctionDescriptor>),
    BuiltinFunction(Rc<BuiltinFunction>),
    Module(Rc<ModuleValue>),
    Error(Box<ErrorInfo>),
}

impl PartialEq for Value {
    /// Delegates to [`Value::structural_eq`] — identity for containers and
    /// functions, structural for scalars. Mainly useful in tests; evaluator
    /// code should call `structural_eq` directly so the rule it's applying
    /// is visible at the call site.
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

impl Value {
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Number(_) => "Number",
            Self::Str(_) => "String",
            Self::Range(_) => "Range",
            Self::Function(_) => "Function",
            Self::BuiltinFunction(_) => "BuiltinFunction",
            Self::Module(_) => "Module",
            Self::Error(_) => "Error",
            Self::Array(id) | Self::HashMap(id) | Self::Set(id) | Self::Object(id) => {
                heap.get(*id).map_or("Invalid", HeapData::type_name)
            }
        }
    }

    /// Truthiness per spec.md §4.3: `false`, `null`, `0`, `""`, and empty
    /// containers are falsy; everything else is truthy.
    pub fn is_truthy(&self, heap: &Heap) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Range(r) => r.start != r.end,
            Self::Error(_) => true,
            Self::Function(_) | Self::BuiltinFunction(_) | Self::Module(_) => true,
            Self::Array(id) => match heap.get(*id) {
                Some(HeapData::Array(v)) => !v.is_empty(),
                _ => false,
            },
            Self::HashMap(id) | Self::Set(id) => match heap.get(*id) {
                Some(HeapData::HashMap(p) | HeapData::Set(p)) => !p.is_empty(),
                _ => false,
            },
            Self::Object(_) => true,
        }
    }

    /// Structural equality used for scalars and for map/set key comparison;
    /// containers and functions compare by identity (spec.md §9 open
    /// question, decided: identity for `Object`/`Array`/`Set`/`HashMap`,
    /// structural for `String`/`Number`/`Bool`/`Null`).
    pub fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Array(a), Self::Array(b))
            | (Self::HashMap(a), Self::HashMap(b))
            | (Self::Set(a), Self::Set(b))
            | (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::BuiltinFunction(a), Self::BuiltinFunction(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn structural_hash(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        match self {
            Self::Null => 0u8.hash(&mut hasher),
            Self::Bool(b) => {
                1u8.hash(&mut hasher);
                b.hash(&mut hasher);
            }
            Self::Number(n) => {
                2u8.hash(&mut hasher);
                n.to_bits().hash(&mut hasher);
            }
            Self::Str(s) => {
                3u8.hash(&mut hasher);
                s.hash(&mut hasher);
            }
            Self::Range(r) => {
                4u8.hash(&mut hasher);
                r.start.to_bits().hash(&mut hasher);
                r.end.to_bits().hash(&mut hasher);
                r.step.to_bits().hash(&mut hasher);
            }
            Self::Array(id) | Self::HashMap(id) | Self::Set(id) | Self::Object(id) => {
                5u8.hash(&mut hasher);
                id.hash(&mut hasher);
            }
            Self::Function(rc) => (Rc::as_ptr(rc) as *const () as usize).hash(&mut hasher),
            Self::BuiltinFunction(rc) => (Rc::as_ptr(rc) as *const () as usize).hash(&mut hasher),
            Self::Module(rc) => (Rc::as_ptr(rc) as *const () as usize).hash(&mut hasher),
            Self::Error(_) => 9u8.hash(&mut hasher),
        }
        hasher.finish()
    }

    /// Deep clone: containers are recursively duplicated into fresh heap
    /// slots; scalars and `Rc`-backed values (functions, modules) are
    /// shallow (spec.md §4.3 `value_clone`).
    pub fn deep_clone(&self, heap: &mut Heap) -> Self {
        match self {
            Self::Array(id) => {
                let Some(HeapData::Array(items)) = heap.get(*id) else { return Self::Null };
                let items = items.clone();
                let cloned: Vec<Value> = items.iter().map(|v| v.deep_clone(heap)).collect();
                Self::Array(heap.alloc(HeapData::Array(cloned)))
            }
            Self::HashMap(id) => {
                let Some(HeapData::HashMap(pairs)) = heap.get(*id) else { return Self::Null };
                let pairs = pairs.pairs.clone();
                let mut fresh = IndexedPairs::new();
                for (k, v) in pairs {
                    fresh.insert(k.deep_clone(heap), v.deep_clone(heap));
                }
                Self::HashMap(heap.alloc(HeapData::HashMap(fresh)))
            }
            Self::Set(id) => {
                let Some(HeapData::Set(pairs)) = heap.get(*id) else { return Self::Null };
                let pairs = pairs.pairs.clone();
                let mut fresh = IndexedPairs::new();
                for (k, v) in pairs {
                    fresh.insert(k.deep_clone(heap), v.deep_clone(heap));
                }
                Self::Set(heap.alloc(HeapData::Set(fresh)))
            }
            Self::Object(id) => {
                let Some(HeapData::Object(obj)) = heap.get(*id) else { return Self::Null };
                let props = obj.properties.clone();
                let cloned: Vec<(String, Value)> = props.into_iter().map(|(k, v)| (k, v.deep_clone(heap))).collect();
                Self::Object(heap.alloc(HeapData::Object(ObjectData { properties: cloned })))
            }
            other => other.clone(),
        }
    }

    pub fn to_display_string(&self, heap: &Heap) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Str(s) => s.to_string(),
            Self::Range(r) => format!("{}..{}{}", r.start, if r.inclusive { "=" } else { "" }, r.end),
            Self::Function(f) => format!("<function {}>", f.name.as_deref().unwrap_or("anonymous")),
            Self::BuiltinFunction(f) => format!("<builtin {}>", f.name),
            Self::Module(m) => format!("<module {}>", m.name),
            // A value thrown with `throw <value>;` is wrapped into an
            // `ErrorInfo{code: UserDefined, message, ..}` by `throw_value`
            // (evaluator.rs) so it can travel the same unwind path as a
            // native error. `print(e)` in a `catch` should still show the
            // thrown payload itself, not a synthesized "Error: " line.
            Self::Error(e) if e.code == crate::errors::ErrorCode::UserDefined => e.message.clone(),
            Self::Error(e) => format!("Error: {}", e.message),
            Self::Array(id) => match heap.get(*id) {
                Some(HeapData::Array(items)) => {
                    let parts: Vec<String> = items.iter().map(|v| v.to_repr_string(heap)).collect();
                    format!("[{}]", parts.join(", "))
                }
                _ => "[]".to_owned(),
            },
            Self::HashMap(id) => match heap.get(*id) {
                Some(HeapData::HashMap(pairs)) => {
                    let parts: Vec<String> = pairs
                        .pairs
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k.to_repr_string(heap), v.to_repr_string(heap)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                _ => "{}".to_owned(),
            },
            Self::Set(id) => match heap.get(*id) {
                Some(HeapData::Set(pairs)) => {
                    let parts: Vec<String> = pairs.pairs.iter().map(|(k, _)| k.to_repr_string(heap)).collect();
                    format!("{{{}}}", parts.join(", "))
                }
                _ => "{}".to_owned(),
            },
            Self::Object(id) => match heap.get(*id) {
                Some(HeapData::Object(obj)) => {
                    let parts: Vec<String> =
                        obj.visible_properties().map(|(k, v)| format!("{k}: {}", v.to_repr_string(heap))).collect();
                    format!("{{{}}}", parts.join(", "))
                }
                _ => "{}".to_owned(),
            },
        }
    }

    fn to_repr_string(&self, heap: &Heap) -> String {
        if let Self::Str(s) = self { format!("\"{s}\"") } else { self.to_display_string(heap) }
    }
}

/// Formats a number the way the language's `print` does: integral doubles
/// print without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}{}", self.start, if self.inclusive { "=" } else { "" }, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_equality_is_structural() {
        assert!(Value::Number(1.0).structural_eq(&Value::Number(1.0)));
        assert!(Value::Str(Rc::from("a")).structural_eq(&Value::Str(Rc::from("a"))));
        assert!(!Value::Number(1.0).structural_eq(&Value::Number(2.0)));
    }

    #[test]
    fn container_equality_is_identity() {
        let mut heap = Heap::new();
        let a = Value::Array(heap.alloc(HeapData::Array(vec![Value::Number(1.0)])));
        let b = Value::Array(heap.alloc(HeapData::Array(vec![Value::Number(1.0)])));
        assert!(!a.structural_eq(&b), "distinct allocations with equal contents are not ==");
        assert!(a.structural_eq(&a.clone()));
    }

    #[test]
    fn truthiness_rules() {
        let heap = Heap::new();
        assert!(!Value::Null.is_truthy(&heap));
        assert!(!Value::Number(0.0).is_truthy(&heap));
        assert!(!Value::Str(Rc::from("")).is_truthy(&heap));
        assert!(Value::Number(1.0).is_truthy(&heap));
    }

    #[test]
    fn deep_clone_duplicates_array_storage() {
        let mut heap = Heap::new();
        let original = Value::Array(heap.alloc(HeapData::Array(vec![Value::Number(1.0)])));
        let cloned = original.deep_clone(&mut heap);
        assert!(!original.structural_eq(&cloned));
        assert_eq!(original.to_display_string(&heap), cloned.to_display_string(&heap));
    }
}
