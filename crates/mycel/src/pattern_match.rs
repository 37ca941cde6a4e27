//! The `spore` pattern matcher (spec.md §4.6).
//!
//! Matching a [`Pattern`] against a [`Value`] can bind new names into a
//! fresh child [`Environment`] and can itself run nested expression
//! evaluation (for guards, range bounds, and literal patterns) — so this
//! module takes a callback into the evaluator rather than depending on it
//! directly, keeping the dependency direction single: `evaluator` depends on
//! `pattern_match`, not the reverse.

use regex::Regex;

use crate::ast::{AstNode, Pattern};
use crate::env::Environment;
use crate::errors::{ErrorCode, ErrorInfo};
use crate::heap::{Heap, HeapData};
use crate::value::Value;

/// Evaluates a sub-expression needed while matching (guard conditions,
/// range/literal bounds). Implemented by the evaluator.
pub trait PatternEval {
    fn eval_for_pattern(&mut self, node: &AstNode, env: &Environment, heap: &mut Heap) -> Result<Value, ErrorInfo>;
}

/// Attempts to match `pattern` against `subject`, binding names into `env`
/// on success. Returns `Ok(true)` on a match (bindings are committed to
/// `env`), `Ok(false)` on a clean non-match (nothing is bound), or `Err` if
/// evaluating a guard/literal/range bound itself threw.
pub fn matches(
    pattern: &Pattern,
    subject: &Value,
    heap: &mut Heap,
    env: &Environment,
    evaluator: &mut dyn PatternEval,
) -> Result<bool, ErrorInfo> {
    match pattern {
        Pattern::Wildcard => Ok(true),

        Pattern::Identifier(name) => {
            env.define(name.clone(), subject.clone(), false);
            Ok(true)
        }

        Pattern::Literal(expr) => {
            let value = evaluator.eval_for_pattern(expr, env, heap)?;
            Ok(value.structural_eq(subject))
        }

        Pattern::Type(name) => Ok(type_name_matches(name, subject, heap)),

        Pattern::Range { start, end, inclusive } => {
            let Value::Number(n) = subject else { return Ok(false) };
            let start = as_number(evaluator.eval_for_pattern(start, env, heap)?)?;
            let end = as_number(evaluator.eval_for_pattern(end, env, heap)?)?;
            Ok(if *inclusive { (start..=end).contains(n) } else { (start..end).contains(n) })
        }

        Pattern::Regex { pattern: src, flags } => {
            let Value::Str(s) = subject else { return Ok(false) };
            let full = if flags.contains('i') { format!("(?i){src}") } else { src.clone() };
            let re = Regex::new(&full).map_err(|e| {
                ErrorInfo::new(ErrorCode::SemanticInvalidOperation, format!("invalid regex pattern: {e}"), Default::default())
            })?;
            Ok(re.is_match(s))
        }

        Pattern::ArrayDestructure { elements, rest } => {
            let Value::Array(id) = subject else { return Ok(false) };
            let Some(HeapData::Array(items)) = heap.get(*id) else { return Ok(false) };
            if rest.is_none() && items.len() != elements.len() {
                return Ok(false);
            }
            if rest.is_some() && items.len() < elements.len() {
                return Ok(false);
            }
            let items = items.clone();
            for (pat, val) in elements.iter().zip(items.iter()) {
                if !matches(pat, val, heap, env, evaluator)? {
                    return Ok(false);
                }
            }
            if let Some(rest_name) = rest {
                let remaining: Vec<Value> = items[elements.len()..].to_vec();
                let id = heap.alloc(HeapData::Array(remaining));
                env.define(rest_name.clone(), Value::Array(id), true);
            }
            Ok(true)
        }

        Pattern::ObjectDestructure { fields } => {
            let Value::Object(id) = subject else { return Ok(false) };
            let Some(HeapData::Object(obj)) = heap.get(*id) else { return Ok(false) };
            let mut field_values = Vec::with_capacity(fields.len());
            for (name, _) in fields {
                let Some(field_value) = obj.get(name) else { return Ok(false) };
                field_values.push(field_value.clone());
            }
            for ((_, sub_pattern), field_value) in fields.iter().zip(field_values) {
                if !matches(sub_pattern, &field_value, heap, env, evaluator)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Pattern::Guard { inner, condition } => {
            if !matches(inner, subject, heap, env, evaluator)? {
                return Ok(false);
            }
            Ok(evaluator.eval_for_pattern(condition, env, heap)?.is_truthy(heap))
        }

        Pattern::Or(a, b) => {
            // Each branch binds into its own child scope first; only the
            // branch that actually matches gets its bindings spliced into
            // `env`. Otherwise a failing `a` that bound a few names before
            // mismatching would leak those names alongside `b`'s.
            let a_scope = env.new_child();
            if matches(a, subject, heap, &a_scope, evaluator)? {
                for (name, value, mutable) in a_scope.local_bindings() {
                    env.define(name, value, mutable);
                }
                return Ok(true);
            }
            let b_scope = env.new_child();
            if matches(b, subject, heap, &b_scope, evaluator)? {
                for (name, value, mutable) in b_scope.local_bindings() {
                    env.define(name, value, mutable);
                }
                return Ok(true);
            }
            Ok(false)
        }

        Pattern::And(a, b) => Ok(matches(a, subject, heap, env, evaluator)? && matches(b, subject, heap, env, evaluator)?),

        Pattern::Not(inner) => Ok(!matches(inner, subject, heap, env, evaluator)?),
    }
}

fn as_number(v: Value) -> Result<f64, ErrorInfo> {
    match v {
        Value::Number(n) => Ok(n),
        _ => Err(ErrorInfo::new(ErrorCode::TypeMismatch, "range pattern bounds must be numbers", Default::default())),
    }
}

fn type_name_matches(name: &str, value: &Value, heap: &Heap) -> bool {
    match name {
        "Number" => matches!(value, Value::Number(_)),
        "String" | "Str" => matches!(value, Value::Str(_)),
        "Bool" | "Boolean" => matches!(value, Value::Bool(_)),
        "Null" => matches!(value, Value::Null),
        "Array" => matches!(value, Value::Array(_)),
        "HashMap" => matches!(value, Value::HashMap(_)),
        "Set" => matches!(value, Value::Set(_)),
        "Range" => matches!(value, Value::Range(_)),
        "Function" => matches!(value, Value::Function(_) | Value::BuiltinFunction(_)),
        _ => value.type_name(heap) == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    struct NoEval;
    impl PatternEval for NoEval {
        fn eval_for_pattern(&mut self, node: &AstNode, _env: &Environment, _heap: &mut Heap) -> Result<Value, ErrorInfo> {
            match node {
                AstNode::Number(n, _) => Ok(Value::Number(*n)),
                AstNode::Bool(b, _) => Ok(Value::Bool(*b)),
                _ => Ok(Value::Null),
            }
        }
    }

    #[test]
    fn wildcard_always_matches() {
        let mut heap = Heap::new();
        let env = Environment::new_global();
        assert!(matches(&Pattern::Wildcard, &Value::Number(42.0), &mut heap, &env, &mut NoEval).unwrap());
    }

    #[test]
    fn identifier_binds_subject() {
        let mut heap = Heap::new();
        let env = Environment::new_global();
        assert!(matches(&Pattern::Identifier("x".into()), &Value::Number(7.0), &mut heap, &env, &mut NoEval).unwrap());
        assert_eq!(env.get("x"), Some(Value::Number(7.0)));
    }

    #[test]
    fn range_pattern_checks_inclusivity() {
        let mut heap = Heap::new();
        let env = Environment::new_global();
        let pat = Pattern::Range {
            start: Box::new(AstNode::Number(1.0, Span::default())),
            end: Box::new(AstNode::Number(5.0, Span::default())),
            inclusive: false,
        };
        assert!(matches(&pat, &Value::Number(3.0), &mut heap, &env, &mut NoEval).unwrap());
        assert!(!matches(&pat, &Value::Number(5.0), &mut heap, &env, &mut NoEval).unwrap());
    }

    #[test]
    fn guard_rejects_when_condition_false() {
        let mut heap = Heap::new();
        let env = Environment::new_global();
        let pat = Pattern::Guard {
            inner: Box::new(Pattern::Identifier("x".into())),
            condition: Box::new(AstNode::Bool(false, Span::default())),
        };
        assert!(!matches(&pat, &Value::Number(1.0), &mut heap, &env, &mut NoEval).unwrap());
    }

    #[test]
    fn or_pattern_tries_both_branches() {
        let mut heap = Heap::new();
        let env = Environment::new_global();
        let pat = Pattern::Or(
            Box::new(Pattern::Literal(Box::new(AstNode::Number(1.0, Span::default())))),
            Box::new(Pattern::Literal(Box::new(AstNode::Number(2.0, Span::default())))),
        );
        assert!(matches(&pat, &Value::Number(2.0), &mut heap, &env, &mut NoEval).unwrap());
        assert!(!matches(&pat, &Value::Number(3.0), &mut heap, &env, &mut NoEval).unwrap());
    }

    #[test]
    fn or_pattern_discards_bindings_from_the_non_matching_branch() {
        let mut heap = Heap::new();
        let env = Environment::new_global();
        // `[x, 1] | [2, y]` against `[2, 3]`: the first branch binds `x = 2`
        // before failing on `1 != 3`; only the second branch's `y` should
        // survive.
        let pat = Pattern::Or(
            Box::new(Pattern::ArrayDestructure {
                elements: vec![
                    Pattern::Identifier("x".into()),
                    Pattern::Literal(Box::new(AstNode::Number(1.0, Span::default()))),
                ],
                rest: None,
            }),
            Box::new(Pattern::ArrayDestructure {
                elements: vec![
                    Pattern::Literal(Box::new(AstNode::Number(2.0, Span::default()))),
                    Pattern::Identifier("y".into()),
                ],
                rest: None,
            }),
        );
        let items = vec![Value::Number(2.0), Value::Number(3.0)];
        let id = heap.alloc(HeapData::Array(items));
        assert!(matches(&pat, &Value::Array(id), &mut heap, &env, &mut NoEval).unwrap());
        assert_eq!(env.get("y"), Some(Value::Number(3.0)));
        assert_eq!(env.get("x"), None);
    }
}
