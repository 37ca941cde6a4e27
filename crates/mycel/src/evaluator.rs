//! The tree-walking evaluator: the always-correct baseline tier every other
//! tier can fall back to (spec.md §4.5).
//!
//! Expressions evaluate to a [`Value`]; statements may mutate the current
//! [`Environment`] and propagate a [`Signal`] — the sentinel return channel
//! spec.md §4.5 specifies (`normal`, `return`, `break`, `continue`; `throw`
//! rides the ordinary `Result::Err` channel instead of a `Signal` variant,
//! since every fallible operation in this crate already returns `Result`).
//!
//! `heap` is always an explicit parameter, never a struct field — the same
//! convention [`crate::bytecode::vm`] and [`crate::adaptive`] use, and the
//! only way [`Evaluator`] can also implement [`PatternEval`] and
//! [`ModuleEval`] (both of which are handed a `&mut Heap` by their callers)
//! without a `self`-and-`self.heap` aliasing conflict.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::adaptive::AdaptiveExecutor;
use crate::ast::{AssignTarget, AstNode, BinaryOp, Parameter, Span, UnaryOp};
use crate::env::{AssignError, Environment};
use crate::errors::{ErrorCode, ErrorInfo, ErrorSystem};
use crate::heap::{Heap, HeapData, HeapId, IndexedPairs, ObjectData};
use crate::hotspot::PromotionState;
use crate::module_system::{ModuleEval, ModuleRegistry, SourceLoader};
use crate::native_fn::Library;
use crate::observer::VmObserver;
use crate::pattern_match::{self, PatternEval};
use crate::value::{FunctionDescriptor, RangeValue, Value};

/// Control-flow sentinel propagated out of statement evaluation. `Normal`
/// carries the evaluated value of the statement — a block/program's value
/// is the value of its last statement, and spec.md §4.6 applies the same
/// rule to `spore` case bodies.
#[derive(Debug, Clone)]
pub enum Signal {
    Normal(Value),
    Return(Value),
    Break,
    Continue,
}

/// A recorded `macro` definition (spec.md §3 "macro definition/expansion
/// (hygiene flag)"). Expansion binds the call's evaluated arguments under
/// `args` in either a fresh child of the macro's defining scope (hygienic)
/// or the caller's own current scope (non-hygienic, so the macro body can
/// see and mutate caller locals by design).
pub struct MacroDef {
    pub hygienic: bool,
    pub body: Rc<AstNode>,
    pub defined_in: Environment,
}

/// A recorded `template` definition — compile-time-flavored parametrization
/// that this tree-walker runs eagerly at instantiation time, since there is
/// no separate compile-time pass (spec.md §3 metaprogramming).
pub struct TemplateDef {
    pub params: Vec<String>,
    pub body: Rc<AstNode>,
    pub defined_in: Environment,
}

/// Everything an [`Evaluator`] needs that outlives a single evaluation and
/// must persist across successive top-level runs in the same session (a
/// REPL line, or a `mycel-cli` script). Owned by
/// [`crate::interpreter::Interpreter`] and borrowed in for the duration of
/// one [`Evaluator::eval_program`] call. `adaptive` and `modules` are
/// shared (`&`, not `&mut`) references: both types use interior mutability
/// internally precisely so a call or an import can safely re-enter them
/// from nested evaluation (see their own doc comments).
pub struct Evaluator<'i> {
    pub errors: &'i mut ErrorSystem,
    pub adaptive: &'i AdaptiveExecutor,
    pub observer: &'i mut dyn VmObserver,
    pub modules: &'i ModuleRegistry,
    pub loader: &'i dyn SourceLoader,
    pub libraries: &'i HashMap<String, Rc<Library>>,
    pub macros: &'i mut HashMap<String, MacroDef>,
    pub templates: &'i mut HashMap<String, TemplateDef>,
    pub globals: Environment,
    pub max_call_depth: usize,
    pub call_depth: usize,
}

impl<'i> Evaluator<'i> {
    /// Evaluates a whole program (a REPL line, a script's top level) in
    /// `env`, returning the value of its last statement.
    pub fn eval_program(&mut self, env: &Environment, program: &[AstNode], heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let mut last = Value::Null;
        for stmt in program {
            match self.eval(env, stmt, heap)? {
                Signal::Normal(v) => last = v,
                Signal::Return(v) => return Ok(v),
                Signal::Break => return Err(ErrorInfo::new(ErrorCode::SemanticInvalidOperation, "break used outside a loop", stmt.span())),
                Signal::Continue => return Err(ErrorInfo::new(ErrorCode::SemanticInvalidOperation, "continue used outside a loop", stmt.span())),
            }
        }
        Ok(last)
    }

    /// Evaluates `node` as a value-producing expression; a control signal
    /// escaping here (e.g. a bare `return` as a binary operand) is a
    /// semantic error rather than silently swallowed.
    fn eval_value(&mut self, env: &Environment, node: &AstNode, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        match self.eval(env, node, heap)? {
            Signal::Normal(v) => Ok(v),
            Signal::Return(_) => Err(ErrorInfo::new(ErrorCode::SemanticInvalidOperation, "`return` cannot be used where a value is expected", node.span())),
            Signal::Break => Err(ErrorInfo::new(ErrorCode::SemanticInvalidOperation, "`break` cannot be used where a value is expected", node.span())),
            Signal::Continue => Err(ErrorInfo::new(ErrorCode::SemanticInvalidOperation, "`continue` cannot be used where a value is expected", node.span())),
        }
    }

    fn eval_block(&mut self, env: &Environment, stmts: &[AstNode], heap: &mut Heap) -> Result<Signal, ErrorInfo> {
        let scope = env.new_child();
        let mut last = Value::Null;
        for stmt in stmts {
            match self.eval(&scope, stmt, heap)? {
                Signal::Normal(v) => last = v,
                other => return Ok(other),
            }
        }
        Ok(Signal::Normal(last))
    }

    fn eval(&mut self, env: &Environment, node: &AstNode, heap: &mut Heap) -> Result<Signal, ErrorInfo> {
        match node {
            AstNode::Number(n, _) => Ok(Signal::Normal(Value::Number(*n))),
            AstNode::Str(s, _) => Ok(Signal::Normal(Value::Str(s.as_str().into()))),
            AstNode::Bool(b, _) => Ok(Signal::Normal(Value::Bool(*b))),
            AstNode::Null(_) => Ok(Signal::Normal(Value::Null)),
            AstNode::Identifier(name, span) => env
                .get(name)
                .map(Signal::Normal)
                .ok_or_else(|| ErrorInfo::new(ErrorCode::SemanticUndefinedVariable, format!("undefined variable '{name}'"), *span)),

            AstNode::Binary { op, left, right, span } => self.eval_binary(*op, left, right, *span, env, heap).map(Signal::Normal),
            AstNode::Unary { op, operand, span } => self.eval_unary(*op, operand, *span, env, heap).map(Signal::Normal),
            AstNode::RangeWithStep { start, end, step, inclusive, .. } => {
                let start = self.eval_number(env, start, heap)?;
                let end = self.eval_number(env, end, heap)?;
                let step = self.eval_number(env, step, heap)?;
                Ok(Signal::Normal(Value::Range(RangeValue { start, end, step, inclusive: *inclusive })))
            }

            AstNode::VariableDeclaration { name, initializer, mutable, .. } => {
                let value = match initializer {
                    Some(expr) => self.eval_value(env, expr, heap)?,
                    None => Value::Null,
                };
                env.define(name.clone(), value, *mutable);
                Ok(Signal::Normal(Value::Null))
            }
            AstNode::Assignment { target, value, span } => {
                let v = self.eval_value(env, value, heap)?;
                self.assign(env, target, v.clone(), *span, heap)?;
                Ok(Signal::Normal(v))
            }

            AstNode::If { condition, then_branch, elseif_branches, else_branch, .. } => {
                if self.eval_value(env, condition, heap)?.is_truthy(heap) {
                    return self.eval(env, then_branch, heap);
                }
                for (cond, branch) in elseif_branches {
                    if self.eval_value(env, cond, heap)?.is_truthy(heap) {
                        return self.eval(env, branch, heap);
                    }
                }
                match else_branch {
                    Some(branch) => self.eval(env, branch, heap),
                    None => Ok(Signal::Normal(Value::Null)),
                }
            }
            AstNode::While { condition, body, .. } => {
                while self.eval_value(env, condition, heap)?.is_truthy(heap) {
                    match self.eval(env, body, heap)? {
                        Signal::Break => break,
                        Signal::Continue | Signal::Normal(_) => {}
                        ret @ Signal::Return(_) => return Ok(ret),
                    }
                }
                Ok(Signal::Normal(Value::Null))
            }
            AstNode::For { iterator_name, collection, body, span } => self.eval_for(env, iterator_name, collection, body, *span, heap),
            AstNode::Block(stmts, _) => self.eval_block(env, stmts, heap),
            AstNode::Return(expr, _) => {
                let value = match expr {
                    Some(e) => self.eval_value(env, e, heap)?,
                    None => Value::Null,
                };
                Ok(Signal::Return(value))
            }
            AstNode::Break(_) => Ok(Signal::Break),
            AstNode::Continue(_) => Ok(Signal::Continue),
            AstNode::Throw(expr, span) => {
                let value = self.eval_value(env, expr, heap)?;
                Err(self.throw_value(value, *span, heap))
            }
            AstNode::TryCatchFinally { try_block, catch_variable, catch_block, finally_block, .. } => {
                self.eval_try(env, try_block, catch_variable.as_deref(), catch_block.as_deref(), finally_block.as_deref(), heap)
            }

            AstNode::Function { name, parameters, body, .. } => {
                let descriptor = self.make_function(name.clone(), parameters.clone(), body, env, false);
                if let Some(name) = name {
                    env.define(name.clone(), Value::Function(descriptor.clone()), false);
                }
                Ok(Signal::Normal(Value::Function(descriptor)))
            }
            AstNode::Lambda { parameters, body, .. } => Ok(Signal::Normal(Value::Function(self.make_function(None, parameters.clone(), body, env, false)))),
            AstNode::AsyncFunction { name, parameters, body, .. } => {
                let descriptor = self.make_function(name.clone(), parameters.clone(), body, env, true);
                if let Some(name) = name {
                    env.define(name.clone(), Value::Function(descriptor.clone()), false);
                }
                Ok(Signal::Normal(Value::Function(descriptor)))
            }
            AstNode::Promise(inner, _) => self.eval_value(env, inner, heap).map(Signal::Normal),
            AstNode::Await(inner, span) => {
                // Single-threaded, run-to-completion scheduling (spec.md
                // §5): there is no task queue to suspend into, so an
                // `async` call has already run to completion by the time
                // its value reaches `await` — awaiting just reads it back,
                // propagating an error value as a thrown error.
                match self.eval_value(env, inner, heap)? {
                    Value::Error(e) => Err(ErrorInfo { line: span.line, column: span.column, ..*e }),
                    other => Ok(Signal::Normal(other)),
                }
            }
            AstNode::Class { name, parent, body, .. } => {
                let class_value = self.make_class(name, parent.as_deref(), body, env, heap)?;
                env.define(name.clone(), class_value.clone(), false);
                Ok(Signal::Normal(class_value))
            }

            AstNode::ArrayLiteral(elements, _) => {
                let mut items = Vec::with_capacity(elements.len());
                for e in elements {
                    items.push(self.eval_value(env, e, heap)?);
                }
                Ok(Signal::Normal(Value::Array(heap.alloc(HeapData::Array(items)))))
            }
            AstNode::HashMapLiteral { keys, values, .. } => {
                let mut pairs = IndexedPairs::new();
                for (k, v) in keys.iter().zip(values) {
                    let key = self.eval_value(env, k, heap)?;
                    let value = self.eval_value(env, v, heap)?;
                    pairs.insert(key, value);
                }
                Ok(Signal::Normal(Value::HashMap(heap.alloc(HeapData::HashMap(pairs)))))
            }
            AstNode::SetLiteral(elements, _) => {
                let mut pairs = IndexedPairs::new();
                for e in elements {
                    let v = self.eval_value(env, e, heap)?;
                    pairs.insert(v.clone(), v);
                }
                Ok(Signal::Normal(Value::Set(heap.alloc(HeapData::Set(pairs)))))
            }
            AstNode::ArrayAccess { collection, index, span } => {
                let c = self.eval_value(env, collection, heap)?;
                let i = self.eval_value(env, index, heap)?;
                self.index_get(&c, &i, *span, heap).map(Signal::Normal)
            }
            AstNode::MemberAccess { object, property, span } => {
                let obj = self.eval_value(env, object, heap)?;
                self.member_get(&obj, property, *span, heap).map(Signal::Normal)
            }
            AstNode::Call { callee, args, span } => self.eval_call(env, callee, args, *span, heap).map(Signal::Normal),

            AstNode::Import { module, alias, span } => {
                // Copy the shared references out *before* borrowing `self`
                // mutably for the bridge below — both fields are `Copy`
                // (plain references), so this doesn't hold any lock on
                // `self` itself.
                let modules = self.modules;
                let loader = self.loader;
                let module_value = modules.load(module, loader, &mut ModuleEvalBridge(self), heap).map_err(|mut e| {
                    if e.line == 0 {
                        e.line = span.line;
                        e.column = span.column;
                    }
                    e
                })?;
                let bound_name = alias.clone().unwrap_or_else(|| module.clone());
                env.define(bound_name, Value::Module(module_value), false);
                Ok(Signal::Normal(Value::Null))
            }
            AstNode::Use { library, alias, specific_items, specific_aliases, span } => {
                self.eval_use(env, library, alias.as_deref(), specific_items, specific_aliases, *span, heap)
            }
            AstNode::ModuleDef { name, body, .. } => {
                let exports = self.eval_module_body(body, heap)?;
                let namespace = self.object_from_exports(&exports, name, heap);
                env.define(name.clone(), namespace, false);
                Ok(Signal::Normal(Value::Null))
            }
            AstNode::PackageDef { .. } => Ok(Signal::Normal(Value::Null)),

            AstNode::Spore { subject, cases, root_case, .. } => self.eval_spore(env, subject, cases, root_case.as_deref(), heap).map(Signal::Normal),

            AstNode::MacroDefinition { name, hygienic, body, .. } => {
                self.macros.insert(name.clone(), MacroDef { hygienic: *hygienic, body: Rc::new((**body).clone()), defined_in: env.clone() });
                Ok(Signal::Normal(Value::Null))
            }
            AstNode::MacroExpansion { name, args, span } => self.eval_macro_expansion(env, name, args, *span, heap).map(Signal::Normal),
            AstNode::ConstDeclaration { name, value, .. } => {
                let v = self.eval_value(env, value, heap)?;
                env.define(name.clone(), v, false);
                Ok(Signal::Normal(Value::Null))
            }
            AstNode::TemplateDefinition { name, params, body, .. } => {
                self.templates.insert(name.clone(), TemplateDef { params: params.clone(), body: Rc::new((**body).clone()), defined_in: env.clone() });
                Ok(Signal::Normal(Value::Null))
            }
            AstNode::TemplateInstantiation { name, args, span } => self.eval_template_instantiation(env, name, args, *span, heap).map(Signal::Normal),
            AstNode::ComptimeEval(inner, _) => self.eval_value(env, inner, heap).map(Signal::Normal),

            AstNode::Error { message, span } => Err(ErrorInfo::new(ErrorCode::SyntaxInvalidExpression, message.clone(), *span)),
        }
    }

    fn eval_number(&mut self, env: &Environment, node: &AstNode, heap: &mut Heap) -> Result<f64, ErrorInfo> {
        match self.eval_value(env, node, heap)? {
            Value::Number(n) => Ok(n),
            other => Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("expected Number, found {}", other.type_name(heap)), node.span())),
        }
    }

    fn eval_for(&mut self, env: &Environment, iterator_name: &str, collection: &AstNode, body: &AstNode, span: Span, heap: &mut Heap) -> Result<Signal, ErrorInfo> {
        let collection_value = self.eval_value(env, collection, heap)?;
        let items: Vec<Value> = match &collection_value {
            Value::Array(id) => match heap.get(*id) {
                Some(HeapData::Array(items)) => items.clone(),
                _ => Vec::new(),
            },
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string().into())).collect(),
            Value::Range(r) => r.iter().map(Value::Number).collect(),
            Value::HashMap(id) => match heap.get(*id) {
                Some(HeapData::HashMap(pairs)) => pairs.pairs.iter().map(|(k, _)| k.clone()).collect(),
                _ => Vec::new(),
            },
            Value::Set(id) => match heap.get(*id) {
                Some(HeapData::Set(pairs)) => pairs.pairs.iter().map(|(k, _)| k.clone()).collect(),
                _ => Vec::new(),
            },
            other => return Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("cannot iterate over {}", other.type_name(heap)), span)),
        };

        for item in items {
            let scope = env.new_child();
            scope.define(iterator_name.to_owned(), item, false);
            match self.eval(&scope, body, heap)? {
                Signal::Break => break,
                Signal::Continue | Signal::Normal(_) => {}
                ret @ Signal::Return(_) => return Ok(ret),
            }
        }
        Ok(Signal::Normal(Value::Null))
    }

    fn eval_try(
        &mut self,
        env: &Environment,
        try_block: &AstNode,
        catch_variable: Option<&str>,
        catch_block: Option<&AstNode>,
        finally_block: Option<&AstNode>,
        heap: &mut Heap,
    ) -> Result<Signal, ErrorInfo> {
        self.errors.context.in_try = true;
        let try_result = self.eval(env, try_block, heap);
        self.errors.context.in_try = false;

        let outcome = match try_result {
            Err(thrown) if catch_block.is_some() => {
                self.errors.throw(thrown.clone());
                self.errors.context.in_catch = true;
                let catch_env = env.new_child();
                if let Some(name) = catch_variable {
                    catch_env.define(name.to_owned(), Value::Error(Box::new(thrown)), false);
                }
                self.errors.catch();
                let result = self.eval(&catch_env, catch_block.expect("checked Some above"), heap);
                self.errors.context.in_catch = false;
                result
            }
            other => other,
        };

        self.errors.context.in_finally = true;
        let finally_signal = match finally_block {
            Some(block) => Some(self.eval(env, block, heap)?),
            None => None,
        };
        self.errors.context.in_finally = false;

        // `finally` runs regardless, but a pending return from the
        // try/catch body still wins unless `finally` itself returns.
        if let Some(Signal::Return(v)) = finally_signal {
            return Ok(Signal::Return(v));
        }
        outcome
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &AstNode, right: &AstNode, span: Span, env: &Environment, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        match op {
            BinaryOp::And => {
                let l = self.eval_value(env, left, heap)?;
                if !l.is_truthy(heap) { return Ok(l); }
                return self.eval_value(env, right, heap);
            }
            BinaryOp::Or => {
                let l = self.eval_value(env, left, heap)?;
                if l.is_truthy(heap) { return Ok(l); }
                return self.eval_value(env, right, heap);
            }
            BinaryOp::Range | BinaryOp::RangeInclusive => {
                let start = self.eval_number(env, left, heap)?;
                let end = self.eval_number(env, right, heap)?;
                return Ok(Value::Range(RangeValue { start, end, step: 1.0, inclusive: op == BinaryOp::RangeInclusive }));
            }
            _ => {}
        }

        let l = self.eval_value(env, left, heap)?;
        let r = self.eval_value(env, right, heap)?;
        match op {
            BinaryOp::Add => self.add(&l, &r, span, heap),
            BinaryOp::Sub => numeric(&l, &r, span, heap, "-", |a, b| Ok(a - b)),
            BinaryOp::Mul => numeric(&l, &r, span, heap, "*", |a, b| Ok(a * b)),
            BinaryOp::Div => numeric(&l, &r, span, heap, "/", |a, b| {
                if b == 0.0 { Err(ErrorInfo::new(ErrorCode::RuntimeDivisionByZero, "division by zero", span)) } else { Ok(a / b) }
            }),
            BinaryOp::Mod => numeric(&l, &r, span, heap, "%", |a, b| {
                if b == 0.0 { Err(ErrorInfo::new(ErrorCode::RuntimeDivisionByZero, "modulo by zero", span)) } else { Ok(a % b) }
            }),
            BinaryOp::Pow => numeric(&l, &r, span, heap, "**", |a, b| Ok(a.powf(b))),
            BinaryOp::Eq => Ok(Value::Bool(l.structural_eq(&r))),
            BinaryOp::NotEq => Ok(Value::Bool(!l.structural_eq(&r))),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => compare(op, &l, &r, span, heap),
            BinaryOp::Xor => Ok(Value::Bool(l.is_truthy(heap) ^ r.is_truthy(heap))),
            BinaryOp::BitAnd => numeric(&l, &r, span, heap, "&", |a, b| Ok(((a as i64) & (b as i64)) as f64)),
            BinaryOp::BitOr => numeric(&l, &r, span, heap, "|", |a, b| Ok(((a as i64) | (b as i64)) as f64)),
            BinaryOp::BitXor => numeric(&l, &r, span, heap, "^", |a, b| Ok(((a as i64) ^ (b as i64)) as f64)),
            BinaryOp::Shl => numeric(&l, &r, span, heap, "<<", |a, b| Ok(((a as i64) << (b as i64)) as f64)),
            BinaryOp::Shr => numeric(&l, &r, span, heap, ">>", |a, b| Ok(((a as i64) >> (b as i64)) as f64)),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Range | BinaryOp::RangeInclusive | BinaryOp::RangeStep => {
                unreachable!("handled above with short-circuit/lazy evaluation")
            }
        }
    }

    fn add(&self, l: &Value, r: &Value, span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        match (l, r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(_) | Value::Number(_) | Value::Bool(_) | Value::Null) => {
                Ok(Value::Str(format!("{a}{}", r.to_display_string(heap)).into()))
            }
            (Value::Array(a), Value::Array(b)) => {
                let (Some(HeapData::Array(xs)), Some(HeapData::Array(ys))) = (heap.get(*a), heap.get(*b)) else {
                    return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid array handle", span));
                };
                let mut combined = xs.clone();
                combined.extend(ys.clone());
                Ok(Value::Array(heap.alloc(HeapData::Array(combined))))
            }
            _ => Ok(Value::Str(format!("{}{}", l.to_display_string(heap), r.to_display_string(heap)).into())),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &AstNode, span: Span, env: &Environment, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let v = self.eval_value(env, operand, heap)?;
        match (op, &v) {
            (UnaryOp::Plus, Value::Number(n)) => Ok(Value::Number(*n)),
            (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
            (UnaryOp::Not, _) => Ok(Value::Bool(!v.is_truthy(heap))),
            (UnaryOp::BitNot, Value::Number(n)) => Ok(Value::Number(!(*n as i64) as f64)),
            (UnaryOp::Deref | UnaryOp::Ref, _) => Ok(v),
            _ => Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("unary operator not valid for {}", v.type_name(heap)), span)),
        }
    }

    fn assign(&mut self, env: &Environment, target: &AssignTarget, value: Value, span: Span, heap: &mut Heap) -> Result<(), ErrorInfo> {
        match target {
            AssignTarget::Identifier(name) => env.assign(name, value).map_err(|e| match e {
                AssignError::Undefined => ErrorInfo::new(ErrorCode::SemanticUndefinedVariable, format!("undefined variable '{name}'"), span),
                AssignError::Immutable => ErrorInfo::new(ErrorCode::SemanticImmutableAssignment, format!("'{name}' is immutable"), span),
            }),
            AssignTarget::Index { collection, index } => {
                let c = self.eval_value(env, collection, heap)?;
                let i = self.eval_value(env, index, heap)?;
                index_set(&c, &i, value, span, heap)
            }
            AssignTarget::Member { object, property } => {
                let obj = self.eval_value(env, object, heap)?;
                member_set(&obj, property, value, span, heap)
            }
        }
    }

    fn index_get(&self, collection: &Value, index: &Value, span: Span, heap: &Heap) -> Result<Value, ErrorInfo> {
        match collection {
            Value::Array(id) => {
                let Some(HeapData::Array(items)) = heap.get(*id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid array handle", span)) };
                let Value::Number(n) = index else { return Err(ErrorInfo::new(ErrorCode::TypeMismatch, "array index must be a Number", span)) };
                let idx = *n as i64;
                let resolved = if idx < 0 { items.len() as i64 + idx } else { idx };
                usize::try_from(resolved)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| ErrorInfo::new(ErrorCode::RuntimeIndexOutOfBounds, "index out of bounds", span))
            }
            Value::HashMap(id) => {
                let Some(HeapData::HashMap(pairs)) = heap.get(*id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid map handle", span)) };
                pairs.get(index).cloned().ok_or_else(|| ErrorInfo::new(ErrorCode::RuntimeIndexOutOfBounds, "key not found", span))
            }
            Value::Str(s) => {
                let Value::Number(n) = index else { return Err(ErrorInfo::new(ErrorCode::TypeMismatch, "string index must be a Number", span)) };
                s.chars()
                    .nth(*n as usize)
                    .map(|c| Value::Str(c.to_string().into()))
                    .ok_or_else(|| ErrorInfo::new(ErrorCode::RuntimeIndexOutOfBounds, "index out of bounds", span))
            }
            other => Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("cannot index into {}", other.type_name(heap)), span)),
        }
    }

    fn member_get(&self, object: &Value, name: &str, span: Span, heap: &Heap) -> Result<Value, ErrorInfo> {
        match object {
            Value::Object(id) => {
                let Some(HeapData::Object(obj)) = heap.get(*id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid object handle", span)) };
                if let Some(v) = obj.get(name) {
                    return Ok(v.clone());
                }
                // Methods live on the class object; an instance holds a
                // `__class__` back-reference to it (see `make_class`).
                if let Some(Value::Object(class_id)) = obj.get("__class__") {
                    if let Some(HeapData::Object(class)) = heap.get(*class_id) {
                        if let Some(v) = class.get(name) {
                            return Ok(v.clone());
                        }
                    }
                }
                Err(ErrorInfo::new(ErrorCode::SemanticUndefinedVariable, format!("no property '{name}' on this object"), span))
            }
            Value::Module(m) => m
                .exports
                .borrow()
                .get(name)
                .cloned()
                .ok_or_else(|| ErrorInfo::new(ErrorCode::SemanticUndefinedVariable, format!("module '{}' has no export '{name}'", m.name), span)),
            Value::Str(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
            Value::Array(id) if name == "length" => match heap.get(*id) {
                Some(HeapData::Array(items)) => Ok(Value::Number(items.len() as f64)),
                _ => Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid array handle", span)),
            },
            other => Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("cannot access property '{name}' on {}", other.type_name(heap)), span)),
        }
    }

    fn eval_call(&mut self, env: &Environment, callee: &AstNode, args: &[AstNode], span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let mut arg_values = Vec::with_capacity(args.len());
        for a in args {
            arg_values.push(self.eval_value(env, a, heap)?);
        }

        if let AstNode::MemberAccess { object, property, span: mspan } = callee {
            let receiver = self.eval_value(env, object, heap)?;
            let method = self.member_get(&receiver, property, *mspan, heap)?;
            arg_values.insert(0, receiver);
            return self.call_value(method, arg_values, span, heap);
        }

        let callee_value = self.eval_value(env, callee, heap)?;
        self.call_value(callee_value, arg_values, span, heap)
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>, span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        match callee {
            Value::BuiltinFunction(f) => f.call(&args, heap),
            Value::Function(descriptor) => self.call_function(&descriptor, args, span, heap),
            Value::Object(id) if is_class_object(id, heap) => self.instantiate_class(id, args, span, heap),
            other => Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("{} is not callable", other.type_name(heap)), span)),
        }
    }

    /// Invokes a user-defined function, letting [`AdaptiveExecutor`] decide
    /// whether to tree-walk, run compiled bytecode, or run a JIT trace.
    fn call_function(&mut self, descriptor: &Rc<FunctionDescriptor>, args: Vec<Value>, span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        if self.call_depth >= self.max_call_depth {
            return Err(ErrorInfo::new(ErrorCode::RuntimeStackOverflow, "stack overflow", span));
        }

        let call_env = descriptor.closure.new_child();
        self.bind_parameters(&call_env, &descriptor.parameters, &args, heap)?;

        self.call_depth += 1;
        self.observer.on_call(descriptor.name.as_deref(), self.call_depth);

        let state = self.adaptive.tier_for(descriptor, &args, heap);
        let result = match state {
            PromotionState::Cold | PromotionState::Blacklisted => self.tree_walk_body(&call_env, descriptor, span, heap),
            _ => {
                let globals = self.globals.clone();
                match self.adaptive.run_promoted(descriptor, &args, &globals, heap, self.observer, self.call_depth, state) {
                    Some(r) => r,
                    None => self.tree_walk_body(&call_env, descriptor, span, heap),
                }
            }
        };

        self.call_depth -= 1;
        self.observer.on_return(self.call_depth);
        result
    }

    fn tree_walk_body(&mut self, call_env: &Environment, descriptor: &Rc<FunctionDescriptor>, span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        match self.eval(call_env, &descriptor.body, heap)? {
            Signal::Return(v) | Signal::Normal(v) => Ok(v),
            Signal::Break | Signal::Continue => Err(ErrorInfo::new(ErrorCode::SemanticInvalidOperation, "break/continue escaped a function body", span)),
        }
    }

    fn bind_parameters(&mut self, call_env: &Environment, parameters: &[Parameter], args: &[Value], heap: &mut Heap) -> Result<(), ErrorInfo> {
        for (i, param) in parameters.iter().enumerate() {
            let value = match args.get(i) {
                Some(v) => v.clone(),
                None => match &param.default {
                    Some(expr) => self.eval_value(call_env, expr, heap)?,
                    None => Value::Null,
                },
            };
            call_env.define(param.name.clone(), value, true);
        }
        Ok(())
    }

    fn make_function(&self, name: Option<String>, parameters: Vec<Parameter>, body: &AstNode, env: &Environment, is_async: bool) -> Rc<FunctionDescriptor> {
        Rc::new(FunctionDescriptor {
            name,
            parameters,
            body: Rc::new(body.clone()),
            closure: env.clone(),
            is_async,
            compiled: std::cell::RefCell::new(None),
        })
    }

    /// Single-level inheritance is flattened at definition time: the
    /// parent's properties are copied in first, then overlaid by the
    /// child's own, so method lookup at call time never has to walk a
    /// parent chain.
    fn make_class(&mut self, name: &str, parent: Option<&str>, body: &[AstNode], env: &Environment, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let mut properties = Vec::new();
        if let Some(parent_name) = parent {
            let parent_value = env
                .get(parent_name)
                .ok_or_else(|| ErrorInfo::new(ErrorCode::SemanticUndefinedClass, format!("undefined parent class '{parent_name}'"), Span::default()))?;
            if let Value::Object(parent_id) = parent_value {
                if let Some(HeapData::Object(parent_obj)) = heap.get(parent_id) {
                    properties = parent_obj.properties.clone();
                }
            }
        }
        for member in body {
            match member {
                AstNode::Function { name: Some(method_name), parameters, body: method_body, .. } => {
                    let descriptor = self.make_function(Some(method_name.clone()), parameters.clone(), method_body, env, false);
                    upsert(&mut properties, method_name.clone(), Value::Function(descriptor));
                }
                AstNode::VariableDeclaration { name: field_name, initializer, .. } => {
                    let value = match initializer {
                        Some(expr) => self.eval_value(env, expr, heap)?,
                        None => Value::Null,
                    };
                    upsert(&mut properties, field_name.clone(), value);
                }
                _ => {}
            }
        }
        upsert(&mut properties, "__type__".to_owned(), Value::Str("Class".into()));
        upsert(&mut properties, "__class_name__".to_owned(), Value::Str(name.into()));
        let id = heap.alloc(HeapData::Object(ObjectData { properties }));
        Ok(Value::Object(id))
    }

    /// "Calling" a class value instantiates it: a fresh heap object linked
    /// to the class via `__class__`, with `init` (if present) invoked
    /// bound to the new instance as an implicit first argument — methods
    /// never get special bytecode/JIT handling, they're ordinary function
    /// calls with `self` prepended by convention.
    fn instantiate_class(&mut self, class_id: HeapId, args: Vec<Value>, span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let Some(HeapData::Object(class)) = heap.get(class_id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid class handle", span)) };
        let class_name = class.get("__class_name__").cloned().unwrap_or(Value::Str("".into()));
        let init = class.get("init").cloned();

        let properties = vec![("__type__".to_owned(), class_name), ("__class__".to_owned(), Value::Object(class_id))];
        let instance_id = heap.alloc(HeapData::Object(ObjectData { properties }));
        let instance = Value::Object(instance_id);

        if let Some(Value::Function(descriptor)) = init {
            let mut call_args = Vec::with_capacity(args.len() + 1);
            call_args.push(instance.clone());
            call_args.extend(args);
            self.call_function(&descriptor, call_args, span, heap)?;
        }
        Ok(instance)
    }

    fn throw_value(&mut self, value: Value, span: Span, heap: &Heap) -> ErrorInfo {
        let info = match value {
            Value::Error(e) => *e,
            other => ErrorInfo::new(ErrorCode::UserDefined, other.to_display_string(heap), span),
        };
        self.errors.throw(info.clone());
        info
    }

    fn eval_spore(&mut self, env: &Environment, subject: &AstNode, cases: &[crate::ast::SporeCase], root_case: Option<&AstNode>, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let subject_value = self.eval_value(env, subject, heap)?;
        for case in cases {
            let case_env = env.new_child();
            if pattern_match::matches(&case.pattern, &subject_value, heap, &case_env, self)? {
                return self.eval_value(&case_env, &case.body, heap);
            }
        }
        match root_case {
            Some(default) => self.eval_value(env, default, heap),
            None => Err(ErrorInfo::new(ErrorCode::RuntimeInvalidState, "no spore case matched and no root case was provided", subject.span())),
        }
    }

    fn eval_use(
        &mut self,
        env: &Environment,
        library: &str,
        alias: Option<&str>,
        specific_items: &[String],
        specific_aliases: &[Option<String>],
        span: Span,
        heap: &mut Heap,
    ) -> Result<Signal, ErrorInfo> {
        let Some(lib) = self.libraries.get(library).cloned() else {
            return Err(ErrorInfo::new(ErrorCode::SemanticUndefinedFunction, format!("library '{library}' is not registered"), span));
        };

        if specific_items.is_empty() {
            let namespace_name = alias.unwrap_or(library).to_owned();
            let mut properties: Vec<(String, Value)> = lib.functions.iter().map(|f| (f.name.clone(), Value::BuiltinFunction(f.clone()))).collect();
            properties.push(("__library_name__".to_owned(), Value::Str(lib.name.as_str().into())));
            properties.push(("__type__".to_owned(), Value::Str("Library".into())));
            let id = heap.alloc(HeapData::Object(ObjectData { properties }));
            env.define(namespace_name, Value::Object(id), false);
        } else {
            for (item, item_alias) in specific_items.iter().zip(specific_aliases) {
                let Some(f) = lib.get(item) else {
                    return Err(ErrorInfo::new(ErrorCode::SemanticUndefinedFunction, format!("'{library}' has no function '{item}'"), span));
                };
                let bound_name = item_alias.clone().unwrap_or_else(|| item.clone());
                env.define(bound_name, Value::BuiltinFunction(f), false);
            }
        }
        Ok(Signal::Normal(Value::Null))
    }

    fn object_from_exports(&self, exports: &IndexMap<String, Value>, name: &str, heap: &mut Heap) -> Value {
        let mut properties: Vec<(String, Value)> = exports.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        properties.push(("__type__".to_owned(), Value::Str("Module".into())));
        properties.push(("__module_name__".to_owned(), Value::Str(name.into())));
        Value::Object(heap.alloc(HeapData::Object(ObjectData { properties })))
    }

    fn eval_macro_expansion(&mut self, env: &Environment, name: &str, args: &[AstNode], span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let Some(def) = self.macros.get(name) else {
            return Err(ErrorInfo::new(ErrorCode::SemanticUndefinedFunction, format!("undefined macro '{name}'"), span));
        };
        let hygienic = def.hygienic;
        let body = def.body.clone();
        let defined_in = def.defined_in.clone();

        let mut arg_values = Vec::with_capacity(args.len());
        for a in args {
            arg_values.push(self.eval_value(env, a, heap)?);
        }
        let expansion_env = if hygienic { defined_in.new_child() } else { env.new_child() };
        expansion_env.define("args", Value::Array(heap.alloc(HeapData::Array(arg_values))), false);
        self.eval_value(&expansion_env, &body, heap)
    }

    fn eval_template_instantiation(&mut self, env: &Environment, name: &str, args: &[AstNode], span: Span, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        let Some(def) = self.templates.get(name) else {
            return Err(ErrorInfo::new(ErrorCode::SemanticUndefinedFunction, format!("undefined template '{name}'"), span));
        };
        if args.len() != def.params.len() {
            return Err(ErrorInfo::new(
                ErrorCode::SemanticInvalidOperation,
                format!("template '{name}' expects {} argument(s), found {}", def.params.len(), args.len()),
                span,
            ));
        }
        let params = def.params.clone();
        let body = def.body.clone();
        let defined_in = def.defined_in.clone();

        let mut arg_values = Vec::with_capacity(args.len());
        for a in args {
            arg_values.push(self.eval_value(env, a, heap)?);
        }
        let instantiation_env = defined_in.new_child();
        for (param, value) in params.iter().zip(arg_values) {
            instantiation_env.define(param.clone(), value, false);
        }
        self.eval_value(&instantiation_env, &body, heap)
    }
}

impl ModuleEval for Evaluator<'_> {
    /// Runs a loaded module's top level in a fresh child of the global
    /// scope, then collects every top-level declaration marked `export` as
    /// that module's public bindings.
    fn eval_module_body(&mut self, program: &[AstNode], heap: &mut Heap) -> Result<IndexMap<String, Value>, ErrorInfo> {
        let module_env = self.globals.new_child();
        for stmt in program {
            self.eval(&module_env, stmt, heap)?;
        }
        let mut exports = IndexMap::new();
        for stmt in program {
            let exported_name = match stmt {
                AstNode::VariableDeclaration { name, export: true, .. } => Some(name.as_str()),
                AstNode::Function { name: Some(name), export: true, .. } => Some(name.as_str()),
                _ => None,
            };
            if let Some(name) = exported_name {
                if let Some(value) = module_env.get(name) {
                    exports.insert(name.to_owned(), value);
                }
            }
        }
        Ok(exports)
    }
}

impl PatternEval for Evaluator<'_> {
    fn eval_for_pattern(&mut self, node: &AstNode, env: &Environment, heap: &mut Heap) -> Result<Value, ErrorInfo> {
        self.eval_value(env, node, heap)
    }
}

/// Bridges [`ModuleEval`] to an [`Evaluator`] borrowed in separately from
/// `self.modules`/`self.loader`, which the caller must copy out first (see
/// the `Import` arm in [`Evaluator::eval`]).
struct ModuleEvalBridge<'a, 'i>(&'a mut Evaluator<'i>);

impl ModuleEval for ModuleEvalBridge<'_, '_> {
    fn eval_module_body(&mut self, program: &[AstNode], heap: &mut Heap) -> Result<IndexMap<String, Value>, ErrorInfo> {
        self.0.eval_module_body(program, heap)
    }
}

fn is_class_object(id: HeapId, heap: &Heap) -> bool {
    matches!(
        heap.get(id),
        Some(HeapData::Object(o)) if matches!(o.get("__type__"), Some(Value::Str(s)) if &**s == "Class")
    )
}

fn numeric(l: &Value, r: &Value, span: Span, heap: &Heap, op: &str, f: impl FnOnce(f64, f64) -> Result<f64, ErrorInfo>) -> Result<Value, ErrorInfo> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => f(*a, *b).map(Value::Number),
        _ => Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("'{op}' requires two numbers, found {} and {}", l.type_name(heap), r.type_name(heap)), span)),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value, span: Span, heap: &Heap) -> Result<Value, ErrorInfo> {
    let ordering = match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => return Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("cannot compare {} and {}", l.type_name(heap), r.type_name(heap)), span)),
    };
    let Some(ordering) = ordering else {
        return Err(ErrorInfo::new(ErrorCode::TypeMismatch, "comparison produced no ordering (NaN?)", span));
    };
    Ok(Value::Bool(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::GtEq => ordering.is_ge(),
        _ => unreachable!(),
    }))
}

fn index_set(collection: &Value, index: &Value, value: Value, span: Span, heap: &mut Heap) -> Result<(), ErrorInfo> {
    match collection {
        Value::Array(id) => {
            let Value::Number(n) = index else { return Err(ErrorInfo::new(ErrorCode::TypeMismatch, "array index must be a Number", span)) };
            let idx = *n as i64;
            let Some(HeapData::Array(items)) = heap.get_mut(*id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid array handle", span)) };
            let resolved = if idx < 0 { items.len() as i64 + idx } else { idx };
            let resolved = usize::try_from(resolved).unwrap_or(usize::MAX);
            if resolved >= items.len() {
                return Err(ErrorInfo::new(ErrorCode::RuntimeIndexOutOfBounds, "index out of bounds", span));
            }
            items[resolved] = value;
            Ok(())
        }
        Value::HashMap(id) => {
            let Some(HeapData::HashMap(pairs)) = heap.get_mut(*id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid map handle", span)) };
            pairs.insert(index.clone(), value);
            Ok(())
        }
        Value::Set(id) => {
            let Some(HeapData::Set(pairs)) = heap.get_mut(*id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid set handle", span)) };
            pairs.insert(index.clone(), index.clone());
            let _ = value;
            Ok(())
        }
        other => Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("cannot index-assign into {}", other.type_name(heap)), span)),
    }
}

fn member_set(object: &Value, name: &str, value: Value, span: Span, heap: &mut Heap) -> Result<(), ErrorInfo> {
    let Value::Object(id) = object else { return Err(ErrorInfo::new(ErrorCode::TypeMismatch, format!("cannot set property '{name}' on {}", object.type_name(heap)), span)) };
    let Some(HeapData::Object(obj)) = heap.get_mut(*id) else { return Err(ErrorInfo::new(ErrorCode::MemoryAccessViolation, "invalid object handle", span)) };
    obj.set(name, value);
    Ok(())
}

fn upsert(properties: &mut Vec<(String, Value)>, name: String, value: Value) {
    if let Some(slot) = properties.iter_mut().find(|(k, _)| *k == name) {
        slot.1 = value;
    } else {
        properties.push((name, value));
    }
}
