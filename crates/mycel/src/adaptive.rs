//! The adaptive executor: per-call-site tier selection across the four
//! execution tiers (spec.md §4.12).
//!
//! Every call into a user-defined function passes through
//! [`AdaptiveExecutor::call`], which consults the [`HotSpotTracker`] and
//! picks one of:
//!
//! - **Cold** — delegate to the caller's tree-walking evaluator (always
//!   correct, the fallback every other tier can deopt back to).
//! - **Warm** — compile the body to bytecode once (cached on the
//!   [`FunctionDescriptor`] itself) and run it on the register VM.
//! - **Hot** — additionally attempt to extract a numeric trace from the
//!   compiled bytecode, optimize it, and JIT it to native code; if that
//!   succeeds the trace runs directly, guard-checked on every call.
//!
//! A JIT or bytecode-compile failure is never an error: the site just stays
//! at (or drops back to) the tier below, logged through `log::debug!`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::bytecode::{self, BytecodeFunction};
use crate::config::{InterpreterConfig, TierPolicy};
use crate::env::Environment;
use crate::errors::ErrorInfo;
use crate::heap::Heap;
use crate::hotspot::{HotSpotTracker, PromotionState, TypeFingerprint};
use crate::jit::{self, CompiledTrace};
use crate::observer::VmObserver;
use crate::trace::{self, recorder::TraceRecorder, Guard};
use crate::value::{FunctionDescriptor, Value};

/// `hotspot`/`jit_traces` sit behind `RefCell` rather than requiring `&mut
/// self`: `call` invokes `tree_walk` synchronously, and a Cold call's body
/// can itself contain nested calls that re-enter `call` on the very same
/// executor before the outer invocation returns. A `&mut self` receiver
/// would make that reentrancy a borrow-checker error; each `RefCell` access
/// here is short-lived and never held across a nested call, so it never
/// panics at runtime.
pub struct AdaptiveExecutor {
    hotspot: RefCell<HotSpotTracker>,
    max_call_depth: usize,
    jit_traces: RefCell<HashMap<usize, Option<Rc<CompiledTrace>>>>,
    tier_policy: TierPolicy,
}

impl AdaptiveExecutor {
    pub fn new(config: &InterpreterConfig) -> Self {
        Self {
            hotspot: RefCell::new(HotSpotTracker::with_decay(
                config.warm_threshold,
                config.hot_threshold,
                config.type_stability_window,
                config.decay_after_ticks,
            )),
            max_call_depth: config.max_call_depth,
            jit_traces: RefCell::new(HashMap::new()),
            tier_policy: config.tier_policy,
        }
    }

    /// One adaptive-executor tick (spec.md §4.8 decay) — call once per
    /// top-level `run`, ages every tracked call site.
    pub fn tick(&self) {
        self.hotspot.borrow_mut().tick();
    }

    /// Records this call and returns the call site's current
    /// [`PromotionState`] without running anything. `Cold` and
    /// `Blacklisted` mean the caller should tree-walk the body itself;
    /// anything else should be passed to [`Self::run_promoted`].
    ///
    /// Split out from running the call (rather than taking a `tree_walk`
    /// closure the way an earlier version of this executor did) so that a
    /// Cold call's tree-walked body can freely make nested calls back into
    /// this same executor: a closure captured alongside `observer` in one
    /// call expression can't also hand `observer` to the callee without two
    /// overlapping borrows of it, and tree-walking needs its own unshared
    /// access to `observer` for `on_call`/`on_return`.
    ///
    /// Honors `mycel-cli --no-bytecode`/`--no-jit` (`TierPolicy::TreeWalkOnly`):
    /// every call site stays `Cold` and the hot-spot tracker never sees it,
    /// so `mycel-cli`'s flag has the same effect as never warming up at all.
    pub fn tier_for(&self, descriptor: &Rc<FunctionDescriptor>, args: &[Value], heap: &Heap) -> PromotionState {
        if self.tier_policy == TierPolicy::TreeWalkOnly {
            return PromotionState::Cold;
        }
        let site = Rc::as_ptr(&descriptor.body) as usize;
        let fingerprint = TypeFingerprint::of(args, heap);
        self.hotspot.borrow_mut().record_call(site, fingerprint)
    }

    /// Runs `descriptor` at the bytecode or JIT tier. Only call this when
    /// `state` (from a prior [`Self::tier_for`]) is not `Cold`. Returns
    /// `None` if the body turned out not to be compilable — the site is
    /// blacklisted as a side effect, and the caller should tree-walk this
    /// call (and every future one at this site).
    pub fn run_promoted(
        &self,
        descriptor: &Rc<FunctionDescriptor>,
        args: &[Value],
        globals: &Environment,
        heap: &mut Heap,
        observer: &mut dyn VmObserver,
        call_depth: usize,
        state: PromotionState,
    ) -> Option<Result<Value, ErrorInfo>> {
        let site = Rc::as_ptr(&descriptor.body) as usize;
        let compiled = match self.ensure_compiled(descriptor, site) {
            Some(compiled) => compiled,
            None => {
                self.hotspot.borrow_mut().blacklist(site);
                observer.on_deopt(site, "body is not compilable to bytecode");
                return None;
            }
        };
        if state == PromotionState::Hot && self.tier_policy == TierPolicy::Adaptive {
            self.try_jit(&compiled, site, args);
        }
        if let Some(Some(trace)) = self.jit_traces.borrow().get(&site) {
            if let Some(result) = run_trace(trace, args) {
                observer.on_promotion(site, "bytecode", "jit");
                return Some(Ok(result));
            }
            observer.on_deopt(site, "trace guard rejected these argument types");
        }
        observer.on_promotion(site, "ast", "bytecode");
        Some(match bytecode::run(&compiled, args, globals, heap, observer, call_depth, self.max_call_depth) {
            bytecode::FrameExit::Returned(v) => Ok(v),
            bytecode::FrameExit::Threw(e) => Err(e),
        })
    }

    fn ensure_compiled(&self, descriptor: &Rc<FunctionDescriptor>, site: usize) -> Option<Rc<BytecodeFunction>> {
        if let Some(existing) = descriptor.compiled.borrow().as_ref() {
            return Some(existing.clone());
        }
        let compiled = bytecode::Compiler::compile_function(
            descriptor.name.as_deref().unwrap_or("<anonymous>"),
            &descriptor.parameters,
            descriptor.body.as_ref(),
            descriptor.body.clone(),
        )
        .map_err(|e| log::debug!("bytecode compile rejected call site #{site}: {e}"))
        .ok()?;
        let rc = Rc::new(compiled);
        *descriptor.compiled.borrow_mut() = Some(rc.clone());
        self.hotspot.borrow_mut().mark_compiled(site);
        Some(rc)
    }

    fn try_jit(&self, compiled: &BytecodeFunction, site: usize, args: &[Value]) {
        if self.jit_traces.borrow().contains_key(&site) {
            return;
        }
        let only_numeric = args.iter().all(|a| matches!(a, Value::Number(_)));
        let entry = if only_numeric {
            extract_trace_candidate(compiled)
                .map(trace::optimize)
                .and_then(|t| jit::compile(&t.ops, t.guards, t.slot_count, t.result_slot, t.result_vm_register))
                .map(Rc::new)
        } else {
            None
        };
        if entry.is_none() {
            log::debug!("trace extraction/JIT skipped for call site #{site} (non-numeric args or unsupported control flow)");
        }
        self.jit_traces.borrow_mut().insert(site, entry);
    }
}

fn run_trace(trace: &CompiledTrace, args: &[Value]) -> Option<Value> {
    if !trace.guards.iter().all(|g| {
        let Guard::IsNumber { reg } = g;
        matches!(args.get(*reg as usize), Some(Value::Number(_)))
    }) {
        return None;
    }
    let mut slots = vec![0.0; trace.slot_count as usize];
    for (i, arg) in args.iter().enumerate() {
        if let Value::Number(n) = arg {
            if let Some(slot) = slots.get_mut(i) {
                *slot = *n;
            }
        }
    }
    trace.run(&mut slots);
    Some(Value::Number(slots[trace.result_slot as usize]))
}

/// Statically extracts a numeric trace from a compiled function body: every
/// parameter register is guarded `IsNumber`, then the instruction stream is
/// replayed through [`TraceRecorder`] until the first `Return`. Any opcode
/// outside `{LoadConst, Move, Add, Sub, Mul, Div}` — including every branch
/// — aborts extraction, so only straight-line arithmetic functions (no
/// `if`/`while`/`for` in their own body) become trace candidates. This is a
/// static approximation of "record what a representative hot run actually
/// does" (spec.md §4.10); see DESIGN.md for why the simplification is sound
/// for this scope.
fn extract_trace_candidate(func: &BytecodeFunction) -> Option<crate::trace::TraceRecording> {
    use crate::bytecode::Opcode;

    let mut recorder = TraceRecorder::new();
    for i in 0..func.param_count {
        recorder.guard_number(i);
    }

    let mut result_register = None;
    for instr in &func.instructions {
        match instr.op {
            Opcode::LoadConst => match &func.constants[instr.imm as usize] {
                Value::Number(n) => recorder.record_const(instr.a, *n),
                _ => return None,
            },
            Opcode::Move => recorder.record_move(instr.a, instr.b),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => recorder.record_binary(instr.op, instr.a, instr.b, instr.c),
            Opcode::Return => {
                result_register = Some(instr.a);
                break;
            }
            Opcode::ReturnNull | Opcode::Nop => break,
            _ => return None,
        }
    }
    recorder.finish(result_register?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, BinaryOp, Parameter, Span};
    use crate::observer::NoopObserver;

    fn make_descriptor(name: &str, params: Vec<&str>, body: AstNode) -> Rc<FunctionDescriptor> {
        let body = Rc::new(body);
        Rc::new(FunctionDescriptor {
            name: Some(name.to_owned()),
            parameters: params.into_iter().map(|p| Parameter { name: p.to_owned(), type_annotation: None, default: None }).collect(),
            body,
            closure: Environment::new_global(),
            is_async: false,
            compiled: std::cell::RefCell::new(None),
        })
    }

    #[test]
    fn cold_calls_report_cold_tier() {
        let config = InterpreterConfig { warm_threshold: 100, ..InterpreterConfig::default() };
        let exec = AdaptiveExecutor::new(&config);
        let descriptor = make_descriptor("f", vec!["x"], AstNode::Block(vec![], Span::default()));
        let heap = Heap::new();
        let state = exec.tier_for(&descriptor, &[Value::Number(1.0)], &heap);
        assert_eq!(state, PromotionState::Cold);
    }

    #[test]
    fn repeated_calls_promote_to_bytecode_and_compile_once() {
        let config = InterpreterConfig { warm_threshold: 1, hot_threshold: 1000, ..InterpreterConfig::default() };
        let exec = AdaptiveExecutor::new(&config);
        let body = AstNode::Block(
            vec![AstNode::Return(
                Some(Box::new(AstNode::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(AstNode::Identifier("x".into(), Span::default())),
                    right: Box::new(AstNode::Number(1.0, Span::default())),
                    span: Span::default(),
                })),
                Span::default(),
            )],
            Span::default(),
        );
        let descriptor = make_descriptor("inc", vec!["x"], body);
        let globals = Environment::new_global();
        let mut heap = Heap::new();
        let mut observer = NoopObserver;

        for _ in 0..3 {
            let state = exec.tier_for(&descriptor, &[Value::Number(1.0)], &heap);
            assert_ne!(state, PromotionState::Cold);
            let result = exec
                .run_promoted(&descriptor, &[Value::Number(1.0)], &globals, &mut heap, &mut observer, 0, state)
                .expect("body is pure arithmetic and should compile");
            assert_eq!(result.unwrap(), Value::Number(2.0));
        }
        assert!(descriptor.compiled.borrow().is_some());
    }
}
