//! LICM/CSE/DCE passes over a recorded trace (spec.md §4.10).
//!
//! Traces are straight-line code (no branches — by construction, a branch
//! ends recording), so "loop-invariant code motion" degenerates to constant
//! folding of `LoadConst`-only subexpressions, "common subexpression
//! elimination" to deduplicating identical arithmetic ops, and "dead code
//! elimination" to dropping ops whose result is never read again.

use std::collections::HashMap;

use crate::trace::recorder::{TraceOp, TraceRecording};

/// Runs constant folding, CSE, and DCE over `trace.ops` in place, returning
/// the optimized recording.
pub fn optimize(mut trace: TraceRecording) -> TraceRecording {
    constant_fold(&mut trace.ops);
    common_subexpression_eliminate(&mut trace.ops);
    dead_code_eliminate(&mut trace.ops, trace.result_slot);
    trace
}

fn constant_fold(ops: &mut Vec<TraceOp>) {
    let mut known_constants: HashMap<u8, f64> = HashMap::new();
    let mut folded = Vec::with_capacity(ops.len());
    for op in ops.drain(..) {
        match op {
            TraceOp::LoadConst { slot, value } => {
                known_constants.insert(slot, value);
                folded.push(op);
            }
            TraceOp::Add { dst, a, b } | TraceOp::Sub { dst, a, b } | TraceOp::Mul { dst, a, b } | TraceOp::Div { dst, a, b } => {
                if let (Some(&va), Some(&vb)) = (known_constants.get(&a), known_constants.get(&b)) {
                    let folded_value = match op {
                        TraceOp::Add { .. } => va + vb,
                        TraceOp::Sub { .. } => va - vb,
                        TraceOp::Mul { .. } => va * vb,
                        TraceOp::Div { .. } => va / vb,
                        _ => unreachable!(),
                    };
                    known_constants.insert(dst, folded_value);
                    folded.push(TraceOp::LoadConst { slot: dst, value: folded_value });
                } else {
                    known_constants.remove(&dst);
                    folded.push(op);
                }
            }
        }
    }
    *ops = folded;
}

fn common_subexpression_eliminate(ops: &mut Vec<TraceOp>) {
    let mut seen: HashMap<(u8, u8, u8), u8> = HashMap::new();
    let mut aliases: HashMap<u8, u8> = HashMap::new();
    let mut result = Vec::with_capacity(ops.len());
    let resolve = |aliases: &HashMap<u8, u8>, slot: u8| *aliases.get(&slot).unwrap_or(&slot);

    for op in ops.drain(..) {
        let rewritten = match op {
            TraceOp::LoadConst { .. } => op,
            TraceOp::Add { dst, a, b } => TraceOp::Add { dst, a: resolve(&aliases, a), b: resolve(&aliases, b) },
            TraceOp::Sub { dst, a, b } => TraceOp::Sub { dst, a: resolve(&aliases, a), b: resolve(&aliases, b) },
            TraceOp::Mul { dst, a, b } => TraceOp::Mul { dst, a: resolve(&aliases, a), b: resolve(&aliases, b) },
            TraceOp::Div { dst, a, b } => TraceOp::Div { dst, a: resolve(&aliases, a), b: resolve(&aliases, b) },
        };
        let key = match rewritten {
            TraceOp::Add { a, b, .. } => Some((0u8, a, b)),
            TraceOp::Sub { a, b, .. } => Some((1u8, a, b)),
            TraceOp::Mul { a, b, .. } => Some((2u8, a, b)),
            TraceOp::Div { a, b, .. } => Some((3u8, a, b)),
            TraceOp::LoadConst { .. } => None,
        };
        if let Some(key) = key {
            if let Some(&existing_dst) = seen.get(&key) {
                let dst = match rewritten {
                    TraceOp::Add { dst, .. } | TraceOp::Sub { dst, .. } | TraceOp::Mul { dst, .. } | TraceOp::Div { dst, .. } => dst,
                    TraceOp::LoadConst { .. } => unreachable!(),
                };
                aliases.insert(dst, existing_dst);
                continue;
            }
            let dst = match rewritten {
                TraceOp::Add { dst, .. } | TraceOp::Sub { dst, .. } | TraceOp::Mul { dst, .. } | TraceOp::Div { dst, .. } => dst,
                TraceOp::LoadConst { .. } => unreachable!(),
            };
            seen.insert(key, dst);
        }
        result.push(rewritten);
    }
    *ops = result;
}

fn dead_code_eliminate(ops: &mut Vec<TraceOp>, result_slot: u8) {
    let mut live = std::collections::HashSet::new();
    live.insert(result_slot);
    let mut kept = Vec::with_capacity(ops.len());
    for op in ops.iter().rev() {
        let dst = match *op {
            TraceOp::LoadConst { slot, .. } => slot,
            TraceOp::Add { dst, .. } | TraceOp::Sub { dst, .. } | TraceOp::Mul { dst, .. } | TraceOp::Div { dst, .. } => dst,
        };
        if !live.contains(&dst) {
            continue;
        }
        if let TraceOp::Add { a, b, .. } | TraceOp::Sub { a, b, .. } | TraceOp::Mul { a, b, .. } | TraceOp::Div { a, b, .. } = *op {
            live.insert(a);
            live.insert(b);
        }
        kept.push(*op);
    }
    kept.reverse();
    *ops = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::recorder::Guard;

    fn rec(ops: Vec<TraceOp>, result_slot: u8) -> TraceRecording {
        TraceRecording { guards: vec![Guard::IsNumber { reg: 0 }], ops, slot_count: 16, result_slot, result_vm_register: 0 }
    }

    #[test]
    fn folds_constant_arithmetic() {
        let trace = rec(vec![TraceOp::LoadConst { slot: 0, value: 2.0 }, TraceOp::LoadConst { slot: 1, value: 3.0 }, TraceOp::Add { dst: 2, a: 0, b: 1 }], 2);
        let optimized = optimize(trace);
        assert!(optimized.ops.iter().any(|op| matches!(op, TraceOp::LoadConst { slot: 2, value } if (*value - 5.0).abs() < f64::EPSILON)));
    }

    #[test]
    fn dead_code_is_dropped() {
        let trace = rec(
            vec![
                TraceOp::LoadConst { slot: 0, value: 1.0 },
                TraceOp::LoadConst { slot: 1, value: 2.0 },
                TraceOp::Add { dst: 3, a: 0, b: 1 },
                TraceOp::LoadConst { slot: 9, value: 99.0 },
            ],
            3,
        );
        let optimized = optimize(trace);
        assert!(!optimized.ops.iter().any(|op| matches!(op, TraceOp::LoadConst { slot: 9, .. })));
    }
}
