//! Execution observation hooks for the bytecode VM and adaptive tier system.
//!
//! Adapted from the teacher's `VmTracer` pattern: a trait with all-default
//! (no-op) methods, so the production path ([`NoopObserver`]) monomorphizes
//! away to nothing, while alternative implementations can watch instruction
//! dispatch, tier promotions, and deoptimizations for debugging, profiling,
//! or coverage.

use std::collections::HashMap;
use std::fmt;

use crate::bytecode::Opcode;

/// A single observed event, used by [`RecordingObserver`] to capture a full
/// execution trace for post-mortem inspection.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Instruction { ip: usize, opcode: Opcode },
    Call { function_name: Option<String>, depth: usize },
    Return { depth: usize },
    Promoted { site: usize, from_tier: &'static str, to_tier: &'static str },
    Deoptimized { site: usize, reason: String },
}

/// Hook points into VM and adaptive-executor activity. All methods default to
/// no-ops; implement only the ones you need. The VM and `AdaptiveExecutor`
/// carry this behind a type parameter so [`NoopObserver`] costs nothing in
/// the production build (spec.md's performance goals rule out a trait object
/// on the hot instruction-dispatch path).
pub trait VmObserver: fmt::Debug {
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {}

    #[inline(always)]
    fn on_call(&mut self, _function_name: Option<&str>, _depth: usize) {}

    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_promotion(&mut self, _site: usize, _from_tier: &'static str, _to_tier: &'static str) {}

    #[inline(always)]
    fn on_deopt(&mut self, _site: usize, _reason: &str) {}
}

/// Production default: all hooks compile away.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl VmObserver for NoopObserver {}

/// Writes a short line to stderr for every call/return/promotion/deopt.
/// Skips per-instruction logging (too noisy to be useful interactively).
#[derive(Debug, Default)]
pub struct StderrObserver {
    depth: usize,
}

impl VmObserver for StderrObserver {
    fn on_call(&mut self, function_name: Option<&str>, depth: usize) {
        self.depth = depth;
        eprintln!("{}call {}", "  ".repeat(depth), function_name.unwrap_or("<anonymous>"));
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("{}return", "  ".repeat(depth));
    }

    fn on_promotion(&mut self, site: usize, from_tier: &'static str, to_tier: &'static str) {
        eprintln!("promote site#{site}: {from_tier} -> {to_tier}");
    }

    fn on_deopt(&mut self, site: usize, reason: &str) {
        eprintln!("deopt site#{site}: {reason}");
    }
}

/// Counts opcode frequency and tracks max call depth — cheap enough to run
/// continuously, useful for answering "where does time go".
#[derive(Debug, Default)]
pub struct ProfilingObserver {
    pub opcode_counts: HashMap<Opcode, u64>,
    pub max_call_depth: usize,
    pub promotions: u64,
    pub deopts: u64,
}

impl VmObserver for ProfilingObserver {
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize, frame_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.max_call_depth = self.max_call_depth.max(frame_depth);
    }

    fn on_promotion(&mut self, _site: usize, _from_tier: &'static str, _to_tier: &'static str) {
        self.promotions += 1;
    }

    fn on_deopt(&mut self, _site: usize, _reason: &str) {
        self.deopts += 1;
    }
}

impl ProfilingObserver {
    pub fn report(&self) -> String {
        let mut lines = vec![format!("max call depth: {}", self.max_call_depth), format!("promotions: {}", self.promotions), format!("deopts: {}", self.deopts)];
        let mut counts: Vec<_> = self.opcode_counts.iter().collect();
        counts.sort_by_key(|(_, n)| std::cmp::Reverse(**n));
        for (op, n) in counts.into_iter().take(10) {
            lines.push(format!("{op:?}: {n}"));
        }
        lines.join("\n")
    }
}

/// Records which instruction offsets were ever reached, for coverage
/// reporting.
#[derive(Debug, Default)]
pub struct CoverageObserver {
    pub reached: std::collections::HashSet<usize>,
}

impl VmObserver for CoverageObserver {
    fn on_instruction(&mut self, ip: usize, _opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        self.reached.insert(ip);
    }
}

/// Records every event verbatim, for deterministic replay or debugging a
/// single failing run.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<ObserverEvent>,
}

impl VmObserver for RecordingObserver {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, _stack_depth: usize, _frame_depth: usize) {
        self.events.push(ObserverEvent::Instruction { ip, opcode });
    }

    fn on_call(&mut self, function_name: Option<&str>, depth: usize) {
        self.events.push(ObserverEvent::Call { function_name: function_name.map(str::to_owned), depth });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(ObserverEvent::Return { depth });
    }

    fn on_promotion(&mut self, site: usize, from_tier: &'static str, to_tier: &'static str) {
        self.events.push(ObserverEvent::Promoted { site, from_tier, to_tier });
    }

    fn on_deopt(&mut self, site: usize, reason: &str) {
        self.events.push(ObserverEvent::Deoptimized { site, reason: reason.to_owned() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiling_observer_counts_opcodes() {
        let mut obs = ProfilingObserver::default();
        obs.on_instruction(0, Opcode::Nop, 0, 1);
        obs.on_instruction(4, Opcode::Nop, 0, 1);
        assert_eq!(obs.opcode_counts[&Opcode::Nop], 2);
    }

    #[test]
    fn recording_observer_captures_call_and_return() {
        let mut obs = RecordingObserver::default();
        obs.on_call(Some("main"), 1);
        obs.on_return(1);
        assert_eq!(obs.events.len(), 2);
    }
}
