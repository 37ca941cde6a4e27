//! Captures a guarded operation trace while the bytecode VM runs a hot
//! call site (spec.md §4.10).
//!
//! Recording is deliberately narrow: only register-to-register numeric
//! arithmetic is traced. Anything else (calls, container ops, string ops)
//! ends the trace — those loops stay on the bytecode tier, which is already
//! much faster than the tree-walker, rather than attempting to JIT
//! everything.

use crate::bytecode::Opcode;

/// A type assumption the trace depends on. If violated at replay time, the
/// adaptive executor deopts back to bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Register `reg` must hold `Value::Number` when the trace starts.
    IsNumber { reg: u8 },
}

/// One recorded operation. Registers here are indices into the trace's own
/// flat `f64` working set, not the VM's register file — the recorder
/// remaps VM registers to trace slots the first time it sees them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceOp {
    LoadConst { slot: u8, value: f64 },
    Add { dst: u8, a: u8, b: u8 },
    Sub { dst: u8, a: u8, b: u8 },
    Mul { dst: u8, a: u8, b: u8 },
    Div { dst: u8, a: u8, b: u8 },
}

#[derive(Debug, Clone)]
pub struct TraceRecording {
    pub guards: Vec<Guard>,
    pub ops: Vec<TraceOp>,
    /// Number of distinct trace slots in use — the caller allocates a flat
    /// `f64` buffer at least this long before replaying `ops`.
    pub slot_count: u8,
    /// Trace slot holding the loop's final result, read back into the VM
    /// register file after replay.
    pub result_slot: u8,
    pub result_vm_register: u8,
}

#[derive(Debug, Default)]
pub struct TraceRecorder {
    guards: Vec<Guard>,
    ops: Vec<TraceOp>,
    vm_to_slot: Vec<(u8, u8)>,
    next_slot: u8,
    aborted: bool,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_for(&mut self, vm_reg: u8) -> u8 {
        if let Some((_, slot)) = self.vm_to_slot.iter().find(|(r, _)| *r == vm_reg) {
            return *slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.vm_to_slot.push((vm_reg, slot));
        slot
    }

    pub fn guard_number(&mut self, vm_reg: u8) {
        let slot = self.slot_for(vm_reg);
        self.guards.push(Guard::IsNumber { reg: slot });
    }

    pub fn record_const(&mut self, vm_reg: u8, value: f64) {
        let slot = self.slot_for(vm_reg);
        self.ops.push(TraceOp::LoadConst { slot, value });
    }

    /// Records a VM register-to-register `Move` as a pure alias: `dst` reads
    /// back as whatever slot `src` already occupies, with no emitted op.
    pub fn record_move(&mut self, dst: u8, src: u8) {
        let slot = self.slot_for(src);
        if self.vm_to_slot.iter().any(|(r, _)| *r == dst) {
            return;
        }
        self.vm_to_slot.push((dst, slot));
    }

    pub fn record_binary(&mut self, op: Opcode, dst: u8, a: u8, b: u8) {
        let dst = self.slot_for(dst);
        let a = self.slot_for(a);
        let b = self.slot_for(b);
        let traced = match op {
            Opcode::Add => TraceOp::Add { dst, a, b },
            Opcode::Sub => TraceOp::Sub { dst, a, b },
            Opcode::Mul => TraceOp::Mul { dst, a, b },
            Opcode::Div => TraceOp::Div { dst, a, b },
            _ => {
                self.aborted = true;
                return;
            }
        };
        self.ops.push(traced);
    }

    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Finalizes the recording if it's non-empty and never aborted.
    pub fn finish(self, result_vm_register: u8) -> Option<TraceRecording> {
        if self.aborted || self.ops.is_empty() {
            return None;
        }
        let result_slot = self.vm_to_slot.iter().find(|(r, _)| *r == result_vm_register)?.1;
        let slot_count = self.next_slot;
        Some(TraceRecording { guards: self.guards, ops: self.ops, slot_count, result_slot, result_vm_register })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_a_simple_arithmetic_chain() {
        let mut rec = TraceRecorder::new();
        rec.guard_number(0);
        rec.guard_number(1);
        rec.record_binary(Opcode::Add, 2, 0, 1);
        let trace = rec.finish(2).unwrap();
        assert_eq!(trace.ops.len(), 1);
        assert_eq!(trace.guards.len(), 2);
    }

    #[test]
    fn unsupported_opcode_aborts_recording() {
        let mut rec = TraceRecorder::new();
        rec.record_binary(Opcode::Call, 2, 0, 1);
        assert!(rec.finish(2).is_none());
    }
}
