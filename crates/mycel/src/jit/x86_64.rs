//! A minimal x86-64 code generator for optimized numeric traces
//! (spec.md §4.11).
//!
//! Scope is deliberately narrow: the emitted function takes one pointer
//! argument (`*mut f64`, the trace's flat slot buffer, passed in `rdi` per
//! the System V AMD64 ABI) and threads every operation through `xmm0`/`xmm1`,
//! reloading operands from and storing results back to the slot buffer on
//! every instruction. This is a "load-operate-store" baseline codegen, not a
//! register allocator over the whole trace — correct and simple, at the cost
//! of extra memory traffic a real register allocator would eliminate (see
//! DESIGN.md).

use crate::trace::recorder::TraceOp;

/// Emits a `fn(*mut f64)` body: for each `TraceOp`, load operands from the
/// slot buffer into `xmm0`/`xmm1`, compute, and store the result back.
/// Returns `None` if a slot index needs a displacement this encoder's `i8`
/// `disp8` form can't reach (more than ~16 live trace slots) — the caller
/// treats that the same as any other codegen failure and keeps running the
/// bytecode tier. A `disp32` form would lift this, at the cost of 3 more
/// bytes per memory operand; not worth it for traces this small.
pub fn emit(ops: &[TraceOp]) -> Option<Vec<u8>> {
    let mut buf = Vec::with_capacity(ops.len() * 24 + 1);
    for op in ops {
        let (opcode_byte, dst, a, b) = match *op {
            TraceOp::LoadConst { slot, value } => {
                emit_load_const(&mut buf, slot, value)?;
                continue;
            }
            TraceOp::Add { dst, a, b } => (0x58u8, dst, a, b),
            TraceOp::Sub { dst, a, b } => (0x5C, dst, a, b),
            TraceOp::Mul { dst, a, b } => (0x59, dst, a, b),
            TraceOp::Div { dst, a, b } => (0x5E, dst, a, b),
        };
        load_slot(&mut buf, 0, a)?; // movsd xmm0, [rdi + a*8]
        load_slot(&mut buf, 1, b)?; // movsd xmm1, [rdi + b*8]
        buf.extend_from_slice(&[0xF2, 0x0F, opcode_byte, modrm_reg_reg(0, 1)]); // opsd xmm0, xmm1
        store_slot(&mut buf, 0, dst)?; // movsd [rdi + dst*8], xmm0
    }
    buf.push(0xC3); // ret
    Some(buf)
}

fn disp8(slot: u8) -> Option<i8> {
    i8::try_from(i32::from(slot) * 8).ok()
}

fn modrm_reg_reg(reg: u8, rm: u8) -> u8 {
    0b1100_0000 | (reg << 3) | rm
}

fn modrm_disp8_rdi(reg: u8) -> u8 {
    0b0100_0000 | (reg << 3) | 0b111 // rm = rdi (111)
}

fn load_slot(buf: &mut Vec<u8>, xmm: u8, slot: u8) -> Option<()> {
    let d = disp8(slot)?;
    buf.extend_from_slice(&[0xF2, 0x0F, 0x10, modrm_disp8_rdi(xmm), d as u8]);
    Some(())
}

fn store_slot(buf: &mut Vec<u8>, xmm: u8, slot: u8) -> Option<()> {
    let d = disp8(slot)?;
    buf.extend_from_slice(&[0xF2, 0x0F, 0x11, modrm_disp8_rdi(xmm), d as u8]);
    Some(())
}

fn emit_load_const(buf: &mut Vec<u8>, slot: u8, value: f64) -> Option<()> {
    // movabs rax, imm64
    buf.extend_from_slice(&[0x48, 0xB8]);
    buf.extend_from_slice(&value.to_bits().to_le_bytes());
    // movq xmm0, rax
    buf.extend_from_slice(&[0x66, 0x48, 0x0F, 0x6E, modrm_reg_reg(0, 0)]);
    store_slot(buf, 0, slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_nonempty_code_for_a_single_add() {
        let ops = vec![TraceOp::LoadConst { slot: 0, value: 2.0 }, TraceOp::LoadConst { slot: 1, value: 3.0 }, TraceOp::Add { dst: 2, a: 0, b: 1 }];
        let code = emit(&ops).unwrap();
        assert_eq!(*code.last().unwrap(), 0xC3);
        assert!(code.len() > 10);
    }

    #[test]
    fn rejects_slots_outside_the_displacement_range() {
        let ops = vec![TraceOp::Add { dst: 200, a: 0, b: 1 }];
        assert!(emit(&ops).is_none());
    }
}
