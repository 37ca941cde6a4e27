//! ARM64 codegen stub.
//!
//! Not implemented. Every call returns `None`; whatever drives the JIT
//! pipeline (see [`crate::adaptive`]) treats a `None` from any architecture
//! backend exactly like a failed x86-64 codegen attempt: the call site stays
//! on the bytecode tier rather than erroring. `original_source`'s own
//! optimization-tier files are equally stubs there, so there is no reference
//! implementation to port for this architecture.

use crate::trace::recorder::TraceOp;

pub fn emit(_ops: &[TraceOp]) -> Option<Vec<u8>> {
    None
}
