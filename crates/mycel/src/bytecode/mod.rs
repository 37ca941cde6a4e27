//! Register bytecode engine: the second execution tier (spec.md §4.9).
//!
//! A call site promoted past the tree-walking tier gets its body compiled
//! once into a [`BytecodeFunction`] and re-executed by the register [`vm`]
//! on every subsequent call, skipping AST dispatch overhead entirely.

pub mod code;
pub mod compiler;
pub mod opcode;
pub mod vm;

pub use code::BytecodeFunction;
pub use compiler::{CompileError, Compiler};
pub use opcode::{Instruction, Opcode};
pub use vm::{run, FrameExit};
