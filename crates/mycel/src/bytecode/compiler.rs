//! AST → register bytecode compiler (spec.md §4.9).
//!
//! Only compiles the subset of the language that benefits most from a hot
//! loop: arithmetic, comparisons, control flow, array literals/indexing,
//! member access, and calls. Anything the compiler doesn't recognize —
//! closures over captured mutable locals, `HashMap`/`Set` literals with
//! elements, `spore`, `class`, `async`/`await`, metaprogramming forms —
//! returns [`CompileError::Unsupported`], and the call site simply stays on
//! the tree-walking tier forever (spec.md §4.9, §4.12; scope decision
//! recorded in DESIGN.md).

use std::rc::Rc;

use crate::ast::{AssignTarget, AstNode, BinaryOp, Parameter, UnaryOp};
use crate::bytecode::code::BytecodeFunction;
use crate::bytecode::opcode::{Instruction, Opcode};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Unsupported(String),
    TooManyRegisters,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "unsupported for bytecode compilation: {what}"),
            Self::TooManyRegisters => write!(f, "function needs more than 256 live registers"),
        }
    }
}

type CResult<T> = Result<T, CompileError>;

struct LoopContext {
    break_jumps: Vec<usize>,
    continue_target: usize,
}

pub struct Compiler {
    func: BytecodeFunction,
    locals: Vec<(String, u8)>,
    scope_starts: Vec<usize>,
    next_register: u8,
    loops: Vec<LoopContext>,
}

impl Compiler {
    pub fn compile_function(name: &str, params: &[Parameter], body: &AstNode, source: Rc<AstNode>) -> CResult<BytecodeFunction> {
        let mut compiler = Self {
            func: BytecodeFunction::new(name, source),
            locals: Vec::new(),
            scope_starts: Vec::new(),
            next_register: 0,
            loops: Vec::new(),
        };
        compiler.func.param_count = u8::try_from(params.len()).map_err(|_| CompileError::TooManyRegisters)?;
        for param in params {
            compiler.declare_local(&param.name)?;
        }
        compiler.block(body)?;
        compiler.emit(Instruction::new(Opcode::ReturnNull));
        compiler.func.num_registers = compiler.next_register;
        Ok(compiler.func)
    }

    fn emit(&mut self, instr: Instruction) -> usize {
        self.func.instructions.push(instr);
        self.func.lines.push(0);
        self.func.instructions.len() - 1
    }

    fn patch_jump_to_here(&mut self, at: usize) {
        let here = self.func.instructions.len() as i32;
        self.func.instructions[at].imm = here - at as i32;
    }

    fn alloc_register(&mut self) -> CResult<u8> {
        let r = self.next_register;
        self.next_register = self.next_register.checked_add(1).ok_or(CompileError::TooManyRegisters)?;
        Ok(r)
    }

    fn declare_local(&mut self, name: &str) -> CResult<u8> {
        let r = self.alloc_register()?;
        self.locals.push((name.to_owned(), r));
        Ok(r)
    }

    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals.iter().rev().find(|(n, _)| n == name).map(|(_, r)| *r)
    }

    fn push_scope(&mut self) {
        self.scope_starts.push(self.locals.len());
    }

    fn pop_scope(&mut self) {
        if let Some(start) = self.scope_starts.pop() {
            self.locals.truncate(start);
        }
    }

    fn unsupported(what: impl Into<String>) -> CompileError {
        CompileError::Unsupported(what.into())
    }

    // ---- statements ----

    fn block(&mut self, node: &AstNode) -> CResult<()> {
        match node {
            AstNode::Block(stmts, _) => {
                self.push_scope();
                for stmt in stmts {
                    self.statement(stmt)?;
                }
                self.pop_scope();
                Ok(())
            }
            other => self.statement(other),
        }
    }

    fn statement(&mut self, node: &AstNode) -> CResult<()> {
        match node {
            AstNode::VariableDeclaration { name, initializer, .. } => {
                let reg = self.declare_local(name)?;
                if let Some(init) = initializer {
                    self.expression_into(init, reg)?;
                } else {
                    self.emit(Instruction::new(Opcode::LoadNull).a(reg));
                }
                Ok(())
            }
            AstNode::Assignment { target, value, .. } => self.assignment(target, value),
            AstNode::If { condition, then_branch, elseif_branches, else_branch, .. } => {
                self.if_statement(condition, then_branch, elseif_branches, else_branch.as_deref())
            }
            AstNode::While { condition, body, .. } => self.while_statement(condition, body),
            AstNode::For { iterator_name, collection, body, .. } => self.for_statement(iterator_name, collection, body),
            AstNode::Return(value, _) => {
                if let Some(v) = value {
                    let r = self.alloc_register()?;
                    self.expression_into(v, r)?;
                    self.emit(Instruction::new(Opcode::Return).a(r));
                } else {
                    self.emit(Instruction::new(Opcode::ReturnNull));
                }
                Ok(())
            }
            AstNode::Break(_) => {
                let idx = self.emit(Instruction::new(Opcode::Jump));
                let ctx = self.loops.last_mut().ok_or_else(|| Self::unsupported("break outside loop"))?;
                ctx.break_jumps.push(idx);
                Ok(())
            }
            AstNode::Continue(_) => {
                let target = self.loops.last().ok_or_else(|| Self::unsupported("continue outside loop"))?.continue_target;
                let idx = self.emit(Instruction::new(Opcode::Jump));
                self.func.instructions[idx].imm = target as i32 - idx as i32;
                Ok(())
            }
            AstNode::Throw(value, _) => {
                let r = self.alloc_register()?;
                self.expression_into(value, r)?;
                self.emit(Instruction::new(Opcode::Throw).a(r));
                Ok(())
            }
            AstNode::Block(..) => self.block(node),
            AstNode::Error { message, .. } => Err(Self::unsupported(format!("parse error node: {message}"))),
            other => {
                let r = self.alloc_register()?;
                self.expression_into(other, r)
            }
        }
    }

    fn assignment(&mut self, target: &AssignTarget, value: &AstNode) -> CResult<()> {
        match target {
            AssignTarget::Identifier(name) => {
                let reg = self.resolve_local(name).ok_or_else(|| Self::unsupported("assignment to a non-local (global/closure) binding"))?;
                self.expression_into(value, reg)
            }
            AssignTarget::Index { collection, index } => {
                let coll_r = self.alloc_register()?;
                self.expression_into(collection, coll_r)?;
                let idx_r = self.alloc_register()?;
                self.expression_into(index, idx_r)?;
                let val_r = self.alloc_register()?;
                self.expression_into(value, val_r)?;
                self.emit(Instruction::new(Opcode::ArraySet).a(coll_r).b(idx_r).c(val_r));
                Ok(())
            }
            AssignTarget::Member { object, property } => {
                let obj_r = self.alloc_register()?;
                self.expression_into(object, obj_r)?;
                let val_r = self.alloc_register()?;
                self.expression_into(value, val_r)?;
                let name_idx = self.func.add_constant(Value::Str(property.as_str().into()));
                self.emit(Instruction::new(Opcode::MemberSet).a(obj_r).b(val_r).imm(name_idx));
                Ok(())
            }
        }
    }

    fn if_statement(
        &mut self,
        condition: &AstNode,
        then_branch: &AstNode,
        elseif_branches: &[(AstNode, AstNode)],
        else_branch: Option<&AstNode>,
    ) -> CResult<()> {
        let cond_r = self.alloc_register()?;
        self.expression_into(condition, cond_r)?;
        let jf = self.emit(Instruction::new(Opcode::JumpIfFalse).a(cond_r));
        self.block(then_branch)?;
        let jend = self.emit(Instruction::new(Opcode::Jump));
        self.patch_jump_to_here(jf);

        if let Some((first_cond, first_body)) = elseif_branches.first() {
            self.if_statement(first_cond, first_body, &elseif_branches[1..], else_branch)?;
        } else if let Some(else_b) = else_branch {
            self.block(else_b)?;
        }
        self.patch_jump_to_here(jend);
        Ok(())
    }

    fn while_statement(&mut self, condition: &AstNode, body: &AstNode) -> CResult<()> {
        let loop_start = self.func.instructions.len();
        let cond_r = self.alloc_register()?;
        self.expression_into(condition, cond_r)?;
        let jf = self.emit(Instruction::new(Opcode::JumpIfFalse).a(cond_r));
        self.loops.push(LoopContext { break_jumps: Vec::new(), continue_target: loop_start });
        self.block(body)?;
        let back = self.emit(Instruction::new(Opcode::Jump));
        self.func.instructions[back].imm = loop_start as i32 - back as i32;
        self.patch_jump_to_here(jf);
        let ctx = self.loops.pop().expect("pushed above");
        for j in ctx.break_jumps {
            self.patch_jump_to_here(j);
        }
        Ok(())
    }

    fn for_statement(&mut self, iterator_name: &str, collection: &AstNode, body: &AstNode) -> CResult<()> {
        let coll_r = self.alloc_register()?;
        self.expression_into(collection, coll_r)?;
        let iter_r = self.alloc_register()?;
        self.emit(Instruction::new(Opcode::ForIterInit).a(iter_r).b(coll_r));

        self.push_scope();
        let item_r = self.declare_local(iterator_name)?;
        let loop_start = self.func.instructions.len();
        let jend = self.emit(Instruction::new(Opcode::ForIterNext).a(iter_r).b(item_r));
        self.loops.push(LoopContext { break_jumps: Vec::new(), continue_target: 0 });
        self.block(body)?;
        let continue_target = self.func.instructions.len();
        let back = self.emit(Instruction::new(Opcode::Jump));
        self.func.instructions[back].imm = loop_start as i32 - back as i32;
        self.patch_jump_to_here(jend);
        let mut ctx = self.loops.pop().expect("pushed above");
        ctx.continue_target = continue_target;
        for j in ctx.break_jumps {
            self.patch_jump_to_here(j);
        }
        self.pop_scope();
        Ok(())
    }

    // ---- expressions ----

    fn expression_into(&mut self, node: &AstNode, dest: u8) -> CResult<()> {
        match node {
            AstNode::Number(n, _) => {
                let idx = self.func.add_constant(Value::Number(*n));
                self.emit(Instruction::new(Opcode::LoadConst).a(dest).imm(idx));
            }
            AstNode::Str(s, _) => {
                let idx = self.func.add_constant(Value::Str(s.as_str().into()));
                self.emit(Instruction::new(Opcode::LoadConst).a(dest).imm(idx));
            }
            AstNode::Bool(true, _) => {
                self.emit(Instruction::new(Opcode::LoadTrue).a(dest));
            }
            AstNode::Bool(false, _) => {
                self.emit(Instruction::new(Opcode::LoadFalse).a(dest));
            }
            AstNode::Null(_) => {
                self.emit(Instruction::new(Opcode::LoadNull).a(dest));
            }
            AstNode::Identifier(name, _) => {
                if let Some(src) = self.resolve_local(name) {
                    self.emit(Instruction::new(Opcode::Move).a(dest).b(src));
                } else {
                    let idx = self.func.add_constant(Value::Str(name.as_str().into()));
                    self.emit(Instruction::new(Opcode::GetGlobal).a(dest).imm(idx));
                }
            }
            AstNode::Binary { op, left, right, .. } => self.binary_into(*op, left, right, dest)?,
            AstNode::Unary { op, operand, .. } => {
                self.expression_into(operand, dest)?;
                let opcode = match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::BitNot => Opcode::BitNot,
                    UnaryOp::Plus => return Ok(()),
                    UnaryOp::Deref | UnaryOp::Ref => return Err(Self::unsupported("pointer operators")),
                };
                self.emit(Instruction::new(opcode).a(dest).b(dest));
            }
            AstNode::ArrayLiteral(elements, _) => {
                self.emit(Instruction::new(Opcode::NewArray).a(dest));
                for elem in elements {
                    let r = self.alloc_register()?;
                    self.expression_into(elem, r)?;
                    self.emit(Instruction::new(Opcode::ArrayPush).a(dest).b(r));
                }
            }
            AstNode::ArrayAccess { collection, index, .. } => {
                self.expression_into(collection, dest)?;
                let idx_r = self.alloc_register()?;
                self.expression_into(index, idx_r)?;
                self.emit(Instruction::new(Opcode::ArrayGet).a(dest).b(dest).c(idx_r));
            }
            AstNode::MemberAccess { object, property, .. } => {
                self.expression_into(object, dest)?;
                let name_idx = self.func.add_constant(Value::Str(property.as_str().into()));
                self.emit(Instruction::new(Opcode::MemberGet).a(dest).b(dest).imm(name_idx));
            }
            AstNode::Call { callee, args, .. } => {
                let callee_r = self.alloc_register()?;
                self.expression_into(callee, callee_r)?;
                let first_arg_r = self.next_register;
                for arg in args {
                    let r = self.alloc_register()?;
                    self.expression_into(arg, r)?;
                }
                self.emit(
                    Instruction::new(Opcode::Call)
                        .a(dest)
                        .b(callee_r)
                        .c(u8::try_from(args.len()).map_err(|_| CompileError::TooManyRegisters)?)
                        .imm(i32::from(first_arg_r)),
                );
            }
            other => return Err(Self::unsupported(format!("{other:?}"))),
        }
        Ok(())
    }

    fn binary_into(&mut self, op: BinaryOp, left: &AstNode, right: &AstNode, dest: u8) -> CResult<()> {
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.short_circuit_into(op, left, right, dest);
        }
        self.expression_into(left, dest)?;
        let right_r = self.alloc_register()?;
        self.expression_into(right, right_r)?;
        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::Pow => Opcode::Pow,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::NotEq => Opcode::NotEq,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::LtEq => Opcode::LtEq,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::GtEq => Opcode::GtEq,
            BinaryOp::BitAnd => Opcode::BitAnd,
            BinaryOp::BitOr => Opcode::BitOr,
            BinaryOp::BitXor | BinaryOp::Xor => Opcode::BitXor,
            BinaryOp::Shl => Opcode::Shl,
            BinaryOp::Shr => Opcode::Shr,
            BinaryOp::Range | BinaryOp::RangeInclusive | BinaryOp::RangeStep => {
                return Err(Self::unsupported("range expressions outside `for`"));
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        self.emit(Instruction::new(opcode).a(dest).b(dest).c(right_r));
        Ok(())
    }

    fn short_circuit_into(&mut self, op: BinaryOp, left: &AstNode, right: &AstNode, dest: u8) -> CResult<()> {
        self.expression_into(left, dest)?;
        let jump_op = if op == BinaryOp::And { Opcode::JumpIfFalse } else { Opcode::JumpIfTrue };
        let skip = self.emit(Instruction::new(jump_op).a(dest));
        self.expression_into(right, dest)?;
        self.patch_jump_to_here(skip);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn num(n: f64) -> AstNode {
        AstNode::Number(n, Span::default())
    }

    #[test]
    fn compiles_simple_arithmetic_function() {
        let body = AstNode::Block(
            vec![AstNode::Return(
                Some(Box::new(AstNode::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(num(1.0)),
                    right: Box::new(num(2.0)),
                    span: Span::default(),
                })),
                Span::default(),
            )],
            Span::default(),
        );
        let compiled = Compiler::compile_function("f", &[], &body, Rc::new(body.clone())).unwrap();
        assert!(compiled.instructions.iter().any(|i| i.op == Opcode::Add));
        assert!(compiled.instructions.iter().any(|i| i.op == Opcode::Return));
    }

    #[test]
    fn rejects_closure_assignment_to_non_local() {
        let body = AstNode::Block(
            vec![AstNode::Assignment {
                target: AssignTarget::Identifier("outer".into()),
                value: Box::new(num(1.0)),
                span: Span::default(),
            }],
            Span::default(),
        );
        let err = Compiler::compile_function("f", &[], &body, Rc::new(body.clone())).unwrap_err();
        assert!(matches!(err, CompileError::Unsupported(_)));
    }
}
