//! Register VM execution loop (spec.md §4.9).

use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::ast::Span;
use crate::bytecode::code::BytecodeFunction;
use crate::bytecode::opcode::Opcode;
use crate::env::Environment;
use crate::errors::{ErrorCode, ErrorInfo};
use crate::heap::{Heap, HeapData, HeapId};
use crate::observer::VmObserver;
use crate::value::Value;

enum IterState {
    Range { current: f64, end: f64, step: f64, inclusive: bool },
    Array { id: HeapId, idx: usize },
}

impl IterState {
    fn next(&mut self, heap: &Heap) -> Option<Value> {
        match self {
            Self::Range { current, end, step, inclusive } => {
                let done = if *step > 0.0 {
                    if *inclusive { *current > *end } else { *current >= *end }
                } else if *inclusive {
                    *current < *end
                } else {
                    *current <= *end
                };
                if done {
                    return None;
                }
                let value = *current;
                *current += *step;
                Some(Value::Number(value))
            }
            Self::Array { id, idx } => {
                let Some(HeapData::Array(items)) = heap.get(*id) else { return None };
                let value = items.get(*idx).cloned()?;
                *idx += 1;
                Some(value)
            }
        }
    }
}

/// What popped this frame's execution (used by the adaptive executor to
/// decide whether a deopt occurred).
pub enum FrameExit {
    Returned(Value),
    Threw(ErrorInfo),
}

/// A call frame's register file. Register indices are a single byte
/// (spec.md §4.9 "256 registers"), so most compiled bodies need only a
/// handful; inline storage for the common case avoids a heap allocation on
/// every call, falling back to the heap only for unusually register-heavy
/// functions.
type RegisterFile = SmallVec<[Value; 16]>;

/// Runs `func` to completion against a fresh register file, returning its
/// result or the error it threw. `globals` resolves names the compiler
/// couldn't turn into a local register (module-level bindings, builtins).
pub fn run(
    func: &BytecodeFunction,
    args: &[Value],
    globals: &Environment,
    heap: &mut Heap,
    observer: &mut dyn VmObserver,
    call_depth: usize,
    max_call_depth: usize,
) -> FrameExit {
    if call_depth > max_call_depth {
        return FrameExit::Threw(ErrorInfo::new(ErrorCode::RuntimeStackOverflow, "stack overflow", Span::default()));
    }
    let mut registers: RegisterFile = smallvec::smallvec![Value::Null; func.num_registers as usize];
    for (i, arg) in args.iter().enumerate().take(func.param_count as usize) {
        registers[i] = arg.clone();
    }
    let mut iters: HashMap<u8, IterState> = HashMap::new();
    observer.on_call(Some(&func.name), call_depth);

    let mut ip = 0usize;
    while ip < func.instructions.len() {
        let instr = func.instructions[ip];
        observer.on_instruction(ip, instr.op, 0, call_depth);
        match instr.op {
            Opcode::Nop => {}
            Opcode::LoadConst => registers[instr.a as usize] = func.constants[instr.imm as usize].clone(),
            Opcode::LoadNull => registers[instr.a as usize] = Value::Null,
            Opcode::LoadTrue => registers[instr.a as usize] = Value::Bool(true),
            Opcode::LoadFalse => registers[instr.a as usize] = Value::Bool(false),
            Opcode::Move => registers[instr.a as usize] = registers[instr.b as usize].clone(),

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow => {
                match arithmetic(instr.op, &registers[instr.b as usize], &registers[instr.c as usize], heap) {
                    Ok(v) => registers[instr.a as usize] = v,
                    Err(e) => return FrameExit::Threw(e),
                }
            }
            Opcode::Neg => match &registers[instr.b as usize] {
                Value::Number(n) => registers[instr.a as usize] = Value::Number(-n),
                other => return FrameExit::Threw(type_error(other, "Number", "unary -")),
            },
            Opcode::Not => {
                let truthy = registers[instr.b as usize].is_truthy(heap);
                registers[instr.a as usize] = Value::Bool(!truthy);
            }
            Opcode::BitNot => match &registers[instr.b as usize] {
                Value::Number(n) => registers[instr.a as usize] = Value::Number(!(*n as i64) as f64),
                other => return FrameExit::Threw(type_error(other, "Number", "unary ~")),
            },

            Opcode::Eq => registers[instr.a as usize] = Value::Bool(registers[instr.b as usize].structural_eq(&registers[instr.c as usize])),
            Opcode::NotEq => registers[instr.a as usize] = Value::Bool(!registers[instr.b as usize].structural_eq(&registers[instr.c as usize])),
            Opcode::Lt | Opcode::LtEq | Opcode::Gt | Opcode::GtEq => {
                match compare(instr.op, &registers[instr.b as usize], &registers[instr.c as usize]) {
                    Ok(v) => registers[instr.a as usize] = Value::Bool(v),
                    Err(e) => return FrameExit::Threw(e),
                }
            }

            Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor | Opcode::Shl | Opcode::Shr => {
                match bitwise(instr.op, &registers[instr.b as usize], &registers[instr.c as usize]) {
                    Ok(v) => registers[instr.a as usize] = v,
                    Err(e) => return FrameExit::Threw(e),
                }
            }

            Opcode::Jump => {
                ip = (ip as i32 + instr.imm) as usize;
                continue;
            }
            Opcode::JumpIfFalse => {
                if !registers[instr.a as usize].is_truthy(heap) {
                    ip = (ip as i32 + instr.imm) as usize;
                    continue;
                }
            }
            Opcode::JumpIfTrue => {
                if registers[instr.a as usize].is_truthy(heap) {
                    ip = (ip as i32 + instr.imm) as usize;
                    continue;
                }
            }

            Opcode::GetGlobal => {
                let Value::Str(name) = &func.constants[instr.imm as usize] else { unreachable!("compiler always emits a Str constant here") };
                registers[instr.a as usize] = globals.get(name).unwrap_or(Value::Null);
            }
            Opcode::SetGlobal | Opcode::DeclareGlobal => {
                let Value::Str(name) = &func.constants[instr.imm as usize] else { unreachable!("compiler always emits a Str constant here") };
                globals.define(name.to_string(), registers[instr.a as usize].clone(), true);
            }

            Opcode::NewArray => {
                let id = heap.alloc(HeapData::Array(Vec::new()));
                registers[instr.a as usize] = Value::Array(id);
            }
            Opcode::NewHashMap => {
                let id = heap.alloc(HeapData::HashMap(Default::default()));
                registers[instr.a as usize] = Value::HashMap(id);
            }
            Opcode::NewSet => {
                let id = heap.alloc(HeapData::Set(Default::default()));
                registers[instr.a as usize] = Value::Set(id);
            }
            Opcode::ArrayPush => {
                let value = registers[instr.b as usize].clone();
                let Value::Array(id) = &registers[instr.a as usize] else { unreachable!("compiler only emits ArrayPush after NewArray") };
                if let Some(HeapData::Array(items)) = heap.get_mut(*id) {
                    items.push(value);
                }
            }
            Opcode::ArrayGet => match index_get(&registers[instr.b as usize], &registers[instr.c as usize], heap) {
                Ok(v) => registers[instr.a as usize] = v,
                Err(e) => return FrameExit::Threw(e),
            },
            Opcode::ArraySet => {
                let value = registers[instr.c as usize].clone();
                if let Err(e) = index_set(&registers[instr.a as usize], &registers[instr.b as usize], value, heap) {
                    return FrameExit::Threw(e);
                }
            }
            Opcode::MemberGet => {
                let Value::Str(name) = &func.constants[instr.imm as usize] else { unreachable!() };
                match member_get(&registers[instr.b as usize], name, heap) {
                    Ok(v) => registers[instr.a as usize] = v,
                    Err(e) => return FrameExit::Threw(e),
                }
            }
            Opcode::MemberSet => {
                let Value::Str(name) = &func.constants[instr.imm as usize] else { unreachable!() };
                let value = registers[instr.b as usize].clone();
                if let Err(e) = member_set(&registers[instr.a as usize], name, value, heap) {
                    return FrameExit::Threw(e);
                }
            }

            Opcode::MakeRange => unreachable!("compiler never emits MakeRange directly; ranges are only compiled inside `for`"),

            Opcode::Call => {
                let callee = registers[instr.b as usize].clone();
                let first = instr.imm as usize;
                let arg_count = instr.c as usize;
                let call_args = registers[first..first + arg_count].to_vec();
                match call_value(&callee, &call_args, globals, heap, observer, call_depth + 1, max_call_depth) {
                    Ok(v) => registers[instr.a as usize] = v,
                    Err(e) => return FrameExit::Threw(e),
                }
            }

            Opcode::Return => {
                observer.on_return(call_depth);
                return FrameExit::Returned(registers[instr.a as usize].clone());
            }
            Opcode::ReturnNull => {
                observer.on_return(call_depth);
                return FrameExit::Returned(Value::Null);
            }

            Opcode::Throw => {
                let message = registers[instr.a as usize].to_display_string(heap);
                return FrameExit::Threw(ErrorInfo::new(ErrorCode::UserDefined, message, Span::default()));
            }

            Opcode::ForIterInit => {
                let state = match &registers[instr.b as usize] {
                    Value::Range(r) => IterState::Range { current: r.start, end: r.end, step: r.step, inclusive: r.inclusive },
                    Value::Array(id) => IterState::Array { id: *id, idx: 0 },
                    other => return FrameExit::Threw(type_error(other, "Array or Range", "for-in")),
                };
                iters.insert(instr.a, state);
            }
            Opcode::ForIterNext => {
                let done = match iters.get_mut(&instr.a).and_then(|s| s.next(heap)) {
                    Some(value) => {
                        registers[instr.b as usize] = value;
                        false
                    }
                    None => true,
                };
                if done {
                    ip = (ip as i32 + instr.imm) as usize;
                    continue;
                }
            }

            Opcode::Halt => break,
        }
        ip += 1;
    }
    observer.on_return(call_depth);
    FrameExit::Returned(Value::Null)
}

fn call_value(
    callee: &Value,
    args: &[Value],
    globals: &Environment,
    heap: &mut Heap,
    observer: &mut dyn VmObserver,
    call_depth: usize,
    max_call_depth: usize,
) -> Result<Value, ErrorInfo> {
    match callee {
        Value::BuiltinFunction(f) => f.call(args, heap),
        Value::Function(descriptor) => {
            if let Some(compiled) = descriptor.compiled.borrow().as_ref() {
                match run(compiled, args, globals, heap, observer, call_depth, max_call_depth) {
                    FrameExit::Returned(v) => Ok(v),
                    FrameExit::Threw(e) => Err(e),
                }
            } else {
                Err(ErrorInfo::new(ErrorCode::SemanticInvalidOperation, "function is not bytecode-compiled", Span::default()))
            }
        }
        other => Err(type_error(other, "Function", "call")),
    }
}

fn type_error(found: &Value, expected: &str, op: &str) -> ErrorInfo {
    ErrorInfo::new(ErrorCode::TypeMismatch, format!("expected {expected} for {op}, found a different type ({found:?})"), Span::default())
}

fn arithmetic(op: Opcode, a: &Value, b: &Value, heap: &mut Heap) -> Result<Value, ErrorInfo> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(match op {
            Opcode::Add => x + y,
            Opcode::Sub => x - y,
            Opcode::Mul => x * y,
            Opcode::Div => {
                if *y == 0.0 {
                    return Err(ErrorInfo::new(ErrorCode::RuntimeDivisionByZero, "division by zero", Span::default()));
                }
                x / y
            }
            Opcode::Mod => {
                if *y == 0.0 {
                    return Err(ErrorInfo::new(ErrorCode::RuntimeDivisionByZero, "modulo by zero", Span::default()));
                }
                x % y
            }
            Opcode::Pow => x.powf(*y),
            _ => unreachable!(),
        })),
        (Value::Str(x), Value::Str(y)) if op == Opcode::Add => Ok(Value::Str(format!("{x}{y}").into())),
        (Value::Array(x), Value::Array(y)) if op == Opcode::Add => {
            let (Some(HeapData::Array(xs)), Some(HeapData::Array(ys))) = (heap.get(*x), heap.get(*y)) else {
                return Err(type_error(a, "Array", "+"));
            };
            let mut combined = xs.clone();
            combined.extend(ys.clone());
            Ok(Value::Array(heap.alloc(HeapData::Array(combined))))
        }
        _ => Err(type_error(a, "Number", "arithmetic")),
    }
}

fn compare(op: Opcode, a: &Value, b: &Value) -> Result<bool, ErrorInfo> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else { return Err(type_error(a, "Number", "comparison")) };
    Ok(match op {
        Opcode::Lt => x < y,
        Opcode::LtEq => x <= y,
        Opcode::Gt => x > y,
        Opcode::GtEq => x >= y,
        _ => unreachable!(),
    })
}

fn bitwise(op: Opcode, a: &Value, b: &Value) -> Result<Value, ErrorInfo> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else { return Err(type_error(a, "Number", "bitwise")) };
    let (xi, yi) = (*x as i64, *y as i64);
    Ok(Value::Number(match op {
        Opcode::BitAnd => (xi & yi) as f64,
        Opcode::BitOr => (xi | yi) as f64,
        Opcode::BitXor => (xi ^ yi) as f64,
        Opcode::Shl => (xi << yi) as f64,
        Opcode::Shr => (xi >> yi) as f64,
        _ => unreachable!(),
    }))
}

fn index_get(collection: &Value, index: &Value, heap: &Heap) -> Result<Value, ErrorInfo> {
    match collection {
        Value::Array(id) => {
            let Some(HeapData::Array(items)) = heap.get(*id) else { return Err(type_error(collection, "Array", "index")) };
            let Value::Number(n) = index else { return Err(type_error(index, "Number", "array index")) };
            let idx = *n as i64;
            let resolved = if idx < 0 { items.len() as i64 + idx } else { idx };
            items
                .get(usize::try_from(resolved).unwrap_or(usize::MAX))
                .cloned()
                .ok_or_else(|| ErrorInfo::new(ErrorCode::RuntimeIndexOutOfBounds, "index out of bounds", Span::default()))
        }
        Value::HashMap(id) => {
            let Some(HeapData::HashMap(pairs)) = heap.get(*id) else { return Err(type_error(collection, "HashMap", "index")) };
            pairs.get(index).cloned().ok_or_else(|| ErrorInfo::new(ErrorCode::RuntimeIndexOutOfBounds, "key not found", Span::default()))
        }
        other => Err(type_error(other, "Array or HashMap", "index")),
    }
}

fn index_set(collection: &Value, index: &Value, value: Value, heap: &mut Heap) -> Result<(), ErrorInfo> {
    match collection {
        Value::Array(id) => {
            let Value::Number(n) = index else { return Err(type_error(index, "Number", "array index")) };
            let idx = *n as i64;
            let Some(HeapData::Array(items)) = heap.get_mut(*id) else { return Err(type_error(collection, "Array", "index")) };
            let resolved = if idx < 0 { items.len() as i64 + idx } else { idx };
            let resolved = usize::try_from(resolved).unwrap_or(usize::MAX);
            if resolved >= items.len() {
                return Err(ErrorInfo::new(ErrorCode::RuntimeIndexOutOfBounds, "index out of bounds", Span::default()));
            }
            items[resolved] = value;
            Ok(())
        }
        Value::HashMap(id) => {
            let Some(HeapData::HashMap(pairs)) = heap.get_mut(*id) else { return Err(type_error(collection, "HashMap", "index")) };
            pairs.insert(index.clone(), value);
            Ok(())
        }
        other => Err(type_error(other, "Array or HashMap", "index")),
    }
}

fn member_get(object: &Value, name: &str, heap: &Heap) -> Result<Value, ErrorInfo> {
    let Value::Object(id) = object else { return Err(type_error(object, "Object", "member access")) };
    let Some(HeapData::Object(obj)) = heap.get(*id) else { return Err(type_error(object, "Object", "member access")) };
    obj.get(name).cloned().ok_or_else(|| ErrorInfo::new(ErrorCode::SemanticUndefinedVariable, format!("no property '{name}'"), Span::default()))
}

fn member_set(object: &Value, name: &str, value: Value, heap: &mut Heap) -> Result<(), ErrorInfo> {
    let Value::Object(id) = object else { return Err(type_error(object, "Object", "member access")) };
    let Some(HeapData::Object(obj)) = heap.get_mut(*id) else { return Err(type_error(object, "Object", "member access")) };
    obj.set(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, BinaryOp, Span};
    use crate::bytecode::compiler::Compiler;
    use crate::observer::NoopObserver;

    #[test]
    fn runs_simple_addition() {
        let body = AstNode::Block(
            vec![AstNode::Return(
                Some(Box::new(AstNode::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(AstNode::Number(2.0, Span::default())),
                    right: Box::new(AstNode::Number(3.0, Span::default())),
                    span: Span::default(),
                })),
                Span::default(),
            )],
            Span::default(),
        );
        let func = Compiler::compile_function("f", &[], &body, Rc::new(body.clone())).unwrap();
        let globals = Environment::new_global();
        let mut heap = Heap::new();
        let mut observer = NoopObserver;
        match run(&func, &[], &globals, &mut heap, &mut observer, 0, 64) {
            FrameExit::Returned(Value::Number(n)) => assert_eq!(n, 5.0),
            _ => panic!("expected Returned(5.0)"),
        }
    }

    #[test]
    fn division_by_zero_throws_runtime_error() {
        let body = AstNode::Block(
            vec![AstNode::Return(
                Some(Box::new(AstNode::Binary {
                    op: BinaryOp::Div,
                    left: Box::new(AstNode::Number(1.0, Span::default())),
                    right: Box::new(AstNode::Number(0.0, Span::default())),
                    span: Span::default(),
                })),
                Span::default(),
            )],
            Span::default(),
        );
        let func = Compiler::compile_function("f", &[], &body, Rc::new(body.clone())).unwrap();
        let globals = Environment::new_global();
        let mut heap = Heap::new();
        let mut observer = NoopObserver;
        match run(&func, &[], &globals, &mut heap, &mut observer, 0, 64) {
            FrameExit::Threw(e) => assert_eq!(e.code, ErrorCode::RuntimeDivisionByZero),
            _ => panic!("expected a division-by-zero error"),
        }
    }
}
