//! Stack-machine interpreter.
//!
//! Executes the structured instruction tree directly: `block`, `loop`, and
//! `if` recurse into their bodies, and a branch unwinds by returning
//! [`Flow::Branch`] with a remaining label depth that each enclosing region
//! decrements. Traps unwind through `Result` and surface as
//! `trapped: true`; they are never raised as Rust errors past [`execute`].

use crate::limits::CALL_STACK_LIMIT;
use crate::parser::instruction::{Instruction, MemArg};
use crate::parser::module::Module;

use super::instance::Instance;
use super::memory::Memory;
use super::ops::{bitwise, comparison, numeric};
use super::stack::OperandStack;
use super::{ExecutionResult, Trap};

/// Where control goes after an instruction.
///
/// `Branch` carries the label depth still to unwind: a region that sees a
/// non-zero depth re-raises it minus one, and depth zero resolves against
/// the region itself (the loop head for `loop`, past the `end` otherwise).
enum Flow {
    Continue,
    Branch(u32),
    Return,
}

/// Execute a function of `instance` by index in the merged function space.
///
/// The caller provides one zero-extended 64-bit slot per declared input. On
/// a trap the instance keeps whatever mutations the invocation had already
/// made; it remains usable for further calls.
pub fn execute(instance: &mut Instance<'_>, func_idx: u32, args: &[u64]) -> ExecutionResult {
    match invoke(instance, func_idx, args.to_vec(), 0) {
        Ok(result) => ExecutionResult { trapped: false, result },
        Err(trap) => {
            tracing::debug!(%trap, func = func_idx, "execution trapped");
            ExecutionResult::trap()
        }
    }
}

fn invoke(
    instance: &mut Instance<'_>,
    func_idx: u32,
    args: Vec<u64>,
    depth: usize,
) -> Result<Option<u64>, Trap> {
    if depth >= CALL_STACK_LIMIT {
        return Err(Trap::CallStackExhausted);
    }

    let imported = instance.imported_functions.len() as u32;
    if func_idx < imported {
        let (function, has_result) = {
            let entry = &instance.imported_functions[func_idx as usize];
            (entry.function.clone(), !entry.func_type.outputs.is_empty())
        };
        let outcome = function(instance, &args);
        if outcome.trapped {
            return Err(Trap::HostFunctionFailed);
        }
        if has_result {
            return Ok(Some(outcome.result.ok_or(Trap::HostFunctionFailed)?));
        }
        return Ok(None);
    }

    let module = instance.module;
    let body = &module.code[(func_idx - imported) as usize];
    let has_result = !module.function_type(func_idx).outputs.is_empty();

    // The frame: arguments followed by zero-initialised declared locals.
    let mut locals = args;
    locals.resize(locals.len() + body.locals.len(), 0);

    let mut stack = OperandStack::new(body.max_stack_height as usize);
    run_sequence(instance, module, &body.instructions, &mut stack, &mut locals, depth)?;

    // Fall-off-end, `return`, and a branch targeting the function label all
    // leave the declared result (if any) on top of the stack.
    Ok(if has_result { Some(stack.top()) } else { None })
}

/// Resolve a branch that targets the current region: keep the label-arity
/// values from the top, drop everything else accumulated inside it.
fn take_branch(stack: &mut OperandStack, height: usize, arity: usize) {
    if arity == 1 {
        let value = stack.top();
        stack.shrink(height);
        stack.push(value);
    } else {
        stack.shrink(height);
    }
}

fn run_sequence<'m>(
    instance: &mut Instance<'m>,
    module: &'m Module,
    instructions: &'m [Instruction],
    stack: &mut OperandStack,
    locals: &mut [u64],
    depth: usize,
) -> Result<Flow, Trap> {
    for instruction in instructions {
        match instruction {
            Instruction::Unreachable => return Err(Trap::Unreachable),
            Instruction::Nop => {}

            Instruction::Block { block_type, body } => {
                let height = stack.size();
                match run_sequence(instance, module, body, stack, locals, depth)? {
                    Flow::Continue => {}
                    Flow::Return => return Ok(Flow::Return),
                    Flow::Branch(0) => take_branch(stack, height, block_type.arity()),
                    Flow::Branch(remaining) => return Ok(Flow::Branch(remaining - 1)),
                }
            }
            Instruction::Loop { body, .. } => {
                let height = stack.size();
                loop {
                    match run_sequence(instance, module, body, stack, locals, depth)? {
                        Flow::Continue => break,
                        Flow::Return => return Ok(Flow::Return),
                        // Branching to a loop restarts it; MVP loop labels
                        // carry no values.
                        Flow::Branch(0) => stack.shrink(height),
                        Flow::Branch(remaining) => return Ok(Flow::Branch(remaining - 1)),
                    }
                }
            }
            Instruction::If { block_type, then_body, else_body } => {
                let condition = stack.pop() as u32;
                let height = stack.size();
                let body = if condition != 0 { then_body } else { else_body };
                match run_sequence(instance, module, body, stack, locals, depth)? {
                    Flow::Continue => {}
                    Flow::Return => return Ok(Flow::Return),
                    Flow::Branch(0) => take_branch(stack, height, block_type.arity()),
                    Flow::Branch(remaining) => return Ok(Flow::Branch(remaining - 1)),
                }
            }
            Instruction::Br { label_idx } => return Ok(Flow::Branch(*label_idx)),
            Instruction::BrIf { label_idx } => {
                if stack.pop() as u32 != 0 {
                    return Ok(Flow::Branch(*label_idx));
                }
            }
            Instruction::BrTable { labels, default } => {
                let index = stack.pop() as u32;
                let target = labels.get(index as usize).copied().unwrap_or(*default);
                return Ok(Flow::Branch(target));
            }
            Instruction::Return => return Ok(Flow::Return),
            Instruction::Call { func_idx } => {
                call_function(instance, module, *func_idx, stack, depth)?;
            }
            Instruction::CallIndirect { type_idx } => {
                let element_idx = stack.pop() as u32;
                let entry = {
                    let table = instance.table.as_ref().ok_or(Trap::UndefinedElement)?;
                    let table = table.borrow();
                    table.get(element_idx).ok_or(Trap::UndefinedElement)?
                };
                let func_idx = entry.ok_or(Trap::UninitializedElement)?;
                if *module.function_type(func_idx) != module.types[*type_idx as usize] {
                    return Err(Trap::IndirectCallTypeMismatch);
                }
                call_function(instance, module, func_idx, stack, depth)?;
            }

            Instruction::Drop => {
                stack.pop();
            }
            Instruction::Select => {
                let condition = stack.pop() as u32;
                let val2 = stack.pop();
                let val1 = stack.pop();
                stack.push(if condition != 0 { val1 } else { val2 });
            }

            Instruction::LocalGet { local_idx } => stack.push(locals[*local_idx as usize]),
            Instruction::LocalSet { local_idx } => locals[*local_idx as usize] = stack.pop(),
            Instruction::LocalTee { local_idx } => locals[*local_idx as usize] = stack.top(),
            Instruction::GlobalGet { global_idx } => stack.push(instance.global(*global_idx)),
            Instruction::GlobalSet { global_idx } => {
                let value = stack.pop();
                instance.set_global(*global_idx, value);
            }

            Instruction::I32Load { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u32(a).map(u64::from))?
            }
            Instruction::I64Load { memarg } => load(instance, stack, memarg, Memory::read_u64)?,
            Instruction::I32Load8S { memarg } => {
                load(instance, stack, memarg, |m, a| {
                    m.read_u8(a).map(|v| v as i8 as i32 as u32 as u64)
                })?
            }
            Instruction::I32Load8U { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u8(a).map(u64::from))?
            }
            Instruction::I32Load16S { memarg } => {
                load(instance, stack, memarg, |m, a| {
                    m.read_u16(a).map(|v| v as i16 as i32 as u32 as u64)
                })?
            }
            Instruction::I32Load16U { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u16(a).map(u64::from))?
            }
            Instruction::I64Load8S { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u8(a).map(|v| v as i8 as i64 as u64))?
            }
            Instruction::I64Load8U { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u8(a).map(u64::from))?
            }
            Instruction::I64Load16S { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u16(a).map(|v| v as i16 as i64 as u64))?
            }
            Instruction::I64Load16U { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u16(a).map(u64::from))?
            }
            Instruction::I64Load32S { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u32(a).map(|v| v as i32 as i64 as u64))?
            }
            Instruction::I64Load32U { memarg } => {
                load(instance, stack, memarg, |m, a| m.read_u32(a).map(u64::from))?
            }
            Instruction::I32Store { memarg } => {
                store(instance, stack, memarg, |m, a, v| m.write_u32(a, v as u32))?
            }
            Instruction::I64Store { memarg } => {
                store(instance, stack, memarg, |m, a, v| m.write_u64(a, v))?
            }
            Instruction::I32Store8 { memarg } | Instruction::I64Store8 { memarg } => {
                store(instance, stack, memarg, |m, a, v| m.write_u8(a, v as u8))?
            }
            Instruction::I32Store16 { memarg } | Instruction::I64Store16 { memarg } => {
                store(instance, stack, memarg, |m, a, v| m.write_u16(a, v as u16))?
            }
            Instruction::I64Store32 { memarg } => {
                store(instance, stack, memarg, |m, a, v| m.write_u32(a, v as u32))?
            }
            Instruction::MemorySize => {
                let memory = instance.memory.as_ref().ok_or(Trap::MemoryAccessOutOfBounds)?;
                let pages = memory.borrow().pages();
                stack.push(pages as u64);
            }
            Instruction::MemoryGrow => {
                let delta = stack.pop() as u32;
                let memory = instance.memory.as_ref().ok_or(Trap::MemoryAccessOutOfBounds)?;
                let previous = memory.borrow_mut().grow(delta, instance.memory_max_pages);
                stack.push(previous as u32 as u64);
            }

            Instruction::I32Const { value } => stack.push(*value as u32 as u64),
            Instruction::I64Const { value } => stack.push(*value as u64),

            Instruction::I32Eqz => comparison::i32_eqz(stack),
            Instruction::I32Eq => comparison::i32_eq(stack),
            Instruction::I32Ne => comparison::i32_ne(stack),
            Instruction::I32LtS => comparison::i32_lt_s(stack),
            Instruction::I32LtU => comparison::i32_lt_u(stack),
            Instruction::I32GtS => comparison::i32_gt_s(stack),
            Instruction::I32GtU => comparison::i32_gt_u(stack),
            Instruction::I32LeS => comparison::i32_le_s(stack),
            Instruction::I32LeU => comparison::i32_le_u(stack),
            Instruction::I32GeS => comparison::i32_ge_s(stack),
            Instruction::I32GeU => comparison::i32_ge_u(stack),

            Instruction::I64Eqz => comparison::i64_eqz(stack),
            Instruction::I64Eq => comparison::i64_eq(stack),
            Instruction::I64Ne => comparison::i64_ne(stack),
            Instruction::I64LtS => comparison::i64_lt_s(stack),
            Instruction::I64LtU => comparison::i64_lt_u(stack),
            Instruction::I64GtS => comparison::i64_gt_s(stack),
            Instruction::I64GtU => comparison::i64_gt_u(stack),
            Instruction::I64LeS => comparison::i64_le_s(stack),
            Instruction::I64LeU => comparison::i64_le_u(stack),
            Instruction::I64GeS => comparison::i64_ge_s(stack),
            Instruction::I64GeU => comparison::i64_ge_u(stack),

            Instruction::I32Clz => bitwise::i32_clz(stack),
            Instruction::I32Ctz => bitwise::i32_ctz(stack),
            Instruction::I32Popcnt => bitwise::i32_popcnt(stack),
            Instruction::I32Add => numeric::i32_add(stack),
            Instruction::I32Sub => numeric::i32_sub(stack),
            Instruction::I32Mul => numeric::i32_mul(stack),
            Instruction::I32DivS => numeric::i32_div_s(stack)?,
            Instruction::I32DivU => numeric::i32_div_u(stack)?,
            Instruction::I32RemS => numeric::i32_rem_s(stack)?,
            Instruction::I32RemU => numeric::i32_rem_u(stack)?,
            Instruction::I32And => bitwise::i32_and(stack),
            Instruction::I32Or => bitwise::i32_or(stack),
            Instruction::I32Xor => bitwise::i32_xor(stack),
            Instruction::I32Shl => bitwise::i32_shl(stack),
            Instruction::I32ShrS => bitwise::i32_shr_s(stack),
            Instruction::I32ShrU => bitwise::i32_shr_u(stack),
            Instruction::I32Rotl => bitwise::i32_rotl(stack),
            Instruction::I32Rotr => bitwise::i32_rotr(stack),

            Instruction::I64Clz => bitwise::i64_clz(stack),
            Instruction::I64Ctz => bitwise::i64_ctz(stack),
            Instruction::I64Popcnt => bitwise::i64_popcnt(stack),
            Instruction::I64Add => numeric::i64_add(stack),
            Instruction::I64Sub => numeric::i64_sub(stack),
            Instruction::I64Mul => numeric::i64_mul(stack),
            Instruction::I64DivS => numeric::i64_div_s(stack)?,
            Instruction::I64DivU => numeric::i64_div_u(stack)?,
            Instruction::I64RemS => numeric::i64_rem_s(stack)?,
            Instruction::I64RemU => numeric::i64_rem_u(stack)?,
            Instruction::I64And => bitwise::i64_and(stack),
            Instruction::I64Or => bitwise::i64_or(stack),
            Instruction::I64Xor => bitwise::i64_xor(stack),
            Instruction::I64Shl => bitwise::i64_shl(stack),
            Instruction::I64ShrS => bitwise::i64_shr_s(stack),
            Instruction::I64ShrU => bitwise::i64_shr_u(stack),
            Instruction::I64Rotl => bitwise::i64_rotl(stack),
            Instruction::I64Rotr => bitwise::i64_rotr(stack),

            Instruction::I32WrapI64 => numeric::i32_wrap_i64(stack),
            Instruction::I64ExtendI32S => numeric::i64_extend_i32_s(stack),
            Instruction::I64ExtendI32U => numeric::i64_extend_i32_u(stack),
        }
    }
    Ok(Flow::Continue)
}

fn call_function<'m>(
    instance: &mut Instance<'m>,
    module: &'m Module,
    func_idx: u32,
    stack: &mut OperandStack,
    depth: usize,
) -> Result<(), Trap> {
    let num_args = module.function_type(func_idx).inputs.len();
    let mut args = vec![0u64; num_args];
    for slot in args.iter_mut().rev() {
        *slot = stack.pop();
    }
    if let Some(value) = invoke(instance, func_idx, args, depth + 1)? {
        stack.push(value);
    }
    Ok(())
}

fn load(
    instance: &Instance<'_>,
    stack: &mut OperandStack,
    memarg: &MemArg,
    read: impl FnOnce(&Memory, u64) -> Result<u64, Trap>,
) -> Result<(), Trap> {
    let base = stack.pop() as u32;
    let addr = base as u64 + memarg.offset as u64;
    let memory = instance.memory.as_ref().ok_or(Trap::MemoryAccessOutOfBounds)?;
    let value = read(&memory.borrow(), addr)?;
    stack.push(value);
    Ok(())
}

fn store(
    instance: &Instance<'_>,
    stack: &mut OperandStack,
    memarg: &MemArg,
    write: impl FnOnce(&mut Memory, u64, u64) -> Result<(), Trap>,
) -> Result<(), Trap> {
    let value = stack.pop();
    let base = stack.pop() as u32;
    let addr = base as u64 + memarg.offset as u64;
    let memory = instance.memory.as_ref().ok_or(Trap::MemoryAccessOutOfBounds)?;
    write(&mut memory.borrow_mut(), addr, value)
}
