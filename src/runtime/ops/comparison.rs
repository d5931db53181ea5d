//! Comparison and test instructions. All of them produce 0 or 1 as an i32.

use crate::runtime::stack::OperandStack;

fn binop_i32(stack: &mut OperandStack, op: impl FnOnce(u32, u32) -> bool) {
    let c2 = stack.pop() as u32;
    let c1 = stack.pop() as u32;
    stack.push(op(c1, c2) as u64);
}

fn binop_i64(stack: &mut OperandStack, op: impl FnOnce(u64, u64) -> bool) {
    let c2 = stack.pop();
    let c1 = stack.pop();
    stack.push(op(c1, c2) as u64);
}

pub fn i32_eqz(stack: &mut OperandStack) {
    let c = stack.pop() as u32;
    stack.push((c == 0) as u64);
}

pub fn i32_eq(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| c1 == c2);
}

pub fn i32_ne(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| c1 != c2);
}

pub fn i32_lt_s(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| (c1 as i32) < (c2 as i32));
}

pub fn i32_lt_u(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| c1 < c2);
}

pub fn i32_gt_s(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| (c1 as i32) > (c2 as i32));
}

pub fn i32_gt_u(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| c1 > c2);
}

pub fn i32_le_s(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| (c1 as i32) <= (c2 as i32));
}

pub fn i32_le_u(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| c1 <= c2);
}

pub fn i32_ge_s(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| (c1 as i32) >= (c2 as i32));
}

pub fn i32_ge_u(stack: &mut OperandStack) {
    binop_i32(stack, |c1, c2| c1 >= c2);
}

pub fn i64_eqz(stack: &mut OperandStack) {
    let c = stack.pop();
    stack.push((c == 0) as u64);
}

pub fn i64_eq(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| c1 == c2);
}

pub fn i64_ne(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| c1 != c2);
}

pub fn i64_lt_s(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| (c1 as i64) < (c2 as i64));
}

pub fn i64_lt_u(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| c1 < c2);
}

pub fn i64_gt_s(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| (c1 as i64) > (c2 as i64));
}

pub fn i64_gt_u(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| c1 > c2);
}

pub fn i64_le_s(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| (c1 as i64) <= (c2 as i64));
}

pub fn i64_le_u(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| c1 <= c2);
}

pub fn i64_ge_s(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| (c1 as i64) >= (c2 as i64));
}

pub fn i64_ge_u(stack: &mut OperandStack) {
    binop_i64(stack, |c1, c2| c1 >= c2);
}
