use object::Value;

use super::{NativeContext, boolean};
use crate::error::{Fault, Trap};

fn operands(ctx: &NativeContext) -> Result<(i32, i32), Trap> {
    let lhs = ctx.integer(ctx.receiver)?;
    let rhs = ctx.integer(ctx.argument(0)?)?;
    Ok((lhs, rhs))
}

fn checked(result: Option<i32>, op: &str) -> Result<Value, Trap> {
    result
        .map(Value::Integer)
        .ok_or_else(|| Fault::program(format!("integer overflow in {op}")).into())
}

pub fn add(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let (a, b) = operands(ctx)?;
    checked(a.checked_add(b), "add")
}

pub fn sub(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let (a, b) = operands(ctx)?;
    checked(a.checked_sub(b), "sub")
}

pub fn mul(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let (a, b) = operands(ctx)?;
    checked(a.checked_mul(b), "mul")
}

pub fn div(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let (a, b) = operands(ctx)?;
    if b == 0 {
        return Err(Fault::program("division by zero").into());
    }
    checked(a.checked_div(b), "div")
}

pub fn rem(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let (a, b) = operands(ctx)?;
    if b == 0 {
        return Err(Fault::program("division by zero").into());
    }
    checked(a.checked_rem(b), "rem")
}

pub fn eq(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let (a, b) = operands(ctx)?;
    Ok(boolean(a == b))
}

pub fn lt(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let (a, b) = operands(ctx)?;
    Ok(boolean(a < b))
}
