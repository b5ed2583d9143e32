use heap::HeapInner;
use object::{ArrayView, Value};

use super::NativeContext;
use crate::error::{Fault, Trap};

fn index(ctx: &NativeContext, array: &ArrayView<'_, HeapInner>) -> Result<u32, Trap> {
    let index = ctx.integer(ctx.argument(0)?)?;
    u32::try_from(index)
        .ok()
        .filter(|&i| i < array.len())
        .ok_or_else(|| {
            Fault::program(format!("index {index} out of bounds for length {}", array.len())).into()
        })
}

pub fn length(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let array = ctx.array(ctx.receiver)?;
    Ok(Value::Integer(array.len() as i32))
}

pub fn at(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let array = ctx.array(ctx.receiver)?;
    let index = index(ctx, &array)?;
    Ok(array.get(index)?)
}

/// Stores and answers the stored value.
pub fn at_put(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let array = ctx.array(ctx.receiver)?;
    let index = index(ctx, &array)?;
    let value = ctx.argument(1)?;
    if value.is_void() {
        return Err(Fault::program("void stored into an array").into());
    }
    array.set(index, value)?;
    Ok(value)
}
