use object::Value;

use super::{NativeContext, boolean};
use crate::error::{Fault, Trap};

pub fn length(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let text = ctx.string(ctx.receiver)?;
    i32::try_from(text.len())
        .map(Value::Integer)
        .map_err(|_| Fault::program("string too long for an integer length").into())
}

pub fn concat(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let mut text = ctx.string(ctx.receiver)?;
    text.push_str(&ctx.string(ctx.argument(0)?)?);
    Ok(ctx.heap().alloc_string(&text)?)
}

/// Byte-wise equality. A non-string argument is simply unequal.
pub fn eq(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let lhs = ctx.string(ctx.receiver)?;
    let rhs = ctx.argument(0)?;
    match ctx.string(rhs) {
        Ok(rhs) => Ok(boolean(lhs == rhs)),
        Err(Trap::Fault(Fault::InvalidCast { .. })) => Ok(boolean(false)),
        Err(e) => Err(e),
    }
}
