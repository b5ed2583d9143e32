use object::Value;

use super::{NativeContext, boolean};
use crate::error::Trap;

/// Same word: same integer, or same object.
pub fn identical(ctx: &mut NativeContext) -> Result<Value, Trap> {
    Ok(boolean(ctx.receiver == ctx.argument(0)?))
}
