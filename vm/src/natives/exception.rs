use object::{AppObjectView, ClassTag, ClassView, Value, field_offset};

use super::NativeContext;
use crate::error::{Fault, Trap};

/// First field of the root exception class, or `null` if it declares none.
pub fn message(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let heap = ctx.heap();
    let receiver = ctx.receiver;
    let Value::Reference(ClassTag::App(class), obj) = receiver else {
        return Err(Fault::cast("exception", receiver).into());
    };
    let root_name = &ctx.interpreter.runtime().settings.root_exception;
    let root = heap
        .class_named(root_name)
        .ok_or_else(|| Fault::program(format!("exception class {root_name:?} is not defined")))?;
    let offset = field_offset(heap, class, root)?.ok_or(Fault::cast("exception", receiver))?;
    if ClassView::new(heap, root.obj())?.field_count() == 0 {
        return Ok(Value::Null);
    }
    Ok(AppObjectView::new(heap, obj)?.field(offset)?)
}
