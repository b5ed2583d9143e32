use heap::HeapInner;
use object::{ArrayView, ClassTag, InternalKind, StringView, Value, class_name};

use super::NativeContext;
use crate::error::Trap;

/// Writes the receiver to the session output, followed by a newline.
pub fn print(ctx: &mut NativeContext) -> Result<Value, Trap> {
    let text = describe(ctx.heap(), ctx.receiver);
    ctx.interpreter.runtime().write_line(&text);
    Ok(Value::Void)
}

/// Human-readable rendering of a value. Never fails; unreadable objects are
/// shown by address.
pub fn describe(heap: &HeapInner, value: Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Void => "void".to_owned(),
        Value::Integer(n) => n.to_string(),
        Value::Reference(ClassTag::Internal(InternalKind::String), obj) => StringView::new(heap, obj)
            .and_then(|s| s.to_owned_string())
            .unwrap_or_else(|_| format!("<string @{}>", obj.addr())),
        Value::Reference(ClassTag::Internal(InternalKind::Array), obj) => {
            match ArrayView::new(heap, obj).and_then(|a| a.to_vec()) {
                Ok(elements) => {
                    let parts: Vec<_> = elements.into_iter().map(|e| describe(heap, e)).collect();
                    format!("[{}]", parts.join(", "))
                }
                Err(_) => format!("<array @{}>", obj.addr()),
            }
        }
        Value::Reference(ClassTag::Internal(kind), obj) => format!("<{} @{}>", kind.name(), obj.addr()),
        Value::Reference(ClassTag::App(class), obj) => match class_name(heap, class) {
            Ok(name) => format!("a {name}"),
            Err(_) => format!("<object @{}>", obj.addr()),
        },
    }
}
