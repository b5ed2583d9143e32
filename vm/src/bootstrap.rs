//! Classes every session starts with: the exception hierarchy faults are
//! reported through, and the classes integers, strings and arrays dispatch
//! through.

use heap::{ClassDef, HandlerDef, HeapInner};
use object::{ARRAY_CLASS, INTEGER_CLASS, STRING_CLASS};

use crate::{VmSettings, error::VmError};

/// Selector of the root exception's message reader.
pub const MESSAGE_SELECTOR: &str = "message:0";

pub fn bootstrap(heap: &HeapInner, settings: &VmSettings) -> Result<(), VmError> {
    install_exceptions(heap, settings)?;
    install_builtin_classes(heap)?;
    log::debug!(
        "bootstrap: {} classes, {} of {} heap words used",
        heap.class_count(),
        heap.used_words(),
        heap.capacity()
    );
    Ok(())
}

fn install_exceptions(heap: &HeapInner, settings: &VmSettings) -> Result<(), VmError> {
    // handlers are not inherited, so every exception class answers the
    // message itself
    let message = || HandlerDef::native(MESSAGE_SELECTOR, "exception.message");
    let root = &settings.root_exception;
    heap.define_class(&ClassDef::new(root.as_str()).fields(1).handler(message()))?;

    let classes = &settings.exception_classes;
    for name in [
        &classes.message_not_understood,
        &classes.invalid_cast,
        &classes.invalid_program,
    ] {
        if heap.class_named(name).is_none() {
            heap.define_class(
                &ClassDef::new(name.as_str())
                    .extends(root.as_str())
                    .handler(message()),
            )?;
        }
    }
    Ok(())
}

fn install_builtin_classes(heap: &HeapInner) -> Result<(), VmError> {
    let common = |class: ClassDef| {
        class
            .handler(HandlerDef::native("identical:1", "object.identical"))
            .handler(HandlerDef::native("print:0", "system.print"))
    };

    heap.define_class(&common(
        ClassDef::new(INTEGER_CLASS)
            .handler(HandlerDef::native("add:1", "integer.add"))
            .handler(HandlerDef::native("sub:1", "integer.sub"))
            .handler(HandlerDef::native("mul:1", "integer.mul"))
            .handler(HandlerDef::native("div:1", "integer.div"))
            .handler(HandlerDef::native("rem:1", "integer.rem"))
            .handler(HandlerDef::native("eq:1", "integer.eq"))
            .handler(HandlerDef::native("lt:1", "integer.lt")),
    ))?;
    heap.define_class(&common(
        ClassDef::new(STRING_CLASS)
            .handler(HandlerDef::native("length:0", "string.length"))
            .handler(HandlerDef::native("concat:1", "string.concat"))
            .handler(HandlerDef::native("eq:1", "string.eq")),
    ))?;
    heap.define_class(&common(
        ClassDef::new(ARRAY_CLASS)
            .handler(HandlerDef::native("length:0", "array.length"))
            .handler(HandlerDef::native("at:1", "array.at"))
            .handler(HandlerDef::native("at_put:2", "array.at_put")),
    ))?;
    Ok(())
}
