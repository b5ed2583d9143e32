use crate::class::{ClassView, Visibility};
use crate::handler::HandlerView;
use crate::header::InternalKind;
use crate::memory::{ClassRef, HandlerRef, Image, ObjRef, ObjectError};
use crate::objects::StringView;
use crate::value::{ClassTag, Value};

/// Class that integer receivers dispatch through.
pub const INTEGER_CLASS: &str = "Integer";
/// Class that string receivers dispatch through.
pub const STRING_CLASS: &str = "String";
/// Class that array receivers dispatch through.
pub const ARRAY_CLASS: &str = "Array";

/// Hierarchies deeper than this are treated as cyclic.
const MAX_HIERARCHY_DEPTH: usize = 256;

/// The result of a handler lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A declared handler accepted the selector.
    Declared(HandlerRef),
    /// No declared handler matched; the class's default handler takes it.
    Default(HandlerRef),
    NotUnderstood,
}

/// Resolve `selector` on `class` as sent from code running in `caller`.
///
/// Only the class's own handler table is scanned. Private candidates are
/// rejected, Protected candidates only match when `caller` extends `class`.
/// The first accepted candidate wins; otherwise the default handler (subject
/// to the same rule) catches the message.
pub fn resolve_handler<I: Image + ?Sized>(
    image: &I,
    class: ClassRef,
    selector: &str,
    caller: Option<ClassRef>,
) -> Result<Resolution, ObjectError> {
    let view = ClassView::new(image, class.obj())?;
    for entry in view.handlers() {
        let entry = entry?;
        if !name_matches(image, entry.name, selector)? {
            continue;
        }
        if accepts(image, entry.visibility, class, caller)? {
            return Ok(Resolution::Declared(HandlerRef::new(ObjRef::new(
                entry.target,
            ))));
        }
    }

    if let Some(default) = view.default_handler() {
        let handler = HandlerView::new(image, default.obj())?;
        if accepts(image, handler.visibility()?, class, caller)? {
            return Ok(Resolution::Default(default));
        }
    }
    Ok(Resolution::NotUnderstood)
}

/// Resolve an inner class of `class` by name, with the handler visibility rule.
pub fn resolve_inner_class<I: Image + ?Sized>(
    image: &I,
    class: ClassRef,
    name: &str,
    caller: Option<ClassRef>,
) -> Result<Option<ClassRef>, ObjectError> {
    let view = ClassView::new(image, class.obj())?;
    for entry in view.inner_classes() {
        let entry = entry?;
        if !name_matches(image, entry.name, name)? {
            continue;
        }
        if accepts(image, entry.visibility, class, caller)? {
            return Ok(Some(ClassRef::new(ObjRef::new(entry.target))));
        }
    }
    Ok(None)
}

/// Class a message sent to `receiver` is resolved against.
///
/// AppObjects use their own class. Integers, strings and arrays go through
/// the well-known classes when the image defines them; everything else has
/// no class and understands nothing.
pub fn receiver_class<I: Image + ?Sized>(image: &I, receiver: Value) -> Option<ClassRef> {
    let name = match receiver {
        Value::Reference(ClassTag::App(class), _) => return Some(class),
        Value::Integer(_) => INTEGER_CLASS,
        Value::Reference(ClassTag::Internal(InternalKind::String), _) => STRING_CLASS,
        Value::Reference(ClassTag::Internal(InternalKind::Array), _) => ARRAY_CLASS,
        _ => return None,
    };
    image.resolve_class(None, name)
}

fn accepts<I: Image + ?Sized>(
    image: &I,
    visibility: Visibility,
    declaring: ClassRef,
    caller: Option<ClassRef>,
) -> Result<bool, ObjectError> {
    match visibility {
        Visibility::Public => Ok(true),
        Visibility::Private => Ok(false),
        Visibility::Protected => match caller {
            Some(caller) => extends(image, caller, declaring),
            None => Ok(false),
        },
    }
}

fn name_matches<I: Image + ?Sized>(
    image: &I,
    name_index: u32,
    name: &str,
) -> Result<bool, ObjectError> {
    let obj = image
        .intern_string(name_index)
        .ok_or(ObjectError::UnknownString(name_index))?;
    StringView::new(image, obj)?.eq_str(name)
}

/// Name of a class, read from the string table.
pub fn class_name<I: Image + ?Sized>(image: &I, class: ClassRef) -> Result<String, ObjectError> {
    let view = ClassView::new(image, class.obj())?;
    string_at(image, view.name_index())
}

pub fn string_at<I: Image + ?Sized>(image: &I, index: u32) -> Result<String, ObjectError> {
    let obj = image
        .intern_string(index)
        .ok_or(ObjectError::UnknownString(index))?;
    StringView::new(image, obj)?.to_owned_string()
}

/// Resolve the superclass names of `class`, in declaration order.
///
/// Names are looked up through the image every time; nothing is linked into
/// the class object.
pub fn superclasses<I: Image + ?Sized>(
    image: &I,
    class: ClassRef,
) -> Result<Vec<ClassRef>, ObjectError> {
    let view = ClassView::new(image, class.obj())?;
    view.superclasses()
        .map(|entry| {
            let name = string_at(image, entry?.name)?;
            image
                .resolve_class(None, &name)
                .ok_or(ObjectError::UnresolvedClass(name))
        })
        .collect()
}

/// `true` if `class` is `ancestor` or inherits from it.
///
/// Superclasses that cannot be resolved are skipped.
pub fn extends<I: Image + ?Sized>(
    image: &I,
    class: ClassRef,
    ancestor: ClassRef,
) -> Result<bool, ObjectError> {
    let mut visited = Vec::new();
    let mut pending = vec![class];
    while let Some(current) = pending.pop() {
        if current == ancestor {
            return Ok(true);
        }
        if visited.contains(&current) {
            continue;
        }
        visited.push(current);
        let view = ClassView::new(image, current.obj())?;
        for entry in view.superclasses() {
            let name = string_at(image, entry?.name)?;
            if let Some(superclass) = image.resolve_class(None, &name) {
                pending.push(superclass);
            }
        }
    }
    Ok(false)
}

/// Instance field count: own fields plus every superclass's total.
pub fn total_field_count<I: Image + ?Sized>(
    image: &I,
    class: ClassRef,
) -> Result<u32, ObjectError> {
    fn count<I: Image + ?Sized>(
        image: &I,
        class: ClassRef,
        depth: usize,
    ) -> Result<u32, ObjectError> {
        if depth > MAX_HIERARCHY_DEPTH {
            return Err(ObjectError::CyclicHierarchy(class.addr()));
        }
        let own = ClassView::new(image, class.obj())?.field_count();
        superclasses(image, class)?
            .into_iter()
            .try_fold(own, |total, superclass| {
                Ok(total + count(image, superclass, depth + 1)?)
            })
    }
    count(image, class, 0)
}

enum Located {
    Found(u32),
    Size(u32),
}

/// Offset of `declaring`'s own fields inside an instance of `concrete`.
///
/// Instances lay out every superclass (recursively, in declaration order)
/// before the class's own fields. `None` if `declaring` is not part of
/// `concrete`'s hierarchy.
pub fn field_offset<I: Image + ?Sized>(
    image: &I,
    concrete: ClassRef,
    declaring: ClassRef,
) -> Result<Option<u32>, ObjectError> {
    fn locate<I: Image + ?Sized>(
        image: &I,
        class: ClassRef,
        target: ClassRef,
        base: u32,
        depth: usize,
    ) -> Result<Located, ObjectError> {
        if depth > MAX_HIERARCHY_DEPTH {
            return Err(ObjectError::CyclicHierarchy(class.addr()));
        }
        let mut offset = base;
        for superclass in superclasses(image, class)? {
            match locate(image, superclass, target, offset, depth + 1)? {
                Located::Found(at) => return Ok(Located::Found(at)),
                Located::Size(size) => offset += size,
            }
        }
        if class == target {
            return Ok(Located::Found(offset));
        }
        let own = ClassView::new(image, class.obj())?.field_count();
        Ok(Located::Size(offset - base + own))
    }

    match locate(image, concrete, declaring, 0, 0)? {
        Located::Found(at) => Ok(Some(at)),
        Located::Size(_) => Ok(None),
    }
}
