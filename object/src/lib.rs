mod value;
mod header;
mod memory;
mod objects;
mod class;
mod handler;
mod selector;
mod lookup;

pub use value::{ClassTag, Marker, Tag, TagError, Value, Word};
pub use header::{InternalKind, ObjectHeader, MAX_OBJECT_WORDS};
pub use memory::{Addr, ClassRef, HandlerRef, Image, Memory, ObjRef, ObjectError};
pub use objects::{
    AppObjectView, app_object_value, app_object_words, init_app_object,
    StringView, init_string, string_object_words,
    ArrayView, array_object_words, init_array,
};
pub use class::{
    ClassInit, ClassView, Counts, NameWord, TableEntry, Visibility,
    class_object_words, init_class,
};
pub use handler::{
    HandlerBody, HandlerFlags, HandlerInfo, HandlerInit, HandlerInitBody,
    HandlerView, handler_object_words, init_handler,
};
pub use selector::{Selector, SelectorError, argument_count};
pub use lookup::{
    ARRAY_CLASS, INTEGER_CLASS, Resolution, STRING_CLASS, class_name, extends,
    field_offset, receiver_class, resolve_handler, resolve_inner_class,
    string_at, superclasses, total_field_count,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// A single-threaded image backed by a `Vec`, enough to exercise layouts
    /// and lookup without a real heap.
    struct TestImage {
        words: RefCell<Vec<u64>>,
        strings: RefCell<Vec<ObjRef>>,
        classes: RefCell<Vec<(String, ClassRef)>>,
    }

    impl TestImage {
        fn new() -> Self {
            Self {
                words: RefCell::new(vec![0]),
                strings: RefCell::new(Vec::new()),
                classes: RefCell::new(Vec::new()),
            }
        }

        fn string(&self, text: &str) -> u32 {
            let obj = self
                .allocate(string_object_words(text.len() as u32))
                .unwrap();
            init_string(self, obj, text).unwrap();
            let mut strings = self.strings.borrow_mut();
            strings.push(obj);
            strings.len() as u32 - 1
        }

        fn class(
            &self,
            name: &str,
            fields: u16,
            supers: &[&str],
            handlers: &[(&str, Visibility)],
            default: Option<Visibility>,
        ) -> ClassRef {
            let superclasses: Vec<_> = supers
                .iter()
                .map(|s| TableEntry {
                    visibility: Visibility::Public,
                    name: self.string(s),
                    target: 0,
                })
                .collect();
            let counts = Counts {
                fields,
                superclasses: superclasses.len() as u16,
                handlers: handlers.len() as u16,
                inner_classes: 0,
            };
            let class = ClassRef::new(self.allocate(class_object_words(counts)).unwrap());

            let handler_entries: Vec<_> = handlers
                .iter()
                .map(|&(selector, visibility)| TableEntry {
                    visibility,
                    name: self.string(selector),
                    target: self.handler(selector, visibility, class, false).addr(),
                })
                .collect();
            let default_handler = default.map(|v| self.handler("default:2", v, class, true));

            let index = self.classes.borrow().len() as u32;
            init_class(self, class.obj(), &ClassInit {
                visibility: Visibility::Public,
                name: self.string(name),
                field_count: fields,
                class_index: index,
                default_handler,
                superclasses: &superclasses,
                handlers: &handler_entries,
                inner_classes: &[],
            })
            .unwrap();
            self.classes.borrow_mut().push((name.to_owned(), class));
            class
        }

        fn handler(
            &self,
            selector: &str,
            visibility: Visibility,
            declaring: ClassRef,
            default: bool,
        ) -> HandlerRef {
            let code = [0u32; 2];
            let flags = if default {
                HandlerFlags::DEFAULT
            } else {
                HandlerFlags::NONE
            };
            let init = HandlerInit {
                visibility,
                name: self.string(selector),
                info: HandlerInfo {
                    flags,
                    arg_count: argument_count(selector).unwrap_or(0) as u16,
                    local_count: 1,
                },
                declaring,
                body: HandlerInitBody::Vmil(&code),
            };
            let obj = self.allocate(init.words()).unwrap();
            init_handler(self, obj, &init).unwrap();
            HandlerRef::new(obj)
        }
    }

    impl Memory for TestImage {
        fn read(&self, addr: Addr) -> Result<u64, ObjectError> {
            self.words
                .borrow()
                .get(addr as usize)
                .copied()
                .ok_or(ObjectError::OutOfBounds(addr))
        }

        fn write(&self, addr: Addr, word: u64) -> Result<(), ObjectError> {
            let mut words = self.words.borrow_mut();
            let slot = words
                .get_mut(addr as usize)
                .ok_or(ObjectError::OutOfBounds(addr))?;
            *slot = word;
            Ok(())
        }
    }

    impl Image for TestImage {
        fn allocate(&self, words: u32) -> Result<ObjRef, ObjectError> {
            let mut heap = self.words.borrow_mut();
            let addr = heap.len() as Addr;
            let new_len = heap.len() + words as usize;
            heap.resize(new_len, 0);
            Ok(ObjRef::new(addr))
        }

        fn class_at(&self, index: u32) -> Option<ClassRef> {
            self.classes.borrow().get(index as usize).map(|(_, c)| *c)
        }

        fn resolve_class(&self, _referencing: Option<ClassRef>, name: &str) -> Option<ClassRef> {
            self.classes
                .borrow()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| *c)
        }

        fn intern_string(&self, index: u32) -> Option<ObjRef> {
            self.strings.borrow().get(index as usize).copied()
        }
    }

    // ── Values ─────────────────────────────────────────────────────

    #[test]
    fn markers_never_decode_as_values() {
        for marker in [
            Marker::OldFrameBoundary,
            Marker::OldBasePointer,
            Marker::ReturnHandler,
            Marker::ReturnInstructionOffset,
            Marker::ActualReturnHere,
            Marker::TryTarget,
        ] {
            let word = marker.word(12);
            assert_eq!(Value::from_word(word), Err(TagError::Marker(marker)));
            assert!(!word.tag().is_class());
            assert_eq!(word.tag().marker(), Some(marker));
        }
    }

    #[test]
    fn values_never_decode_as_markers() {
        let class = ClassRef::new(ObjRef::new(40));
        for value in [
            Value::Null,
            Value::Void,
            Value::Integer(-7),
            Value::Integer(i32::MAX),
            Value::app_object(class, ObjRef::new(100)),
            Value::internal(InternalKind::String, ObjRef::new(3)),
        ] {
            let word = value.to_word();
            assert!(word.tag().marker().is_none());
            assert_eq!(Value::from_word(word), Ok(value));
        }
    }

    #[test]
    fn unknown_negative_tag() {
        let word = Word::new(Tag::from_raw(-12), 0);
        assert_eq!(Value::from_word(word), Err(TagError::Unknown(-12)));
    }

    // ── Objects ────────────────────────────────────────────────────

    #[test]
    fn app_object_fields_start_null() {
        let image = TestImage::new();
        let class = image.class("Point", 2, &[], &[], None);
        let obj = image.allocate(app_object_words(2)).unwrap();
        init_app_object(&image, obj, 0, 2).unwrap();

        assert!(obj.is_app_object(&image).unwrap());
        let view = AppObjectView::new(&image, obj).unwrap();
        assert_eq!(view.field_count(), 2);
        assert_eq!(view.field(1), Ok(Value::Null));
        view.set_field(1, Value::Integer(9)).unwrap();
        assert_eq!(view.field(1), Ok(Value::Integer(9)));
        assert!(view.field(2).is_err());

        let value = app_object_value(&image, obj, |i| image.class_at(i)).unwrap();
        assert_eq!(value.app_class(), Some(class));
    }

    #[test]
    fn strings_and_arrays() {
        let image = TestImage::new();
        let index = image.string("hello, vmil");
        let obj = image.intern_string(index).unwrap();
        let view = StringView::new(&image, obj).unwrap();
        assert_eq!(view.len(), 11);
        assert_eq!(view.to_owned_string().unwrap(), "hello, vmil");
        assert!(view.eq_str("hello, vmil").unwrap());
        assert!(!view.eq_str("hello, vmim").unwrap());
        assert!(obj.as_class(&image).is_err());

        let elements = [Value::Integer(1), Value::Null, Value::Integer(3)];
        let arr = image.allocate(array_object_words(3)).unwrap();
        init_array(&image, arr, &elements).unwrap();
        let view = ArrayView::new(&image, arr).unwrap();
        assert_eq!(view.to_vec().unwrap(), elements);
        assert!(view.get(3).is_err());
    }

    #[test]
    fn class_tables_follow_counts() {
        let image = TestImage::new();
        image.class("Base", 1, &[], &[], None);
        let class = image.class(
            "Widget",
            3,
            &["Base"],
            &[("draw:0", Visibility::Public), ("hide:1", Visibility::Private)],
            Some(Visibility::Public),
        );
        let view = ClassView::new(&image, class.obj()).unwrap();
        assert_eq!(view.field_count(), 3);
        assert_eq!(view.class_index(), 1);
        assert_eq!(view.counts().superclasses, 1);
        assert_eq!(view.counts().handlers, 2);
        assert_eq!(view.handler(1).unwrap().visibility, Visibility::Private);
        assert!(view.handler(2).is_err());
        assert_eq!(class_name(&image, class).unwrap(), "Widget");

        let default = view.default_handler().unwrap();
        let handler = HandlerView::new(&image, default.obj()).unwrap();
        assert!(handler.is_default());
        assert!(!handler.is_native());
        assert_eq!(handler.declaring_class(), class);
        assert_eq!(handler.instruction(1), Ok(Some(0)));
        assert_eq!(handler.instruction(2), Ok(None));
    }

    // ── Lookup ─────────────────────────────────────────────────────

    #[test]
    fn protected_handler_loses_to_public_default_for_outsiders() {
        let image = TestImage::new();
        let class = image.class(
            "Vault",
            0,
            &[],
            &[("open:0", Visibility::Protected)],
            Some(Visibility::Public),
        );
        let outsider = image.class("Thief", 0, &[], &[], None);
        let insider = image.class("SubVault", 0, &["Vault"], &[], None);

        let from_outside = resolve_handler(&image, class, "open:0", Some(outsider)).unwrap();
        assert!(matches!(from_outside, Resolution::Default(_)));
        let from_nowhere = resolve_handler(&image, class, "open:0", None).unwrap();
        assert!(matches!(from_nowhere, Resolution::Default(_)));
        let from_inside = resolve_handler(&image, class, "open:0", Some(insider)).unwrap();
        assert!(matches!(from_inside, Resolution::Declared(_)));
        let from_self = resolve_handler(&image, class, "open:0", Some(class)).unwrap();
        assert!(matches!(from_self, Resolution::Declared(_)));
    }

    #[test]
    fn private_handlers_never_match() {
        let image = TestImage::new();
        let class = image.class("Secret", 0, &[], &[("peek:0", Visibility::Private)], None);
        let resolved = resolve_handler(&image, class, "peek:0", Some(class)).unwrap();
        assert_eq!(resolved, Resolution::NotUnderstood);
    }

    #[test]
    fn only_own_table_is_scanned() {
        let image = TestImage::new();
        image.class("Parent", 0, &[], &[("greet:0", Visibility::Public)], None);
        let child = image.class("Child", 0, &["Parent"], &[], None);
        assert_eq!(
            resolve_handler(&image, child, "greet:0", None).unwrap(),
            Resolution::NotUnderstood
        );
    }

    #[test]
    fn extends_is_reflexive_transitive_and_cycle_safe() {
        let image = TestImage::new();
        let a = image.class("A", 0, &[], &[], None);
        let b = image.class("B", 0, &["A"], &[], None);
        let c = image.class("C", 0, &["B", "Missing"], &[], None);
        let x = image.class("X", 0, &["Y"], &[], None);
        let y = image.class("Y", 0, &["X"], &[], None);

        assert!(extends(&image, a, a).unwrap());
        assert!(extends(&image, c, a).unwrap());
        assert!(!extends(&image, a, c).unwrap());
        assert!(extends(&image, x, y).unwrap());
        assert!(!extends(&image, x, a).unwrap());
        assert!(total_field_count(&image, x).is_err());
    }

    #[test]
    fn superclass_fields_come_first() {
        let image = TestImage::new();
        let base = image.class("Base", 2, &[], &[], None);
        let mixin = image.class("Mixin", 1, &[], &[], None);
        let derived = image.class("Derived", 3, &["Base", "Mixin"], &[], None);
        let leaf = image.class("Leaf", 1, &["Derived"], &[], None);
        let other = image.class("Other", 1, &[], &[], None);

        assert_eq!(total_field_count(&image, derived).unwrap(), 6);
        assert_eq!(total_field_count(&image, leaf).unwrap(), 7);
        assert_eq!(field_offset(&image, derived, base).unwrap(), Some(0));
        assert_eq!(field_offset(&image, derived, mixin).unwrap(), Some(2));
        assert_eq!(field_offset(&image, derived, derived).unwrap(), Some(3));
        assert_eq!(field_offset(&image, leaf, mixin).unwrap(), Some(2));
        assert_eq!(field_offset(&image, leaf, leaf).unwrap(), Some(6));
        assert_eq!(field_offset(&image, leaf, other).unwrap(), None);
    }

    #[test]
    fn unresolved_superclass_is_reported() {
        let image = TestImage::new();
        let orphan = image.class("Orphan", 1, &["Ghost"], &[], None);
        assert_eq!(
            total_field_count(&image, orphan),
            Err(ObjectError::UnresolvedClass("Ghost".into()))
        );
    }

    #[test]
    fn inner_classes_use_handler_visibility() {
        let image = TestImage::new();
        let public_inner = image.class("Node", 0, &[], &[], None);
        let private_inner = image.class("Cursor", 0, &[], &[], None);
        let entries = [
            TableEntry {
                visibility: Visibility::Public,
                name: image.string("Node"),
                target: public_inner.addr(),
            },
            TableEntry {
                visibility: Visibility::Private,
                name: image.string("Cursor"),
                target: private_inner.addr(),
            },
        ];
        let counts = Counts { inner_classes: 2, ..Counts::default() };
        let outer = ClassRef::new(image.allocate(class_object_words(counts)).unwrap());
        init_class(&image, outer.obj(), &ClassInit {
            visibility: Visibility::Public,
            name: image.string("List"),
            field_count: 0,
            class_index: 2,
            default_handler: None,
            superclasses: &[],
            handlers: &[],
            inner_classes: &entries,
        })
        .unwrap();

        assert_eq!(
            resolve_inner_class(&image, outer, "Node", None).unwrap(),
            Some(public_inner)
        );
        assert_eq!(resolve_inner_class(&image, outer, "Cursor", Some(outer)).unwrap(), None);
        assert_eq!(resolve_inner_class(&image, outer, "Edge", None).unwrap(), None);
    }

    #[test]
    fn scalar_receivers_use_well_known_classes() {
        let image = TestImage::new();
        assert_eq!(receiver_class(&image, Value::Integer(1)), None);
        let integer = image.class(INTEGER_CLASS, 0, &[], &[], None);
        assert_eq!(receiver_class(&image, Value::Integer(1)), Some(integer));
        assert_eq!(receiver_class(&image, Value::Null), None);
        assert_eq!(receiver_class(&image, Value::Void), None);
    }
}
