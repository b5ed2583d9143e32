mod heap;
mod image;

pub use heap::{Heap, HeapError, HeapInner, HeapSettings};
pub use image::{ClassDef, HandlerDef, HandlerSource};

#[cfg(test)]
mod tests {
    use super::*;
    use object::{
        AppObjectView, ClassView, HandlerView, Image, Memory, ObjectError, StringView,
        Value, Visibility, field_offset,
    };

    fn small_heap() -> Heap {
        Heap::new(HeapSettings { size_words: 4096 }).unwrap()
    }

    #[test]
    fn settings_are_validated() {
        assert!(HeapSettings::default().validate().is_ok());
        assert!(HeapSettings { size_words: 1 }.validate().is_err());
        assert!(HeapSettings { size_words: u32::MAX }.validate().is_err());
        assert!(matches!(
            Heap::new(HeapSettings { size_words: 0 }),
            Err(HeapError::Settings(_))
        ));
    }

    #[test]
    fn allocation_is_bounded() {
        let heap = Heap::new(HeapSettings { size_words: 16 }).unwrap();
        let a = heap.allocate(10).unwrap();
        assert_eq!(a.addr(), 1);
        assert_eq!(heap.used_words(), 11);
        assert_eq!(
            heap.allocate(6),
            Err(ObjectError::Exhausted { requested: 6, available: 5 })
        );
        assert_eq!(heap.allocate(5).unwrap().addr(), 11);
        assert!(heap.read(0).is_err());
        assert!(heap.read(16).is_err());
    }

    #[test]
    fn concurrent_allocations_do_not_overlap() {
        let heap = small_heap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let heap = heap.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| heap.allocate(3).unwrap().addr()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut starts: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        starts.sort_unstable();
        assert!(starts.windows(2).all(|w| w[1] - w[0] >= 3));
        assert_eq!(starts.len(), 200);
    }

    #[test]
    fn strings_are_interned_once() {
        let heap = small_heap();
        let a = heap.intern("hello").unwrap();
        let b = heap.intern("world").unwrap();
        assert_ne!(a, b);
        assert_eq!(heap.intern("hello").unwrap(), a);

        let obj = heap.intern_string(b).unwrap();
        assert_eq!(StringView::new(&*heap, obj).unwrap().to_owned_string().unwrap(), "world");
        assert!(heap.intern_string(99).is_none());
    }

    #[test]
    fn classes_and_handlers_are_laid_out() {
        let heap = small_heap();
        let class = heap
            .define_class(
                &ClassDef::new("Counter")
                    .fields(1)
                    .handler(HandlerDef::vmil("bump:1", 2, vec![0, 0, 0]).entrypoint())
                    .handler(HandlerDef::native("peek:0", "integer.add").visibility(Visibility::Private))
                    .default_handler(HandlerDef::native("dnu:2", "system.print")),
            )
            .unwrap();
        assert_eq!(heap.class_at(0), Some(class));
        assert_eq!(heap.resolve_class(None, "Counter"), Some(class));

        let view = ClassView::new(&*heap, class.obj()).unwrap();
        assert_eq!(view.field_count(), 1);
        assert_eq!(view.counts().handlers, 2);

        let bump = heap.handler_named("Counter", "bump:1").unwrap().unwrap();
        let bump = HandlerView::new(&*heap, bump.obj()).unwrap();
        assert_eq!(bump.arg_count(), 1);
        assert_eq!(bump.local_count(), 2);
        assert!(bump.is_entrypoint());
        assert_eq!(bump.declaring_class(), class);

        let default = HandlerView::new(&*heap, view.default_handler().unwrap().obj()).unwrap();
        assert!(default.is_default() && default.is_native());
        assert_eq!(default.arg_count(), 2);
        assert!(heap.handler_named("Counter", "missing:0").unwrap().is_none());
    }

    #[test]
    fn duplicate_classes_are_rejected() {
        let heap = small_heap();
        heap.define_class(&ClassDef::new("A")).unwrap();
        assert_eq!(
            heap.define_class(&ClassDef::new("A")),
            Err(HeapError::DuplicateClass("A".into()))
        );
    }

    #[test]
    fn inner_classes_resolve_relative_to_their_outer_class() {
        let heap = small_heap();
        heap.define_class(&ClassDef::new("Node").fields(3)).unwrap();
        let list = heap
            .define_class(&ClassDef::new("List").inner(ClassDef::new("Node").fields(1)))
            .unwrap();
        let global = heap.resolve_class(None, "Node").unwrap();
        let inner = heap.resolve_class(Some(list), "Node").unwrap();
        assert_ne!(global, inner);
        assert_eq!(ClassView::new(&*heap, inner.obj()).unwrap().field_count(), 1);
        // inner classes are indexed but not visible by bare name
        assert_eq!(heap.class_count(), 3);
    }

    #[test]
    fn instances_include_superclass_fields() {
        let heap = small_heap();
        // defined before its superclass; resolved by name when needed
        let derived = heap
            .define_class(&ClassDef::new("Derived").fields(2).extends("Base"))
            .unwrap();
        let base = heap.define_class(&ClassDef::new("Base").fields(3)).unwrap();

        let value = heap.alloc_instance(derived).unwrap();
        assert_eq!(value.app_class(), Some(derived));
        let view = AppObjectView::new(&*heap, value.as_reference().unwrap()).unwrap();
        assert_eq!(view.field_count(), 5);
        assert_eq!(heap.class_at(view.class_index()), Some(derived));
        assert_eq!(field_offset(&*heap, derived, base).unwrap(), Some(0));
        assert_eq!(field_offset(&*heap, derived, derived).unwrap(), Some(3));
        assert_eq!(view.field(4), Ok(Value::Null));
    }

    #[test]
    fn runtime_strings_and_arrays() {
        let heap = small_heap();
        let s = heap.alloc_string("temp").unwrap();
        assert_eq!(s.kind_name(), "string");
        let arr = heap.alloc_array(&[Value::Integer(1), s]).unwrap();
        let view = object::ArrayView::new(&*heap, arr.as_reference().unwrap()).unwrap();
        assert_eq!(view.get(1), Ok(s));
    }
}
