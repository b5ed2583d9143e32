//! Word-addressed object arena shared by every interpreter thread.
//!
//! The arena is a fixed block of atomic words with a bump allocator. Word 0
//! is reserved so that address 0 can mean "none" in class and handler
//! metadata. Nothing is ever freed; reclamation is out of scope for the
//! runtime core.

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;

use object::{
    Addr, ClassRef, Image, Memory, ObjRef, ObjectError, Value,
    app_object_words, array_object_words, init_app_object, init_array,
    init_string, resolve_inner_class, string_object_words, total_field_count,
    ClassView, MAX_OBJECT_WORDS,
};

// ── Heap settings ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Arena size in 64-bit words, reserved word included.
    pub size_words: u32,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            size_words: 1 << 20, // 8 MB
        }
    }
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.size_words < 2 {
            return Err("size_words must leave room past the reserved word");
        }
        // object offsets are carried in the i32 payload of a value word
        if self.size_words > i32::MAX as u32 {
            return Err("size_words must fit a signed 32-bit offset");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("invalid heap settings: {0}")]
    Settings(&'static str),
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error(transparent)]
    Selector(#[from] object::SelectorError),
    #[error("class {0:?} is already defined")]
    DuplicateClass(String),
    #[error("object of {0} words exceeds the header size limit")]
    TooLarge(u32),
    #[error("{kind} table of class {class:?} exceeds 65535 entries")]
    TableOverflow { class: String, kind: &'static str },
}

// ── Tables ────────────────────────────────────────────────────────────

/// Class and string tables produced while loading an image.
#[derive(Default)]
pub(crate) struct Tables {
    /// Class-table index → class object.
    pub(crate) classes: Vec<ClassRef>,
    /// Top-level classes by name. Inner classes are only indexed.
    pub(crate) by_name: HashMap<String, ClassRef>,
    /// String-table index → string object.
    pub(crate) strings: Vec<ObjRef>,
    pub(crate) interned: HashMap<String, u32>,
}

// ── Heap ──────────────────────────────────────────────────────────────

pub struct HeapInner {
    words: Box<[AtomicU64]>,
    top: AtomicU32,
    pub(crate) tables: RwLock<Tables>,
}

impl HeapInner {
    fn new(settings: &HeapSettings) -> Result<Self, HeapError> {
        settings.validate().map_err(HeapError::Settings)?;
        let words = (0..settings.size_words).map(|_| AtomicU64::new(0)).collect();
        log::debug!("heap: reserved {} words", settings.size_words);
        Ok(Self {
            words,
            top: AtomicU32::new(1),
            tables: RwLock::new(Tables::default()),
        })
    }

    #[inline(always)]
    fn slot(&self, addr: Addr) -> Result<&AtomicU64, ObjectError> {
        if addr == 0 {
            return Err(ObjectError::OutOfBounds(addr));
        }
        self.words
            .get(addr as usize)
            .ok_or(ObjectError::OutOfBounds(addr))
    }

    /// Words handed out so far, reserved word included.
    pub fn used_words(&self) -> u32 {
        self.top.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> u32 {
        self.words.len() as u32
    }

    /// Allocate and initialize an instance of `class` with every field
    /// `Null`.
    pub fn alloc_instance(&self, class: ClassRef) -> Result<Value, HeapError> {
        let fields = total_field_count(self, class)?;
        let size = app_object_words(fields);
        if size > MAX_OBJECT_WORDS {
            return Err(HeapError::TooLarge(size));
        }
        let index = ClassView::new(self, class.obj())?.class_index();
        let obj = self.allocate(size)?;
        init_app_object(self, obj, index, fields)?;
        Ok(Value::app_object(class, obj))
    }

    /// Allocate a string that is not entered in the string table.
    pub fn alloc_string(&self, text: &str) -> Result<Value, HeapError> {
        let obj = self.string_object(text)?;
        Ok(Value::internal(object::InternalKind::String, obj))
    }

    fn string_object(&self, text: &str) -> Result<ObjRef, HeapError> {
        let len = u32::try_from(text.len()).map_err(|_| HeapError::TooLarge(u32::MAX))?;
        let size = string_object_words(len);
        if size > MAX_OBJECT_WORDS {
            return Err(HeapError::TooLarge(size));
        }
        let obj = self.allocate(size)?;
        init_string(self, obj, text)?;
        Ok(obj)
    }

    pub fn alloc_array(&self, elements: &[Value]) -> Result<Value, HeapError> {
        if elements.len() >= MAX_OBJECT_WORDS as usize {
            return Err(HeapError::TooLarge(u32::MAX));
        }
        let size = array_object_words(elements.len() as u32);
        if size > MAX_OBJECT_WORDS {
            return Err(HeapError::TooLarge(size));
        }
        let obj = self.allocate(size)?;
        init_array(self, obj, elements)?;
        Ok(Value::internal(object::InternalKind::Array, obj))
    }

    /// Enter `text` in the string table, reusing an existing entry.
    pub fn intern(&self, text: &str) -> Result<u32, HeapError> {
        if let Some(&index) = self.tables.read().interned.get(text) {
            return Ok(index);
        }
        let obj = self.string_object(text)?;
        let mut tables = self.tables.write();
        // another thread may have interned the same text meanwhile
        if let Some(&index) = tables.interned.get(text) {
            return Ok(index);
        }
        let index = tables.strings.len() as u32;
        tables.strings.push(obj);
        tables.interned.insert(text.to_owned(), index);
        Ok(index)
    }

    /// Value of string-table entry `index`.
    pub fn string_value(&self, index: u32) -> Option<Value> {
        self.intern_string(index)
            .map(|obj| Value::internal(object::InternalKind::String, obj))
    }

    /// Top-level class by name.
    pub fn class_named(&self, name: &str) -> Option<ClassRef> {
        self.tables.read().by_name.get(name).copied()
    }

    pub fn class_count(&self) -> usize {
        self.tables.read().classes.len()
    }
}

impl Memory for HeapInner {
    #[inline(always)]
    fn read(&self, addr: Addr) -> Result<u64, ObjectError> {
        Ok(self.slot(addr)?.load(Ordering::Acquire))
    }

    #[inline(always)]
    fn write(&self, addr: Addr, word: u64) -> Result<(), ObjectError> {
        self.slot(addr)?.store(word, Ordering::Release);
        Ok(())
    }
}

impl Image for HeapInner {
    fn allocate(&self, words: u32) -> Result<ObjRef, ObjectError> {
        let capacity = self.capacity();
        let start = self
            .top
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |top| {
                top.checked_add(words).filter(|&end| end <= capacity)
            })
            .map_err(|top| ObjectError::Exhausted {
                requested: words,
                available: capacity - top,
            })?;
        log::trace!("heap: allocated {words} words at {start}");
        Ok(ObjRef::new(start))
    }

    fn class_at(&self, index: u32) -> Option<ClassRef> {
        self.tables.read().classes.get(index as usize).copied()
    }

    fn resolve_class(&self, referencing: Option<ClassRef>, name: &str) -> Option<ClassRef> {
        if let Some(outer) = referencing {
            match resolve_inner_class(self, outer, name, Some(outer)) {
                Ok(Some(inner)) => return Some(inner),
                Ok(None) => {}
                Err(e) => log::warn!("heap: inner class lookup of {name:?} failed: {e}"),
            }
        }
        self.class_named(name)
    }

    fn intern_string(&self, index: u32) -> Option<ObjRef> {
        self.tables.read().strings.get(index as usize).copied()
    }
}

/// Shared handle to a heap. Cloning is cheap.
#[derive(Clone)]
pub struct Heap(Arc<HeapInner>);

impl Heap {
    pub fn new(settings: HeapSettings) -> Result<Self, HeapError> {
        Ok(Self(Arc::new(HeapInner::new(&settings)?)))
    }
}

impl Deref for Heap {
    type Target = HeapInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
