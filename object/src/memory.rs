use crate::header::{InternalKind, ObjectHeader};

/// Word index into a heap image.
pub type Addr = u32;

/// Opaque reference to a heap object: the index of its header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjRef(Addr);

impl ObjRef {
    #[inline(always)]
    pub const fn new(addr: Addr) -> Self {
        Self(addr)
    }

    #[inline(always)]
    pub const fn addr(self) -> Addr {
        self.0
    }

    /// Address of the word `offset` words past the header.
    #[inline(always)]
    pub fn word(self, offset: u32) -> Result<Addr, ObjectError> {
        self.0
            .checked_add(offset)
            .ok_or(ObjectError::OutOfBounds(self.0))
    }

    pub fn header<M: Memory + ?Sized>(
        self,
        mem: &M,
    ) -> Result<ObjectHeader, ObjectError> {
        mem.read(self.0).map(ObjectHeader::from_raw)
    }

    /// Check that this object is an internal object of `kind`.
    pub fn expect_kind<M: Memory + ?Sized>(
        self,
        mem: &M,
        kind: InternalKind,
    ) -> Result<ObjectHeader, ObjectError> {
        let header = self.header(mem)?;
        if header.kind() != Some(kind) {
            return Err(ObjectError::WrongKind {
                addr: self.0,
                expected: kind.name(),
            });
        }
        Ok(header)
    }

    pub fn as_class<M: Memory + ?Sized>(self, mem: &M) -> Result<ClassRef, ObjectError> {
        self.expect_kind(mem, InternalKind::Class)?;
        Ok(ClassRef(self))
    }

    pub fn as_handler<M: Memory + ?Sized>(self, mem: &M) -> Result<HandlerRef, ObjectError> {
        self.expect_kind(mem, InternalKind::Handler)?;
        Ok(HandlerRef(self))
    }

    /// `true` for instances of application classes. Reads only the header.
    pub fn is_app_object<M: Memory + ?Sized>(self, mem: &M) -> Result<bool, ObjectError> {
        Ok(self.header(mem)?.is_app_object())
    }
}

/// A reference known to point at a class object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ClassRef(ObjRef);

impl ClassRef {
    #[inline(always)]
    pub const fn new(obj: ObjRef) -> Self {
        Self(obj)
    }

    #[inline(always)]
    pub const fn obj(self) -> ObjRef {
        self.0
    }

    #[inline(always)]
    pub const fn addr(self) -> Addr {
        self.0.addr()
    }
}

/// A reference known to point at a handler object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HandlerRef(ObjRef);

impl HandlerRef {
    #[inline(always)]
    pub const fn new(obj: ObjRef) -> Self {
        Self(obj)
    }

    #[inline(always)]
    pub const fn obj(self) -> ObjRef {
        self.0
    }

    #[inline(always)]
    pub const fn addr(self) -> Addr {
        self.0.addr()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("word {0} is outside the heap")]
    OutOfBounds(Addr),
    #[error("heap exhausted: requested {requested} words, {available} left")]
    Exhausted { requested: u32, available: u32 },
    #[error("object at {addr} is not a {expected}")]
    WrongKind { addr: Addr, expected: &'static str },
    #[error("string table has no entry {0}")]
    UnknownString(u32),
    #[error("class table has no entry {0}")]
    UnknownClassIndex(u32),
    #[error("class {0:?} cannot be resolved")]
    UnresolvedClass(String),
    #[error("superclass chain of class at {0} is cyclic")]
    CyclicHierarchy(Addr),
    #[error("string at {0} is not valid UTF-8")]
    InvalidUtf8(Addr),
    #[error("object at {addr} is corrupt: {reason}")]
    Corrupt { addr: Addr, reason: &'static str },
}

/// Word-addressed storage.
pub trait Memory {
    fn read(&self, addr: Addr) -> Result<u64, ObjectError>;
    fn write(&self, addr: Addr, word: u64) -> Result<(), ObjectError>;
}

/// A loaded heap image: storage plus the class and string tables the
/// loader produced.
pub trait Image: Memory {
    /// Reserve `words` zeroed words and return the first one.
    fn allocate(&self, words: u32) -> Result<ObjRef, ObjectError>;

    /// Class registered under `index` in the class table.
    fn class_at(&self, index: u32) -> Option<ClassRef>;

    /// Resolve `name` as seen from `referencing`: its inner classes first,
    /// then the global class table.
    fn resolve_class(
        &self,
        referencing: Option<ClassRef>,
        name: &str,
    ) -> Option<ClassRef>;

    /// String object for string-table entry `index`.
    fn intern_string(&self, index: u32) -> Option<ObjRef>;
}
