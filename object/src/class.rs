use crate::header::{InternalKind, ObjectHeader};
use crate::memory::{Addr, ClassRef, HandlerRef, Memory, ObjRef, ObjectError};

/// Visibility of a class, handler or inner class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Visibility {
    Public = 0,
    Protected = 1,
    Private = 2,
}

impl Visibility {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Public),
            1 => Some(Self::Protected),
            2 => Some(Self::Private),
            _ => None,
        }
    }
}

/// Visibility plus string-table name index, packed into one word.
///
/// ```text
/// bits 0..1:  visibility
/// bits 2..33: name index
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct NameWord(pub u64);

impl NameWord {
    #[inline(always)]
    pub const fn new(visibility: Visibility, name: u32) -> Self {
        Self(visibility as u64 | ((name as u64) << 2))
    }

    #[inline(always)]
    pub const fn visibility(self) -> Option<Visibility> {
        Visibility::from_bits((self.0 & 0b11) as u8)
    }

    #[inline(always)]
    pub const fn name(self) -> u32 {
        (self.0 >> 2) as u32
    }
}

/// The counts word of a class: four 16-bit counts.
///
/// ```text
/// bits  0..15: own field count
/// bits 16..31: superclass count
/// bits 32..47: handler count
/// bits 48..63: inner-class count
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    pub fields: u16,
    pub superclasses: u16,
    pub handlers: u16,
    pub inner_classes: u16,
}

impl Counts {
    #[inline(always)]
    pub const fn pack(self) -> u64 {
        self.fields as u64
            | (self.superclasses as u64) << 16
            | (self.handlers as u64) << 32
            | (self.inner_classes as u64) << 48
    }

    #[inline(always)]
    pub const fn unpack(word: u64) -> Self {
        Self {
            fields: word as u16,
            superclasses: (word >> 16) as u16,
            handlers: (word >> 32) as u16,
            inner_classes: (word >> 48) as u16,
        }
    }

    const fn table_entries(self) -> u32 {
        self.superclasses as u32 + self.handlers as u32 + self.inner_classes as u32
    }
}

/// One `(visibility+name, target)` pair of a class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub visibility: Visibility,
    pub name: u32,
    /// Handler or inner-class address; unused (0) for superclasses.
    pub target: Addr,
}

pub const CLASS_NAME_WORD: u32 = 1;
pub const CLASS_COUNTS_WORD: u32 = 2;
pub const CLASS_LINK_WORD: u32 = 3;
pub const CLASS_TABLES_START: u32 = 4;

/// Words needed for a class object with the given counts.
///
/// ```text
/// [header] [name] [counts] [default handler | class index]
/// [superclass pairs...] [handler pairs...] [inner-class pairs...]
/// ```
pub const fn class_object_words(counts: Counts) -> u32 {
    CLASS_TABLES_START + 2 * counts.table_entries()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Superclasses,
    Handlers,
    InnerClasses,
}

/// Read-only view of a class object.
pub struct ClassView<'m, M: Memory + ?Sized> {
    mem: &'m M,
    class: ClassRef,
    name: NameWord,
    counts: Counts,
    link: u64,
}

impl<'m, M: Memory + ?Sized> ClassView<'m, M> {
    pub fn new(mem: &'m M, obj: ObjRef) -> Result<Self, ObjectError> {
        obj.expect_kind(mem, InternalKind::Class)?;
        let name = NameWord(mem.read(obj.word(CLASS_NAME_WORD)?)?);
        let counts = Counts::unpack(mem.read(obj.word(CLASS_COUNTS_WORD)?)?);
        let link = mem.read(obj.word(CLASS_LINK_WORD)?)?;
        Ok(Self {
            mem,
            class: ClassRef::new(obj),
            name,
            counts,
            link,
        })
    }

    #[inline(always)]
    pub fn class(&self) -> ClassRef {
        self.class
    }

    #[inline(always)]
    pub fn name_index(&self) -> u32 {
        self.name.name()
    }

    pub fn visibility(&self) -> Result<Visibility, ObjectError> {
        self.name.visibility().ok_or(ObjectError::Corrupt {
            addr: self.class.addr(),
            reason: "invalid class visibility",
        })
    }

    #[inline(always)]
    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Declared (own) field count.
    #[inline(always)]
    pub fn field_count(&self) -> u32 {
        self.counts.fields as u32
    }

    #[inline(always)]
    pub fn class_index(&self) -> u32 {
        (self.link >> 32) as u32
    }

    #[inline(always)]
    pub fn default_handler(&self) -> Option<HandlerRef> {
        match self.link as u32 {
            0 => None,
            addr => Some(HandlerRef::new(ObjRef::new(addr))),
        }
    }

    fn entry(&self, table: Table, index: u16) -> Result<TableEntry, ObjectError> {
        let (base, len) = match table {
            Table::Superclasses => (0, self.counts.superclasses),
            Table::Handlers => (self.counts.superclasses as u32, self.counts.handlers),
            Table::InnerClasses => (
                self.counts.superclasses as u32 + self.counts.handlers as u32,
                self.counts.inner_classes,
            ),
        };
        if index >= len {
            return Err(ObjectError::OutOfBounds(self.class.addr()));
        }
        let slot = CLASS_TABLES_START + 2 * (base + index as u32);
        let obj = self.class.obj();
        let name = NameWord(self.mem.read(obj.word(slot)?)?);
        let target = self.mem.read(obj.word(slot + 1)?)? as Addr;
        let visibility = name.visibility().ok_or(ObjectError::Corrupt {
            addr: obj.addr(),
            reason: "invalid table entry visibility",
        })?;
        Ok(TableEntry {
            visibility,
            name: name.name(),
            target,
        })
    }

    pub fn superclass(&self, index: u16) -> Result<TableEntry, ObjectError> {
        self.entry(Table::Superclasses, index)
    }

    pub fn handler(&self, index: u16) -> Result<TableEntry, ObjectError> {
        self.entry(Table::Handlers, index)
    }

    pub fn inner_class(&self, index: u16) -> Result<TableEntry, ObjectError> {
        self.entry(Table::InnerClasses, index)
    }

    pub fn superclasses(&self) -> impl Iterator<Item = Result<TableEntry, ObjectError>> + '_ {
        (0..self.counts.superclasses).map(|i| self.superclass(i))
    }

    pub fn handlers(&self) -> impl Iterator<Item = Result<TableEntry, ObjectError>> + '_ {
        (0..self.counts.handlers).map(|i| self.handler(i))
    }

    pub fn inner_classes(&self) -> impl Iterator<Item = Result<TableEntry, ObjectError>> + '_ {
        (0..self.counts.inner_classes).map(|i| self.inner_class(i))
    }
}

/// Everything needed to lay out a class object.
#[derive(Debug, Clone, Copy)]
pub struct ClassInit<'a> {
    pub visibility: Visibility,
    pub name: u32,
    pub field_count: u16,
    pub class_index: u32,
    pub default_handler: Option<HandlerRef>,
    pub superclasses: &'a [TableEntry],
    pub handlers: &'a [TableEntry],
    pub inner_classes: &'a [TableEntry],
}

impl ClassInit<'_> {
    pub fn counts(&self) -> Counts {
        Counts {
            fields: self.field_count,
            superclasses: self.superclasses.len() as u16,
            handlers: self.handlers.len() as u16,
            inner_classes: self.inner_classes.len() as u16,
        }
    }
}

/// Write a class object into `obj`, which must span
/// [`class_object_words`] words.
pub fn init_class<M: Memory + ?Sized>(
    mem: &M,
    obj: ObjRef,
    init: &ClassInit<'_>,
) -> Result<(), ObjectError> {
    let counts = init.counts();
    let header = ObjectHeader::internal(InternalKind::Class, class_object_words(counts));
    mem.write(obj.addr(), header.raw())?;
    mem.write(obj.word(CLASS_NAME_WORD)?, NameWord::new(init.visibility, init.name).0)?;
    mem.write(obj.word(CLASS_COUNTS_WORD)?, counts.pack())?;
    let default = init.default_handler.map_or(0, |h| h.addr()) as u64;
    mem.write(obj.word(CLASS_LINK_WORD)?, default | (init.class_index as u64) << 32)?;

    let entries = init
        .superclasses
        .iter()
        .chain(init.handlers)
        .chain(init.inner_classes);
    for (i, entry) in entries.enumerate() {
        let slot = CLASS_TABLES_START + 2 * i as u32;
        mem.write(obj.word(slot)?, NameWord::new(entry.visibility, entry.name).0)?;
        mem.write(obj.word(slot + 1)?, entry.target as u64)?;
    }
    Ok(())
}
