use crate::header::InternalKind;
use crate::memory::{ClassRef, ObjRef};

/// A raw 64-bit storage word.
///
/// Every value slot on the heap and on an execution stack is one `Word`:
///
/// ```text
/// bits 32..63: tag     (i32, see [`Tag`])
/// bits  0..31: payload (i32: integer value, object offset or marker data)
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Word(u64);

impl Word {
    #[inline(always)]
    pub const fn new(tag: Tag, payload: i32) -> Self {
        Self(((tag.0 as u32 as u64) << 32) | payload as u32 as u64)
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn tag(self) -> Tag {
        Tag((self.0 >> 32) as u32 as i32)
    }

    #[inline(always)]
    pub const fn payload(self) -> i32 {
        self.0 as u32 as i32
    }
}

impl core::fmt::Debug for Word {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.tag().marker() {
            Some(marker) => write!(f, "{marker:?}({})", self.payload()),
            None => match Value::from_word(*self) {
                Ok(value) => write!(f, "{value:?}"),
                Err(_) => write!(f, "Word(0x{:016x})", self.0),
            },
        }
    }
}

/// The tag half of a [`Word`].
///
/// Non-negative tags are class ids: the heap offset of the class object an
/// AppObject reference belongs to. Negative tags are split into two disjoint
/// ranges, one for the remaining value kinds and one for stack markers, so a
/// class id can never be confused with a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(i32);

impl Tag {
    pub const NULL: Self = Self(-1);
    pub const VOID: Self = Self(-2);
    pub const INTEGER: Self = Self(-3);
    pub const STRING: Self = Self(-4);
    pub const ARRAY: Self = Self(-5);
    pub const CLASS: Self = Self(-6);
    pub const HANDLER: Self = Self(-7);

    const MARKER_HIGH: i32 = -16;
    const MARKER_LOW: i32 = -21;

    #[inline(always)]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Tag of a reference to an instance of `class`.
    #[inline(always)]
    pub fn class(class: ClassRef) -> Self {
        let addr = class.addr();
        debug_assert!(addr <= i32::MAX as u32, "class id out of range: {addr}");
        Self(addr as i32)
    }

    #[inline(always)]
    pub const fn is_class(self) -> bool {
        self.0 >= 0
    }

    #[inline(always)]
    pub const fn is_marker(self) -> bool {
        self.0 >= Self::MARKER_LOW && self.0 <= Self::MARKER_HIGH
    }

    pub const fn marker(self) -> Option<Marker> {
        match self.0 {
            -16 => Some(Marker::OldFrameBoundary),
            -17 => Some(Marker::OldBasePointer),
            -18 => Some(Marker::ReturnHandler),
            -19 => Some(Marker::ReturnInstructionOffset),
            -20 => Some(Marker::ActualReturnHere),
            -21 => Some(Marker::TryTarget),
            _ => None,
        }
    }

    const fn internal(kind: InternalKind) -> Self {
        match kind {
            InternalKind::String => Self::STRING,
            InternalKind::Array => Self::ARRAY,
            InternalKind::Class => Self::CLASS,
            InternalKind::Handler => Self::HANDLER,
        }
    }
}

/// Stack-internal word kinds written by frame and try bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Marker {
    OldFrameBoundary = -16,
    OldBasePointer = -17,
    ReturnHandler = -18,
    ReturnInstructionOffset = -19,
    ActualReturnHere = -20,
    TryTarget = -21,
}

impl Marker {
    #[inline(always)]
    pub const fn tag(self) -> Tag {
        Tag(self as i32)
    }

    #[inline(always)]
    pub const fn word(self, payload: i32) -> Word {
        Word::new(self.tag(), payload)
    }
}

/// Class half of a reference: an application class or an internal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassTag {
    App(ClassRef),
    Internal(InternalKind),
}

/// A VM value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    /// No value. Produced by void returns; rejected by most opcodes.
    Void,
    Integer(i32),
    Reference(ClassTag, ObjRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("stack marker {0:?} read where a value was expected")]
    Marker(Marker),
    #[error("unknown value tag {0}")]
    Unknown(i32),
    #[error("negative object offset {0}")]
    NegativeOffset(i32),
}

impl Value {
    #[inline]
    pub const fn app_object(class: ClassRef, object: ObjRef) -> Self {
        Self::Reference(ClassTag::App(class), object)
    }

    #[inline]
    pub const fn internal(kind: InternalKind, object: ObjRef) -> Self {
        Self::Reference(ClassTag::Internal(kind), object)
    }

    pub fn to_word(self) -> Word {
        match self {
            Self::Null => Word::new(Tag::NULL, 0),
            Self::Void => Word::new(Tag::VOID, 0),
            Self::Integer(n) => Word::new(Tag::INTEGER, n),
            Self::Reference(ClassTag::App(class), obj) => {
                Word::new(Tag::class(class), obj.addr() as i32)
            }
            Self::Reference(ClassTag::Internal(kind), obj) => {
                Word::new(Tag::internal(kind), obj.addr() as i32)
            }
        }
    }

    pub fn from_word(word: Word) -> Result<Self, TagError> {
        let tag = word.tag();
        let payload = word.payload();
        if let Some(marker) = tag.marker() {
            return Err(TagError::Marker(marker));
        }
        let object = || {
            u32::try_from(payload)
                .map(ObjRef::new)
                .map_err(|_| TagError::NegativeOffset(payload))
        };
        let value = match tag {
            Tag::NULL => Self::Null,
            Tag::VOID => Self::Void,
            Tag::INTEGER => Self::Integer(payload),
            Tag::STRING => Self::internal(InternalKind::String, object()?),
            Tag::ARRAY => Self::internal(InternalKind::Array, object()?),
            Tag::CLASS => Self::internal(InternalKind::Class, object()?),
            Tag::HANDLER => Self::internal(InternalKind::Handler, object()?),
            t if t.is_class() => Self::app_object(
                ClassRef::new(ObjRef::new(t.raw() as u32)),
                object()?,
            ),
            t => return Err(TagError::Unknown(t.raw())),
        };
        Ok(value)
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }

    #[inline]
    pub const fn is_void(self) -> bool {
        matches!(self, Self::Void)
    }

    #[inline]
    pub const fn as_integer(self) -> Option<i32> {
        match self {
            Self::Integer(n) => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_reference(self) -> Option<ObjRef> {
        match self {
            Self::Reference(_, obj) => Some(obj),
            _ => None,
        }
    }

    /// Class of an AppObject reference.
    #[inline]
    pub const fn app_class(self) -> Option<ClassRef> {
        match self {
            Self::Reference(ClassTag::App(class), _) => Some(class),
            _ => None,
        }
    }

    #[inline]
    pub const fn internal_kind(self) -> Option<InternalKind> {
        match self {
            Self::Reference(ClassTag::Internal(kind), _) => Some(kind),
            _ => None,
        }
    }

    /// Short kind name used in diagnostics.
    pub const fn kind_name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Void => "void",
            Self::Integer(_) => "integer",
            Self::Reference(ClassTag::App(_), _) => "object",
            Self::Reference(ClassTag::Internal(kind), _) => kind.name(),
        }
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Integer(n)
    }
}
