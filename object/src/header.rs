/// Internal object kinds, stored in bits 0..7 of a non-AppObject header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InternalKind {
    Class = 1,
    Handler,
    String,
    Array,
}

impl InternalKind {
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Class),
            2 => Some(Self::Handler),
            3 => Some(Self::String),
            4 => Some(Self::Array),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Handler => "handler",
            Self::String => "string",
            Self::Array => "array",
        }
    }
}

const KIND_MASK: u64 = 0xff;
const APP_OBJECT_BIT: u64 = 1 << 8;
const SIZE_SHIFT: u32 = 9;
const SIZE_MASK: u64 = (1 << 23) - 1;
const CLASS_INDEX_SHIFT: u32 = 32;

/// Largest object size representable in a header, in words.
pub const MAX_OBJECT_WORDS: u32 = SIZE_MASK as u32;

/// The header word at the start of every heap object.
///
/// ```text
/// bits  0..7:  internal kind (0 for AppObjects)
/// bit   8:     AppObject discriminator
/// bits  9..31: size in words, header included
/// bits 32..63: class-table index (AppObjects only)
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ObjectHeader(u64);

impl ObjectHeader {
    #[inline(always)]
    pub const fn app_object(class_index: u32, size_words: u32) -> Self {
        debug_assert!(size_words <= MAX_OBJECT_WORDS);
        Self(
            APP_OBJECT_BIT
                | ((size_words as u64 & SIZE_MASK) << SIZE_SHIFT)
                | ((class_index as u64) << CLASS_INDEX_SHIFT),
        )
    }

    #[inline(always)]
    pub const fn internal(kind: InternalKind, size_words: u32) -> Self {
        debug_assert!(size_words <= MAX_OBJECT_WORDS);
        Self(kind as u64 | ((size_words as u64 & SIZE_MASK) << SIZE_SHIFT))
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn is_app_object(self) -> bool {
        self.0 & APP_OBJECT_BIT != 0
    }

    /// Internal kind, `None` for AppObjects or an unknown kind byte.
    #[inline(always)]
    pub const fn kind(self) -> Option<InternalKind> {
        if self.is_app_object() {
            return None;
        }
        InternalKind::from_u8((self.0 & KIND_MASK) as u8)
    }

    #[inline(always)]
    pub const fn size_words(self) -> u32 {
        ((self.0 >> SIZE_SHIFT) & SIZE_MASK) as u32
    }

    #[inline(always)]
    pub const fn class_index(self) -> Option<u32> {
        if self.is_app_object() {
            Some((self.0 >> CLASS_INDEX_SHIFT) as u32)
        } else {
            None
        }
    }
}

impl core::fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("ObjectHeader");
        match self.class_index() {
            Some(index) => s.field("class_index", &index),
            None => s.field("kind", &self.kind()),
        };
        s.field("size_words", &self.size_words()).finish()
    }
}
