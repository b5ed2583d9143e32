use crate::header::{InternalKind, ObjectHeader};
use crate::memory::{ClassRef, Memory, ObjRef, ObjectError};
use crate::value::{Value, Word};

// ── AppObject ──────────────────────────────────────────────────────

/// An instance of an application class.
///
/// ```text
/// [header] [field_0] [field_1] ... [field_N-1]
/// ```
///
/// Fields hold value [`Word`]s. Superclass fields come first, see
/// [`field_offset`](crate::field_offset).
pub struct AppObjectView<'m, M: Memory + ?Sized> {
    mem: &'m M,
    obj: ObjRef,
    header: ObjectHeader,
}

impl<'m, M: Memory + ?Sized> AppObjectView<'m, M> {
    pub fn new(mem: &'m M, obj: ObjRef) -> Result<Self, ObjectError> {
        let header = obj.header(mem)?;
        if !header.is_app_object() {
            return Err(ObjectError::WrongKind {
                addr: obj.addr(),
                expected: "application object",
            });
        }
        Ok(Self { mem, obj, header })
    }

    #[inline(always)]
    pub fn obj(&self) -> ObjRef {
        self.obj
    }

    #[inline(always)]
    pub fn class_index(&self) -> u32 {
        self.header.class_index().unwrap_or_default()
    }

    #[inline(always)]
    pub fn field_count(&self) -> u32 {
        self.header.size_words().saturating_sub(1)
    }

    fn field_addr(&self, index: u32) -> Result<u32, ObjectError> {
        if index >= self.field_count() {
            return Err(ObjectError::OutOfBounds(
                self.obj.addr().saturating_add(index).saturating_add(1),
            ));
        }
        self.obj.word(1 + index)
    }

    pub fn field(&self, index: u32) -> Result<Value, ObjectError> {
        let raw = self.mem.read(self.field_addr(index)?)?;
        Value::from_word(Word::from_raw(raw)).map_err(|_| ObjectError::Corrupt {
            addr: self.obj.addr(),
            reason: "field holds a non-value word",
        })
    }

    pub fn set_field(&self, index: u32, value: Value) -> Result<(), ObjectError> {
        self.mem.write(self.field_addr(index)?, value.to_word().raw())
    }
}

/// Words needed for an instance with `field_count` fields.
pub const fn app_object_words(field_count: u32) -> u32 {
    1 + field_count
}

/// Initialize an AppObject at a fresh allocation; all fields start `Null`.
pub fn init_app_object<M: Memory + ?Sized>(
    mem: &M,
    obj: ObjRef,
    class_index: u32,
    field_count: u32,
) -> Result<(), ObjectError> {
    let header = ObjectHeader::app_object(class_index, app_object_words(field_count));
    mem.write(obj.addr(), header.raw())?;
    let null = Value::Null.to_word().raw();
    for i in 0..field_count {
        mem.write(obj.word(1 + i)?, null)?;
    }
    Ok(())
}

/// Build the reference value of an AppObject, recovering its class from the
/// header through `class_at`.
pub fn app_object_value<M: Memory + ?Sized>(
    mem: &M,
    obj: ObjRef,
    class_at: impl Fn(u32) -> Option<ClassRef>,
) -> Result<Value, ObjectError> {
    let view = AppObjectView::new(mem, obj)?;
    let index = view.class_index();
    let class = class_at(index).ok_or(ObjectError::UnknownClassIndex(index))?;
    Ok(Value::app_object(class, obj))
}

// ── String ─────────────────────────────────────────────────────────

/// An immutable UTF-8 string.
///
/// ```text
/// [header] [byte_length] [bytes 0..8] [bytes 8..16] ...
/// ```
///
/// Bytes are packed little-endian, eight per word.
pub struct StringView<'m, M: Memory + ?Sized> {
    mem: &'m M,
    obj: ObjRef,
    len: u32,
}

impl<'m, M: Memory + ?Sized> StringView<'m, M> {
    pub fn new(mem: &'m M, obj: ObjRef) -> Result<Self, ObjectError> {
        obj.expect_kind(mem, InternalKind::String)?;
        let len = mem.read(obj.word(1)?)? as u32;
        Ok(Self { mem, obj, len })
    }

    #[inline(always)]
    pub fn obj(&self) -> ObjRef {
        self.obj
    }

    #[inline(always)]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> Result<Vec<u8>, ObjectError> {
        let mut out = Vec::with_capacity(self.len as usize);
        let mut word_index = 2;
        while out.len() < self.len as usize {
            let word = self.mem.read(self.obj.word(word_index)?)?.to_le_bytes();
            let take = (self.len as usize - out.len()).min(8);
            out.extend_from_slice(&word[..take]);
            word_index += 1;
        }
        Ok(out)
    }

    pub fn to_owned_string(&self) -> Result<String, ObjectError> {
        String::from_utf8(self.bytes()?)
            .map_err(|_| ObjectError::InvalidUtf8(self.obj.addr()))
    }

    /// Compare with `other` without allocating.
    pub fn eq_str(&self, other: &str) -> Result<bool, ObjectError> {
        let other = other.as_bytes();
        if other.len() != self.len as usize {
            return Ok(false);
        }
        for (i, chunk) in other.chunks(8).enumerate() {
            let word = self.mem.read(self.obj.word(2 + i as u32)?)?.to_le_bytes();
            if &word[..chunk.len()] != chunk {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Words needed for a string of `byte_len` bytes.
pub const fn string_object_words(byte_len: u32) -> u32 {
    2 + byte_len.div_ceil(8)
}

pub fn init_string<M: Memory + ?Sized>(
    mem: &M,
    obj: ObjRef,
    text: &str,
) -> Result<(), ObjectError> {
    let len = text.len() as u32;
    let header = ObjectHeader::internal(InternalKind::String, string_object_words(len));
    mem.write(obj.addr(), header.raw())?;
    mem.write(obj.word(1)?, len as u64)?;
    for (i, chunk) in text.as_bytes().chunks(8).enumerate() {
        let mut bytes = [0u8; 8];
        bytes[..chunk.len()].copy_from_slice(chunk);
        mem.write(obj.word(2 + i as u32)?, u64::from_le_bytes(bytes))?;
    }
    Ok(())
}

// ── Array ──────────────────────────────────────────────────────────

/// A fixed-length array of values.
///
/// ```text
/// [header] [length] [elem_0] [elem_1] ...
/// ```
pub struct ArrayView<'m, M: Memory + ?Sized> {
    mem: &'m M,
    obj: ObjRef,
    len: u32,
}

impl<'m, M: Memory + ?Sized> ArrayView<'m, M> {
    pub fn new(mem: &'m M, obj: ObjRef) -> Result<Self, ObjectError> {
        obj.expect_kind(mem, InternalKind::Array)?;
        let len = mem.read(obj.word(1)?)? as u32;
        Ok(Self { mem, obj, len })
    }

    #[inline(always)]
    pub fn obj(&self) -> ObjRef {
        self.obj
    }

    #[inline(always)]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn element_addr(&self, index: u32) -> Result<u32, ObjectError> {
        if index >= self.len {
            return Err(ObjectError::OutOfBounds(
                self.obj.addr().saturating_add(2).saturating_add(index),
            ));
        }
        self.obj.word(2 + index)
    }

    pub fn get(&self, index: u32) -> Result<Value, ObjectError> {
        let raw = self.mem.read(self.element_addr(index)?)?;
        Value::from_word(Word::from_raw(raw)).map_err(|_| ObjectError::Corrupt {
            addr: self.obj.addr(),
            reason: "array element holds a non-value word",
        })
    }

    pub fn set(&self, index: u32, value: Value) -> Result<(), ObjectError> {
        self.mem.write(self.element_addr(index)?, value.to_word().raw())
    }

    pub fn to_vec(&self) -> Result<Vec<Value>, ObjectError> {
        (0..self.len).map(|i| self.get(i)).collect()
    }
}

pub const fn array_object_words(len: u32) -> u32 {
    2 + len
}

pub fn init_array<M: Memory + ?Sized>(
    mem: &M,
    obj: ObjRef,
    elements: &[Value],
) -> Result<(), ObjectError> {
    let len = elements.len() as u32;
    let header = ObjectHeader::internal(InternalKind::Array, array_object_words(len));
    mem.write(obj.addr(), header.raw())?;
    mem.write(obj.word(1)?, len as u64)?;
    for (i, element) in elements.iter().enumerate() {
        mem.write(obj.word(2 + i as u32)?, element.to_word().raw())?;
    }
    Ok(())
}
