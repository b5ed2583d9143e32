use crate::class::{NameWord, Visibility};
use crate::header::{InternalKind, ObjectHeader};
use crate::memory::{ClassRef, HandlerRef, Memory, ObjRef, ObjectError};

/// Handler flags, stored in the low byte of the info word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct HandlerFlags(pub u8);

impl HandlerFlags {
    pub const NONE: Self = Self(0);
    /// Body is an external routine, not VMIL.
    pub const NATIVE: Self = Self(1 << 0);
    /// Receives the literal selector and a reified argument array.
    pub const DEFAULT: Self = Self(1 << 1);
    pub const ENTRYPOINT: Self = Self(1 << 2);

    #[inline(always)]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    #[inline(always)]
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    #[inline(always)]
    pub const fn without(self, flag: Self) -> Self {
        Self(self.0 & !flag.0)
    }
}

/// The info word of a handler.
///
/// ```text
/// bits  0..7:  flags
/// bits  8..23: declared argument count
/// bits 24..39: local-variable count
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerInfo {
    pub flags: HandlerFlags,
    pub arg_count: u16,
    pub local_count: u16,
}

impl HandlerInfo {
    #[inline(always)]
    pub const fn pack(self) -> u64 {
        self.flags.0 as u64 | (self.arg_count as u64) << 8 | (self.local_count as u64) << 24
    }

    #[inline(always)]
    pub const fn unpack(word: u64) -> Self {
        Self {
            flags: HandlerFlags(word as u8),
            arg_count: (word >> 8) as u16,
            local_count: (word >> 24) as u16,
        }
    }
}

pub const HANDLER_NAME_WORD: u32 = 1;
pub const HANDLER_INFO_WORD: u32 = 2;
pub const HANDLER_CLASS_WORD: u32 = 3;
pub const HANDLER_BODY_WORD: u32 = 4;
pub const HANDLER_CODE_START: u32 = 5;

/// Words needed for a handler object.
///
/// ```text
/// [header] [name] [info] [declaring class] [instruction count | routine name]
/// [instruction_0] [instruction_1] ...
/// ```
pub const fn handler_object_words(instruction_count: u32) -> u32 {
    HANDLER_CODE_START + instruction_count
}

/// What a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerBody {
    Vmil { instruction_count: u32 },
    /// String-table index of the external routine name.
    Native { routine: u32 },
}

/// Read-only view of a handler object.
///
/// The interpreter keeps one per active handler, so the metadata words are
/// decoded once and instructions are fetched on demand.
pub struct HandlerView<'m, M: Memory + ?Sized> {
    mem: &'m M,
    handler: HandlerRef,
    name: NameWord,
    info: HandlerInfo,
    declaring: ClassRef,
    body: HandlerBody,
}

impl<'m, M: Memory + ?Sized> HandlerView<'m, M> {
    pub fn new(mem: &'m M, obj: ObjRef) -> Result<Self, ObjectError> {
        obj.expect_kind(mem, InternalKind::Handler)?;
        let name = NameWord(mem.read(obj.word(HANDLER_NAME_WORD)?)?);
        let info = HandlerInfo::unpack(mem.read(obj.word(HANDLER_INFO_WORD)?)?);
        let declaring = ClassRef::new(ObjRef::new(
            mem.read(obj.word(HANDLER_CLASS_WORD)?)? as u32,
        ));
        let body_word = mem.read(obj.word(HANDLER_BODY_WORD)?)? as u32;
        let body = if info.flags.contains(HandlerFlags::NATIVE) {
            HandlerBody::Native { routine: body_word }
        } else {
            HandlerBody::Vmil {
                instruction_count: body_word,
            }
        };
        Ok(Self {
            mem,
            handler: HandlerRef::new(obj),
            name,
            info,
            declaring,
            body,
        })
    }

    #[inline(always)]
    pub fn handler(&self) -> HandlerRef {
        self.handler
    }

    #[inline(always)]
    pub fn name_index(&self) -> u32 {
        self.name.name()
    }

    pub fn visibility(&self) -> Result<Visibility, ObjectError> {
        self.name.visibility().ok_or(ObjectError::Corrupt {
            addr: self.handler.addr(),
            reason: "invalid handler visibility",
        })
    }

    #[inline(always)]
    pub fn info(&self) -> HandlerInfo {
        self.info
    }

    #[inline(always)]
    pub fn arg_count(&self) -> u32 {
        self.info.arg_count as u32
    }

    #[inline(always)]
    pub fn local_count(&self) -> u32 {
        self.info.local_count as u32
    }

    #[inline(always)]
    pub fn is_native(&self) -> bool {
        self.info.flags.contains(HandlerFlags::NATIVE)
    }

    #[inline(always)]
    pub fn is_default(&self) -> bool {
        self.info.flags.contains(HandlerFlags::DEFAULT)
    }

    #[inline(always)]
    pub fn is_entrypoint(&self) -> bool {
        self.info.flags.contains(HandlerFlags::ENTRYPOINT)
    }

    #[inline(always)]
    pub fn declaring_class(&self) -> ClassRef {
        self.declaring
    }

    #[inline(always)]
    pub fn body(&self) -> HandlerBody {
        self.body
    }

    /// Instruction word at `pc`, `None` past the end of the body or for a
    /// native handler.
    pub fn instruction(&self, pc: u32) -> Result<Option<u32>, ObjectError> {
        match self.body {
            HandlerBody::Vmil { instruction_count } if pc < instruction_count => {
                let word = self.mem.read(self.handler.obj().word(HANDLER_CODE_START + pc)?)?;
                Ok(Some(word as u32))
            }
            _ => Ok(None),
        }
    }
}

/// Everything needed to lay out a handler object.
#[derive(Debug, Clone, Copy)]
pub struct HandlerInit<'a> {
    pub visibility: Visibility,
    pub name: u32,
    pub info: HandlerInfo,
    pub declaring: ClassRef,
    pub body: HandlerInitBody<'a>,
}

#[derive(Debug, Clone, Copy)]
pub enum HandlerInitBody<'a> {
    Vmil(&'a [u32]),
    Native { routine: u32 },
}

impl HandlerInit<'_> {
    pub fn words(&self) -> u32 {
        match self.body {
            HandlerInitBody::Vmil(code) => handler_object_words(code.len() as u32),
            HandlerInitBody::Native { .. } => handler_object_words(0),
        }
    }
}

/// Write a handler object into `obj`, which must span
/// [`HandlerInit::words`] words.
pub fn init_handler<M: Memory + ?Sized>(
    mem: &M,
    obj: ObjRef,
    init: &HandlerInit<'_>,
) -> Result<(), ObjectError> {
    let mut info = init.info;
    let body_word = match init.body {
        HandlerInitBody::Vmil(code) => {
            info.flags = info.flags.without(HandlerFlags::NATIVE);
            code.len() as u64
        }
        HandlerInitBody::Native { routine } => {
            info.flags = info.flags.with(HandlerFlags::NATIVE);
            routine as u64
        }
    };
    let header = ObjectHeader::internal(InternalKind::Handler, init.words());
    mem.write(obj.addr(), header.raw())?;
    mem.write(obj.word(HANDLER_NAME_WORD)?, NameWord::new(init.visibility, init.name).0)?;
    mem.write(obj.word(HANDLER_INFO_WORD)?, info.pack())?;
    mem.write(obj.word(HANDLER_CLASS_WORD)?, init.declaring.addr() as u64)?;
    mem.write(obj.word(HANDLER_BODY_WORD)?, body_word)?;
    if let HandlerInitBody::Vmil(code) = init.body {
        for (pc, word) in code.iter().enumerate() {
            mem.write(obj.word(HANDLER_CODE_START + pc as u32)?, *word as u64)?;
        }
    }
    Ok(())
}
