//! In-process image loading: class and handler definitions written into the
//! arena, plus the class and string tables that index them.

use object::{
    ClassInit, ClassRef, Counts, HandlerFlags, HandlerInfo, HandlerInit,
    HandlerInitBody, HandlerRef, Image, TableEntry, Visibility,
    argument_count, class_object_words, init_class, init_handler,
};

use crate::heap::{HeapError, HeapInner};

/// What a handler executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerSource {
    /// VMIL instruction words.
    Vmil(Vec<u32>),
    /// Name of a routine in the native registry.
    Native(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDef {
    pub selector: String,
    pub visibility: Visibility,
    pub locals: u16,
    pub entrypoint: bool,
    pub source: HandlerSource,
}

impl HandlerDef {
    pub fn vmil(selector: impl Into<String>, locals: u16, code: Vec<u32>) -> Self {
        Self {
            selector: selector.into(),
            visibility: Visibility::Public,
            locals,
            entrypoint: false,
            source: HandlerSource::Vmil(code),
        }
    }

    pub fn native(selector: impl Into<String>, routine: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            visibility: Visibility::Public,
            locals: 0,
            entrypoint: false,
            source: HandlerSource::Native(routine.into()),
        }
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn entrypoint(mut self) -> Self {
        self.entrypoint = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: String,
    pub visibility: Visibility,
    pub fields: u16,
    pub superclasses: Vec<String>,
    pub handlers: Vec<HandlerDef>,
    /// Receives `(selector, arguments)` for messages nothing else accepts.
    pub default_handler: Option<HandlerDef>,
    pub inner_classes: Vec<ClassDef>,
}

impl ClassDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: Visibility::Public,
            fields: 0,
            superclasses: Vec::new(),
            handlers: Vec::new(),
            default_handler: None,
            inner_classes: Vec::new(),
        }
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn fields(mut self, fields: u16) -> Self {
        self.fields = fields;
        self
    }

    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.superclasses.push(superclass.into());
        self
    }

    pub fn handler(mut self, handler: HandlerDef) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn default_handler(mut self, handler: HandlerDef) -> Self {
        self.default_handler = Some(handler);
        self
    }

    pub fn inner(mut self, class: ClassDef) -> Self {
        self.inner_classes.push(class);
        self
    }
}

fn table_len(class: &str, kind: &'static str, len: usize) -> Result<u16, HeapError> {
    u16::try_from(len).map_err(|_| HeapError::TableOverflow {
        class: class.to_owned(),
        kind,
    })
}

impl HeapInner {
    /// Write `def` and everything it contains into the arena and register it
    /// as a top-level class.
    ///
    /// Superclasses are recorded by name only and may be defined later.
    pub fn define_class(&self, def: &ClassDef) -> Result<ClassRef, HeapError> {
        if self.class_named(&def.name).is_some() {
            return Err(HeapError::DuplicateClass(def.name.clone()));
        }
        let class = self.write_class(def)?;
        self.tables.write().by_name.insert(def.name.clone(), class);
        log::debug!("image: defined class {} at {}", def.name, class.addr());
        Ok(class)
    }

    fn write_class(&self, def: &ClassDef) -> Result<ClassRef, HeapError> {
        let counts = Counts {
            fields: def.fields,
            superclasses: table_len(&def.name, "superclass", def.superclasses.len())?,
            handlers: table_len(&def.name, "handler", def.handlers.len())?,
            inner_classes: table_len(&def.name, "inner class", def.inner_classes.len())?,
        };
        let class = ClassRef::new(self.allocate(class_object_words(counts))?);

        let superclasses = def
            .superclasses
            .iter()
            .map(|name| {
                Ok(TableEntry {
                    visibility: Visibility::Public,
                    name: self.intern(name)?,
                    target: 0,
                })
            })
            .collect::<Result<Vec<_>, HeapError>>()?;

        let handlers = def
            .handlers
            .iter()
            .map(|handler| {
                Ok(TableEntry {
                    visibility: handler.visibility,
                    name: self.intern(&handler.selector)?,
                    target: self.write_handler(handler, class, false)?.addr(),
                })
            })
            .collect::<Result<Vec<_>, HeapError>>()?;

        let default_handler = def
            .default_handler
            .as_ref()
            .map(|handler| self.write_handler(handler, class, true))
            .transpose()?;

        let inner_classes = def
            .inner_classes
            .iter()
            .map(|inner| {
                Ok(TableEntry {
                    visibility: inner.visibility,
                    name: self.intern(&inner.name)?,
                    target: self.write_class(inner)?.addr(),
                })
            })
            .collect::<Result<Vec<_>, HeapError>>()?;

        let name = self.intern(&def.name)?;
        let class_index = {
            let mut tables = self.tables.write();
            tables.classes.push(class);
            tables.classes.len() as u32 - 1
        };
        init_class(self, class.obj(), &ClassInit {
            visibility: def.visibility,
            name,
            field_count: def.fields,
            class_index,
            default_handler,
            superclasses: &superclasses,
            handlers: &handlers,
            inner_classes: &inner_classes,
        })?;
        Ok(class)
    }

    fn write_handler(
        &self,
        def: &HandlerDef,
        declaring: ClassRef,
        default: bool,
    ) -> Result<HandlerRef, HeapError> {
        // a default handler always takes (selector, arguments)
        let arg_count = if default { 2 } else { argument_count(&def.selector)? };
        let arg_count = u16::try_from(arg_count).map_err(|_| HeapError::TableOverflow {
            class: def.selector.clone(),
            kind: "argument",
        })?;
        let mut flags = HandlerFlags::NONE;
        if default {
            flags = flags.with(HandlerFlags::DEFAULT);
        }
        if def.entrypoint {
            flags = flags.with(HandlerFlags::ENTRYPOINT);
        }
        let body = match &def.source {
            HandlerSource::Vmil(code) => HandlerInitBody::Vmil(code),
            HandlerSource::Native(routine) => HandlerInitBody::Native {
                routine: self.intern(routine)?,
            },
        };
        let init = HandlerInit {
            visibility: def.visibility,
            name: self.intern(&def.selector)?,
            info: HandlerInfo {
                flags,
                arg_count,
                local_count: def.locals,
            },
            declaring,
            body,
        };
        if init.words() > object::MAX_OBJECT_WORDS {
            return Err(HeapError::TooLarge(init.words()));
        }
        let obj = self.allocate(init.words())?;
        init_handler(self, obj, &init)?;
        Ok(HandlerRef::new(obj))
    }

    /// Declared handler of a top-level class by selector, ignoring
    /// visibility. Used by hosts to find entry points.
    pub fn handler_named(&self, class: &str, selector: &str) -> Result<Option<HandlerRef>, HeapError> {
        let Some(class) = self.class_named(class) else {
            return Ok(None);
        };
        let view = object::ClassView::new(self, class.obj())?;
        for entry in view.handlers() {
            let entry = entry?;
            if object::string_at(self, entry.name)? == selector {
                return Ok(Some(HandlerRef::new(object::ObjRef::new(entry.target))));
            }
        }
        Ok(None)
    }
}
