//! Host routines that native-delegate handlers bind to by name.

use std::collections::HashMap;

use heap::HeapInner;
use object::{ArrayView, InternalKind, StringView, Value};

use crate::{
    error::{Fault, Trap},
    interpreter::Interpreter,
};

mod array;
mod exception;
mod integer;
mod object_ops;
mod string;
mod system;

pub use system::describe;

pub type NativeFunction = fn(&mut NativeContext<'_, '_>) -> Result<Value, Trap>;

// the receiver does not count as an argument
// e.g. `add:1` => arity 1
#[derive(Debug, Copy, Clone)]
pub struct NativeRoutine {
    pub name: &'static str,
    pub arity: usize,
    pub ptr: NativeFunction,
}

impl NativeRoutine {
    pub const fn new(name: &'static str, arity: usize, ptr: NativeFunction) -> Self {
        Self { name, arity, ptr }
    }
}

pub const BUILTINS: &[NativeRoutine] = &[
    NativeRoutine::new("integer.add", 1, integer::add),
    NativeRoutine::new("integer.sub", 1, integer::sub),
    NativeRoutine::new("integer.mul", 1, integer::mul),
    NativeRoutine::new("integer.div", 1, integer::div),
    NativeRoutine::new("integer.rem", 1, integer::rem),
    NativeRoutine::new("integer.eq", 1, integer::eq),
    NativeRoutine::new("integer.lt", 1, integer::lt),
    NativeRoutine::new("string.length", 0, string::length),
    NativeRoutine::new("string.concat", 1, string::concat),
    NativeRoutine::new("string.eq", 1, string::eq),
    NativeRoutine::new("array.length", 0, array::length),
    NativeRoutine::new("array.at", 1, array::at),
    NativeRoutine::new("array.at_put", 2, array::at_put),
    NativeRoutine::new("object.identical", 1, object_ops::identical),
    NativeRoutine::new("exception.message", 0, exception::message),
    NativeRoutine::new("system.print", 0, system::print),
];

/// Native routines by name. Built once per session and shared read-only by
/// every interpreter thread.
#[derive(Debug, Clone, Default)]
pub struct NativeRegistry {
    routines: HashMap<&'static str, NativeRoutine>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for routine in BUILTINS {
            registry.register(*routine);
        }
        registry
    }

    /// Returns the routine previously registered under the same name.
    pub fn register(&mut self, routine: NativeRoutine) -> Option<NativeRoutine> {
        self.routines.insert(routine.name, routine)
    }

    pub fn get(&self, name: &str) -> Option<&NativeRoutine> {
        self.routines.get(name)
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }
}

pub struct NativeContext<'i, 'a> {
    pub interpreter: &'i mut Interpreter<'a>,
    pub receiver: Value,
    pub arguments: &'i [Value],
}

impl<'i, 'a> NativeContext<'i, 'a> {
    pub fn new(
        interpreter: &'i mut Interpreter<'a>,
        receiver: Value,
        arguments: &'i [Value],
    ) -> Self {
        Self {
            interpreter,
            receiver,
            arguments,
        }
    }

    pub fn heap(&self) -> &'a HeapInner {
        self.interpreter.heap()
    }

    pub fn argument(&self, index: usize) -> Result<Value, Trap> {
        self.arguments
            .get(index)
            .copied()
            .ok_or_else(|| Fault::program(format!("missing native argument {index}")).into())
    }

    /// Reentrant send; see [`Interpreter::send`].
    pub fn send(&mut self, receiver: Value, selector: &str, arguments: &[Value]) -> Result<Value, Trap> {
        self.interpreter.send(receiver, selector, arguments)
    }

    pub fn integer(&self, value: Value) -> Result<i32, Trap> {
        value
            .as_integer()
            .ok_or_else(|| Fault::cast("integer", value).into())
    }

    pub fn string(&self, value: Value) -> Result<String, Trap> {
        match value {
            Value::Reference(_, obj) if value.internal_kind() == Some(InternalKind::String) => {
                Ok(StringView::new(self.heap(), obj)?.to_owned_string()?)
            }
            _ => Err(Fault::cast("string", value).into()),
        }
    }

    pub fn array(&self, value: Value) -> Result<ArrayView<'a, HeapInner>, Trap> {
        match value {
            Value::Reference(_, obj) if value.internal_kind() == Some(InternalKind::Array) => {
                Ok(ArrayView::new(self.heap(), obj)?)
            }
            _ => Err(Fault::cast("array", value).into()),
        }
    }
}

#[inline]
pub(crate) fn boolean(flag: bool) -> Value {
    Value::Integer(flag as i32)
}
