use bytecode::BytecodeError;
use heap::HeapError;
use object::{ObjectError, Value};

use crate::stack::StackError;

/// A recoverable runtime failure.
///
/// Faults are turned into exception instances and thrown once; the class used
/// for each kind is configured through [`crate::ExceptionClasses`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("{receiver} does not understand {selector:?}")]
    MessageNotUnderstood {
        selector: String,
        receiver: &'static str,
    },
    #[error("expected {expected}, got {got}")]
    InvalidCast {
        expected: &'static str,
        got: &'static str,
    },
    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

impl Fault {
    pub fn not_understood(selector: impl Into<String>, receiver: Value) -> Self {
        Self::MessageNotUnderstood {
            selector: selector.into(),
            receiver: receiver.kind_name(),
        }
    }

    /// A selector without a valid `:<argCount>` suffix. No receiver can be
    /// located for it.
    pub fn malformed_selector(selector: impl Into<String>) -> Self {
        Self::MessageNotUnderstood {
            selector: selector.into(),
            receiver: "any receiver",
        }
    }

    pub fn cast(expected: &'static str, got: Value) -> Self {
        Self::InvalidCast {
            expected,
            got: got.kind_name(),
        }
    }

    pub fn program(reason: impl Into<String>) -> Self {
        Self::InvalidProgram(reason.into())
    }
}

/// A failure that ends the interpreter thread.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("unhandled exception: instance of {class}")]
    UnhandledException { class: String, value: Value },
    #[error("fault could not be delivered as an exception: {0}")]
    UnhandledFault(Fault),
    #[error("execution stack exhausted at {limit} words")]
    StackExhausted { limit: usize },
    #[error("corrupt execution stack: {0}")]
    CorruptStack(String),
    #[error("native call depth exceeded {0}")]
    NativeDepth(usize),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("invalid settings: {0}")]
    Settings(&'static str),
    #[error("class {0:?} is not defined")]
    UnknownClass(String),
    #[error("class {0:?} has no entry point")]
    NoEntryPoint(String),
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
    #[error("could not spawn interpreter thread: {0}")]
    Spawn(String),
    #[error("interpreter thread panicked")]
    ThreadPanicked,
}

/// Everything that can interrupt an instruction.
///
/// `Thrown` carries an exception across a reentrant call boundary: the
/// enclosing loop resumes unwinding with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    Fault(Fault),
    Thrown(Value),
    Fatal(VmError),
}

impl From<Fault> for Trap {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl From<VmError> for Trap {
    fn from(error: VmError) -> Self {
        Self::Fatal(error)
    }
}

impl From<StackError> for Trap {
    fn from(error: StackError) -> Self {
        match error {
            StackError::Underflow | StackError::BadLocal(_) | StackError::BadArgument(_) => {
                Self::Fault(Fault::program(error.to_string()))
            }
            StackError::Exhausted { limit } => Self::Fatal(VmError::StackExhausted { limit }),
            StackError::Corrupt(_) | StackError::Tag(_) => {
                Self::Fatal(VmError::CorruptStack(error.to_string()))
            }
        }
    }
}

impl From<ObjectError> for Trap {
    fn from(error: ObjectError) -> Self {
        match error {
            ObjectError::WrongKind { expected, .. } => Self::Fault(Fault::InvalidCast {
                expected,
                got: "another kind of object",
            }),
            ObjectError::OutOfBounds(_)
            | ObjectError::UnknownString(_)
            | ObjectError::UnknownClassIndex(_)
            | ObjectError::UnresolvedClass(_) => Self::Fault(Fault::program(error.to_string())),
            _ => Self::Fatal(VmError::Heap(HeapError::Object(error))),
        }
    }
}

impl From<HeapError> for Trap {
    fn from(error: HeapError) -> Self {
        match error {
            HeapError::Object(inner) => inner.into(),
            other => Self::Fatal(VmError::Heap(other)),
        }
    }
}
