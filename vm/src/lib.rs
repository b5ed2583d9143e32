pub mod bootstrap;
pub mod debug;
pub mod error;
pub mod interpreter;
pub mod natives;
pub mod stack;
pub mod thread;

#[cfg(test)]
mod testing;

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use heap::{ClassDef, Heap, HeapSettings};
use object::{ClassRef, ClassView, HandlerRef, HandlerView, ObjRef, Value};

pub use debug::{DebugControl, DebugError, DebugObserver, PauseReason, Position};
pub use error::{Fault, Trap, VmError};
pub use interpreter::{Interpreter, TRUTH_SELECTOR};
pub use natives::{NativeContext, NativeFunction, NativeRegistry, NativeRoutine, describe};
pub use stack::{ExecutionStack, ReturnAddress, StackError, StackListener, StackSettings};
pub use thread::{InterpreterThread, ThreadId, ThreadShared, ThreadState, YieldPoint};

/// Classes faults are delivered as. Each must extend the root exception.
#[derive(Debug, Clone)]
pub struct ExceptionClasses {
    pub message_not_understood: String,
    pub invalid_cast: String,
    pub invalid_program: String,
}

impl Default for ExceptionClasses {
    fn default() -> Self {
        Self {
            message_not_understood: "MessageNotUnderstood".to_owned(),
            invalid_cast: "InvalidCast".to_owned(),
            invalid_program: "InvalidProgram".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VmSettings {
    pub heap: HeapSettings,
    pub stack: StackSettings,
    /// Limit on nested native calls and reentrant sends per thread.
    pub max_native_depth: usize,
    /// Only instances of this class (or its subclasses) can be thrown.
    pub root_exception: String,
    pub exception_classes: ExceptionClasses,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            heap: HeapSettings::default(),
            stack: StackSettings::default(),
            max_native_depth: 256,
            root_exception: "Exception".to_owned(),
            exception_classes: ExceptionClasses::default(),
        }
    }
}

impl VmSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        self.heap.validate()?;
        self.stack.validate()?;
        if self.max_native_depth == 0 {
            return Err("max_native_depth must be > 0");
        }
        let classes = &self.exception_classes;
        if [
            &self.root_exception,
            &classes.message_not_understood,
            &classes.invalid_cast,
            &classes.invalid_program,
        ]
        .iter()
        .any(|name| name.is_empty())
        {
            return Err("exception class names must not be empty");
        }
        Ok(())
    }
}

/// Receives lines written by `system.print`.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything interpreter threads of one session share.
pub struct Runtime {
    pub heap: Heap,
    pub natives: NativeRegistry,
    pub settings: VmSettings,
    output: OutputSink,
}

impl Runtime {
    pub fn write_line(&self, line: &str) {
        (self.output)(line);
    }
}

/// A VM session: one heap, one native registry and the interpreter threads
/// created from it.
pub struct Vm {
    runtime: Arc<Runtime>,
    threads: Mutex<Vec<Weak<ThreadShared>>>,
    next_thread: AtomicU64,
}

impl Vm {
    pub fn new(settings: VmSettings) -> Result<Self, VmError> {
        Self::with_natives(settings, NativeRegistry::with_builtins())
    }

    pub fn with_natives(settings: VmSettings, natives: NativeRegistry) -> Result<Self, VmError> {
        Self::with_output(settings, natives, Arc::new(|line: &str| println!("{line}")))
    }

    pub fn with_output(
        settings: VmSettings,
        natives: NativeRegistry,
        output: OutputSink,
    ) -> Result<Self, VmError> {
        settings.validate().map_err(VmError::Settings)?;
        let heap = Heap::new(settings.heap.clone())?;
        bootstrap::bootstrap(&heap, &settings)?;
        Ok(Self {
            runtime: Arc::new(Runtime {
                heap,
                natives,
                settings,
                output,
            }),
            threads: Mutex::new(Vec::new()),
            next_thread: AtomicU64::new(1),
        })
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn heap(&self) -> &Heap {
        &self.runtime.heap
    }

    pub fn settings(&self) -> &VmSettings {
        &self.runtime.settings
    }

    // ── image ──────────────────────────────────────────────────────

    pub fn define_class(&self, def: &ClassDef) -> Result<ClassRef, VmError> {
        Ok(self.heap().define_class(def)?)
    }

    /// String-table index for `text`, for `PushLiteralString` operands.
    pub fn intern(&self, text: &str) -> Result<u32, VmError> {
        Ok(self.heap().intern(text)?)
    }

    pub fn class(&self, name: &str) -> Result<ClassRef, VmError> {
        self.heap()
            .class_named(name)
            .ok_or_else(|| VmError::UnknownClass(name.to_owned()))
    }

    pub fn instantiate(&self, class: &str) -> Result<Value, VmError> {
        Ok(self.heap().alloc_instance(self.class(class)?)?)
    }

    /// Declared handler of `class` for `selector`, regardless of visibility.
    pub fn handler(&self, class: &str, selector: &str) -> Result<HandlerRef, VmError> {
        self.heap()
            .handler_named(class, selector)?
            .ok_or_else(|| VmError::NoEntryPoint(format!("{class}>>{selector}")))
    }

    /// First handler of `class` flagged as an entry point.
    pub fn entrypoint(&self, class: &str) -> Result<HandlerRef, VmError> {
        let heap = self.heap();
        let view = ClassView::new(&**heap, self.class(class)?.obj())
            .map_err(heap::HeapError::from)?;
        for entry in view.handlers() {
            let entry = entry.map_err(heap::HeapError::from)?;
            let handler = HandlerRef::new(ObjRef::new(entry.target));
            let is_entry = HandlerView::new(&**heap, handler.obj())
                .map_err(heap::HeapError::from)?
                .is_entrypoint();
            if is_entry {
                return Ok(handler);
            }
        }
        Err(VmError::NoEntryPoint(class.to_owned()))
    }

    // ── execution ──────────────────────────────────────────────────

    fn fresh_stack(&self) -> Result<Mutex<ExecutionStack>, VmError> {
        let stack = ExecutionStack::new(&self.runtime.settings.stack).map_err(VmError::Settings)?;
        Ok(Mutex::new(stack))
    }

    /// Send `selector` to `receiver` on the calling thread.
    pub fn call(&self, receiver: Value, selector: &str, arguments: &[Value]) -> Result<Value, VmError> {
        let stack = self.fresh_stack()?;
        let mut interpreter = Interpreter::new(&self.runtime, stack.lock(), None);
        interpreter.call(receiver, selector, arguments)
    }

    /// Run `handler` on the calling thread.
    pub fn run(&self, handler: HandlerRef, receiver: Value, arguments: &[Value]) -> Result<Value, VmError> {
        let stack = self.fresh_stack()?;
        let mut interpreter = Interpreter::new(&self.runtime, stack.lock(), None);
        interpreter.run(handler, receiver, arguments)
    }

    /// Create a stopped interpreter thread that will run `handler`.
    pub fn spawn(
        &self,
        handler: HandlerRef,
        receiver: Value,
        arguments: Vec<Value>,
    ) -> Result<InterpreterThread, VmError> {
        let id = ThreadId(self.next_thread.fetch_add(1, Ordering::Relaxed));
        let thread = InterpreterThread::new(self.runtime.clone(), id, handler, receiver, arguments)?;
        let mut threads = self.threads.lock();
        threads.retain(|t| t.strong_count() > 0);
        threads.push(Arc::downgrade(thread.shared()));
        Ok(thread)
    }

    /// Threads of this session that are still referenced.
    pub fn threads(&self) -> Vec<Arc<ThreadShared>> {
        self.threads.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn thread(&self, id: ThreadId) -> Option<Arc<ThreadShared>> {
        self.threads().into_iter().find(|t| t.id() == id)
    }
}
