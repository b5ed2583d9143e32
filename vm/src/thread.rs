use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use object::{HandlerRef, Value};

use crate::{
    Runtime,
    debug::{DebugControl, DebugObserver, Position},
    error::VmError,
    interpreter::Interpreter,
    stack::ExecutionStack,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Created,
    Running,
    Dead,
}

/// Cooperative "return when possible" request.
///
/// When requested, the interpreter parks at its next outermost instruction
/// boundary, with its stack unlocked, until [`YieldPoint::release`].
#[derive(Default)]
pub struct YieldPoint {
    requested: AtomicBool,
    parked: Mutex<Option<Position>>,
    cv: Condvar,
}

impl YieldPoint {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn park(&self, position: Position) {
        let mut parked = self.parked.lock();
        *parked = Some(position);
        self.cv.notify_all();
        log::debug!(
            "thread: yielded at {}:{}",
            position.handler.addr(),
            position.instruction_offset
        );
        while self.requested.load(Ordering::Acquire) {
            self.cv.wait(&mut parked);
        }
        *parked = None;
    }

    /// Where the thread is parked, waiting up to `timeout` for it to get
    /// there.
    pub fn wait_parked(&self, timeout: Duration) -> Option<Position> {
        let deadline = Instant::now() + timeout;
        let mut parked = self.parked.lock();
        while parked.is_none() {
            if self.cv.wait_until(&mut parked, deadline).timed_out() {
                break;
            }
        }
        *parked
    }

    pub fn release(&self) {
        let _parked = self.parked.lock();
        self.requested.store(false, Ordering::Release);
        self.cv.notify_all();
    }
}

/// Per-thread hooks the interpreter checks at instruction boundaries.
#[derive(Default)]
pub struct ThreadControl {
    pub debug: DebugControl,
    pub yield_point: YieldPoint,
}

/// State shared between an interpreter thread and its owners.
pub struct ThreadShared {
    id: ThreadId,
    name: String,
    control: ThreadControl,
    stack: Mutex<ExecutionStack>,
    state: Mutex<ThreadState>,
}

impl ThreadShared {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub fn debug(&self) -> &DebugControl {
        &self.control.debug
    }

    pub fn yield_point(&self) -> &YieldPoint {
        &self.control.yield_point
    }

    /// Look at the stack. The interpreter holds the stack lock while it
    /// runs, so this only succeeds while the thread is paused, parked, not
    /// started or finished.
    pub fn inspect_stack<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&ExecutionStack) -> R,
    ) -> Option<R> {
        self.stack.try_lock_for(timeout).map(|stack| f(&stack))
    }
}

struct Entry {
    handler: HandlerRef,
    receiver: Value,
    arguments: Vec<Value>,
}

/// An interpreter running on its own OS thread.
///
/// Threads are created stopped so that breakpoints and observers can be
/// installed before the first instruction runs.
pub struct InterpreterThread {
    shared: Arc<ThreadShared>,
    runtime: Arc<Runtime>,
    entry: Option<Entry>,
    handle: Option<JoinHandle<Result<Value, VmError>>>,
}

impl InterpreterThread {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        id: ThreadId,
        handler: HandlerRef,
        receiver: Value,
        arguments: Vec<Value>,
    ) -> Result<Self, VmError> {
        let stack = ExecutionStack::new(&runtime.settings.stack).map_err(VmError::Settings)?;
        let shared = Arc::new(ThreadShared {
            id,
            name: format!("vmil-{}", id.0),
            control: ThreadControl::default(),
            stack: Mutex::new(stack),
            state: Mutex::new(ThreadState::Created),
        });
        Ok(Self {
            shared,
            runtime,
            entry: Some(Entry {
                handler,
                receiver,
                arguments,
            }),
            handle: None,
        })
    }

    pub fn id(&self) -> ThreadId {
        self.shared.id
    }

    pub fn shared(&self) -> &Arc<ThreadShared> {
        &self.shared
    }

    pub fn debug(&self) -> &DebugControl {
        self.shared.debug()
    }

    pub fn yield_point(&self) -> &YieldPoint {
        self.shared.yield_point()
    }

    pub fn state(&self) -> ThreadState {
        self.shared.state()
    }

    /// Install `observer` for pause events and stack traffic. Call before
    /// [`InterpreterThread::start`] or while the thread is paused.
    pub fn attach_observer<O: DebugObserver + 'static>(&self, observer: Arc<O>) {
        self.shared.control.debug.attach();
        self.shared.control.debug.set_observer(Some(observer.clone()));
        self.shared.stack.lock().set_listener(Some(observer));
    }

    pub fn start(&mut self) -> Result<(), VmError> {
        let Some(entry) = self.entry.take() else {
            return Ok(());
        };
        let shared = self.shared.clone();
        let runtime = self.runtime.clone();
        let handle = thread::Builder::new()
            .name(shared.name.clone())
            .spawn(move || run_thread(&runtime, &shared, entry))
            .map_err(|e| VmError::Spawn(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Start if needed and wait for the result.
    pub fn join(mut self) -> Result<Value, VmError> {
        self.start()?;
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| VmError::ThreadPanicked)?,
            None => Err(VmError::ThreadPanicked),
        }
    }
}

fn run_thread(runtime: &Runtime, shared: &ThreadShared, entry: Entry) -> Result<Value, VmError> {
    *shared.state.lock() = ThreadState::Running;
    log::debug!("thread: {} started", shared.name);
    let result = {
        let mut interpreter = Interpreter::new(runtime, shared.stack.lock(), Some(&shared.control));
        interpreter.run(entry.handler, entry.receiver, &entry.arguments)
    };
    shared.control.debug.finish();
    *shared.state.lock() = ThreadState::Dead;
    match &result {
        Ok(_) => log::debug!("thread: {} finished", shared.name),
        Err(e) => log::warn!("thread: {} died: {e}", shared.name),
    }
    result
}
