//! Debugger control for one interpreter thread.
//!
//! The interpreter calls [`DebugControl::gate`] before every instruction while
//! the control is armed, with its stack lock released. A paused thread blocks
//! inside the gate until the debugger grants it a step, continues it or
//! detaches.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use object::HandlerRef;

use crate::stack::StackListener;

/// An instruction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub handler: HandlerRef,
    pub instruction_offset: u32,
}

impl Position {
    pub const fn new(handler: HandlerRef, instruction_offset: u32) -> Self {
        Self {
            handler,
            instruction_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Breakpoint,
    Step,
    Break,
}

/// Receives debugger events. Called on the interpreter thread; a
/// `paused` callback must not wait on the control that reported it.
pub trait DebugObserver: StackListener {
    fn paused(&self, _position: Position, _reason: PauseReason) {}
    fn resumed(&self, _position: Position) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DebugError {
    #[error("thread is not paused")]
    NotPaused,
    #[error("debugger is detached")]
    Detached,
    #[error("thread has finished")]
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Running,
    Stepping,
    Detached,
}

struct Gate {
    mode: Mode,
    break_requested: bool,
    /// Instructions the paused thread may run before pausing again.
    permits: u32,
    paused: Option<(Position, PauseReason)>,
    pauses: u64,
    finished: bool,
    /// instruction offset → handlers with a breakpoint there
    breakpoints: HashMap<u32, HashSet<HandlerRef>>,
}

impl Gate {
    fn wants_gate(&self) -> bool {
        self.mode != Mode::Detached
            && (self.mode == Mode::Stepping || self.break_requested || !self.breakpoints.is_empty())
    }

    fn has_breakpoint(&self, position: Position) -> bool {
        self.breakpoints
            .get(&position.instruction_offset)
            .is_some_and(|handlers| handlers.contains(&position.handler))
    }

    /// Position of a pause that has not been released yet.
    fn current(&self) -> Option<Position> {
        match self.paused {
            Some((position, _)) if self.permits == 0 => Some(position),
            _ => None,
        }
    }

    fn settled(&self, seen: u64) -> bool {
        self.pauses != seen || self.finished || self.mode == Mode::Detached
    }
}

pub struct DebugControl {
    gate: Mutex<Gate>,
    cv: Condvar,
    /// Mirrors `Gate::wants_gate` so the interpreter can skip the lock.
    armed: AtomicBool,
    observer: RwLock<Option<Arc<dyn DebugObserver>>>,
}

impl Default for DebugControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugControl {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(Gate {
                mode: Mode::Running,
                break_requested: false,
                permits: 0,
                paused: None,
                pauses: 0,
                finished: false,
                breakpoints: HashMap::new(),
            }),
            cv: Condvar::new(),
            armed: AtomicBool::new(false),
            observer: RwLock::new(None),
        }
    }

    #[inline(always)]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn sync_armed(&self, gate: &MutexGuard<'_, Gate>) {
        self.armed.store(gate.wants_gate(), Ordering::Release);
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn DebugObserver>>) {
        *self.observer.write() = observer;
    }

    fn observer(&self) -> Option<Arc<dyn DebugObserver>> {
        self.observer.read().clone()
    }

    // ── breakpoints ────────────────────────────────────────────────

    /// Returns `false` if the breakpoint was already set.
    pub fn set_breakpoint(&self, handler: HandlerRef, instruction_offset: u32) -> bool {
        let mut gate = self.gate.lock();
        let added = gate
            .breakpoints
            .entry(instruction_offset)
            .or_default()
            .insert(handler);
        self.sync_armed(&gate);
        added
    }

    pub fn clear_breakpoint(&self, handler: HandlerRef, instruction_offset: u32) -> bool {
        let mut gate = self.gate.lock();
        let removed = match gate.breakpoints.get_mut(&instruction_offset) {
            Some(handlers) => {
                let removed = handlers.remove(&handler);
                if handlers.is_empty() {
                    gate.breakpoints.remove(&instruction_offset);
                }
                removed
            }
            None => false,
        };
        self.sync_armed(&gate);
        removed
    }

    pub fn breakpoints(&self) -> Vec<Position> {
        let gate = self.gate.lock();
        let mut all: Vec<_> = gate
            .breakpoints
            .iter()
            .flat_map(|(&offset, handlers)| handlers.iter().map(move |&h| Position::new(h, offset)))
            .collect();
        all.sort_by_key(|p| (p.handler, p.instruction_offset));
        all
    }

    // ── interpreter side ───────────────────────────────────────────

    /// Called before the instruction at `position` runs. Blocks while the
    /// thread is paused there.
    pub fn gate(&self, position: Position) {
        let mut gate = self.gate.lock();
        let reason = match gate.mode {
            Mode::Detached => return,
            _ if gate.break_requested => PauseReason::Break,
            Mode::Stepping => PauseReason::Step,
            Mode::Running if gate.has_breakpoint(position) => PauseReason::Breakpoint,
            Mode::Running => return,
        };

        gate.break_requested = false;
        gate.mode = Mode::Stepping;
        gate.paused = Some((position, reason));
        gate.pauses += 1;
        self.sync_armed(&gate);
        self.cv.notify_all();
        log::debug!(
            "debug: paused at {}:{} ({reason:?})",
            position.handler.addr(),
            position.instruction_offset
        );

        let observer = self.observer();
        if let Some(observer) = &observer {
            MutexGuard::unlocked(&mut gate, || observer.paused(position, reason));
        }
        while gate.permits == 0 && gate.mode != Mode::Detached {
            self.cv.wait(&mut gate);
        }
        gate.permits = gate.permits.saturating_sub(1);
        gate.paused = None;
        self.cv.notify_all();
        drop(gate);

        if let Some(observer) = &observer {
            observer.resumed(position);
        }
    }

    /// The thread will not reach another gate.
    pub fn finish(&self) {
        let mut gate = self.gate.lock();
        gate.finished = true;
        gate.paused = None;
        self.cv.notify_all();
    }

    // ── debugger side ──────────────────────────────────────────────

    pub fn paused_at(&self) -> Option<Position> {
        self.gate.lock().current()
    }

    pub fn is_finished(&self) -> bool {
        self.gate.lock().finished
    }

    /// Wait until the thread pauses; `None` on timeout or when the thread
    /// can no longer pause.
    pub fn wait_paused(&self, timeout: Duration) -> Option<Position> {
        let deadline = Instant::now() + timeout;
        let mut gate = self.gate.lock();
        loop {
            if let Some(position) = gate.current() {
                return Some(position);
            }
            if gate.finished || gate.mode == Mode::Detached {
                return None;
            }
            if self.cv.wait_until(&mut gate, deadline).timed_out() {
                return gate.current();
            }
        }
    }

    /// Run exactly one instruction of the paused thread and return where it
    /// paused next. `Ok(None)` if the thread finished instead.
    pub fn step_one(&self) -> Result<Option<Position>, DebugError> {
        let mut gate = self.gate.lock();
        if gate.mode == Mode::Detached {
            return Err(DebugError::Detached);
        }
        if gate.current().is_none() {
            return Err(DebugError::NotPaused);
        }
        let seen = gate.pauses;
        gate.mode = Mode::Stepping;
        gate.permits += 1;
        self.cv.notify_all();
        while !gate.settled(seen) {
            self.cv.wait(&mut gate);
        }
        Ok(gate.current())
    }

    /// Leave stepping mode and let the thread run until the next
    /// breakpoint or break request.
    pub fn resume(&self) {
        let mut gate = self.gate.lock();
        if gate.mode == Mode::Detached {
            return;
        }
        gate.mode = Mode::Running;
        gate.break_requested = false;
        if gate.current().is_some() {
            gate.permits = 1;
        }
        self.sync_armed(&gate);
        self.cv.notify_all();
    }

    /// Pause the running thread at its next instruction boundary.
    pub fn break_into(&self) -> Result<Position, DebugError> {
        let mut gate = self.gate.lock();
        if gate.mode == Mode::Detached {
            return Err(DebugError::Detached);
        }
        if let Some(position) = gate.current() {
            return Ok(position);
        }
        if gate.finished {
            return Err(DebugError::Finished);
        }
        let seen = gate.pauses;
        gate.break_requested = true;
        self.sync_armed(&gate);
        while !gate.settled(seen) {
            self.cv.wait(&mut gate);
        }
        gate.current().ok_or(DebugError::Finished)
    }

    /// Drop every breakpoint, stop stepping and release a paused thread.
    /// Gates are no-ops until [`DebugControl::attach`].
    pub fn detach(&self) {
        let mut gate = self.gate.lock();
        gate.mode = Mode::Detached;
        gate.break_requested = false;
        gate.breakpoints.clear();
        self.sync_armed(&gate);
        self.cv.notify_all();
        drop(gate);
        self.set_observer(None);
    }

    pub fn attach(&self) {
        let mut gate = self.gate.lock();
        if gate.mode == Mode::Detached {
            gate.mode = Mode::Running;
        }
        self.sync_armed(&gate);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use object::ObjRef;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn handler(addr: u32) -> HandlerRef {
        HandlerRef::new(ObjRef::new(addr))
    }

    /// Runs offsets `0..len` of `h` through the gate like an interpreter
    /// would, recording what actually executed.
    fn run(
        control: Arc<DebugControl>,
        h: HandlerRef,
        len: u32,
    ) -> thread::JoinHandle<Vec<u32>> {
        thread::spawn(move || {
            let mut executed = Vec::new();
            for pc in 0..len {
                if control.is_armed() {
                    control.gate(Position::new(h, pc));
                }
                executed.push(pc);
            }
            control.finish();
            executed
        })
    }

    #[test]
    fn breakpoint_then_step_then_resume() {
        let control = Arc::new(DebugControl::new());
        let h = handler(10);
        assert!(control.set_breakpoint(h, 3));
        assert!(!control.set_breakpoint(h, 3));
        control.set_breakpoint(handler(11), 5);

        let worker = run(control.clone(), h, 8);
        assert_eq!(control.wait_paused(TIMEOUT), Some(Position::new(h, 3)));
        assert_eq!(control.step_one(), Ok(Some(Position::new(h, 4))));
        assert_eq!(control.step_one(), Ok(Some(Position::new(h, 5))));
        control.resume();
        assert_eq!(worker.join().unwrap(), (0..8).collect::<Vec<_>>());
        assert!(control.is_finished());
        assert_eq!(control.step_one(), Err(DebugError::NotPaused));
    }

    #[test]
    fn break_into_a_running_thread() {
        let control = Arc::new(DebugControl::new());
        let h = handler(20);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let control = control.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut pc = 0;
                while !stop.load(Ordering::Relaxed) {
                    if control.is_armed() {
                        control.gate(Position::new(h, pc));
                    }
                    pc += 1;
                }
                control.finish();
            })
        };

        let position = control.break_into().unwrap();
        assert_eq!(position.handler, h);
        assert_eq!(control.paused_at(), Some(position));
        let next = control.step_one().unwrap().unwrap();
        assert_eq!(next.instruction_offset, position.instruction_offset + 1);

        stop.store(true, Ordering::Relaxed);
        control.resume();
        worker.join().unwrap();
        assert!(control.is_finished());
    }

    #[test]
    fn detach_releases_a_paused_thread() {
        let control = Arc::new(DebugControl::new());
        let h = handler(30);
        control.set_breakpoint(h, 1);
        let worker = run(control.clone(), h, 4);
        assert_eq!(control.wait_paused(TIMEOUT), Some(Position::new(h, 1)));
        control.detach();
        assert!(!control.is_armed());
        assert!(control.breakpoints().is_empty());
        assert_eq!(worker.join().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(control.break_into(), Err(DebugError::Detached));
    }

    #[test]
    fn clearing_breakpoints_disarms() {
        let control = DebugControl::new();
        let h = handler(40);
        assert!(!control.is_armed());
        control.set_breakpoint(h, 0);
        assert!(control.is_armed());
        assert_eq!(control.breakpoints(), vec![Position::new(h, 0)]);
        assert!(control.clear_breakpoint(h, 0));
        assert!(!control.clear_breakpoint(h, 0));
        assert!(!control.is_armed());
    }

    #[derive(Default)]
    struct Pauses(Mutex<Vec<(u32, PauseReason)>>);

    impl StackListener for Pauses {}

    impl DebugObserver for Pauses {
        fn paused(&self, position: Position, reason: PauseReason) {
            self.0.lock().push((position.instruction_offset, reason));
        }
    }

    #[test]
    fn observer_sees_pause_reasons() {
        let control = Arc::new(DebugControl::new());
        let pauses = Arc::new(Pauses::default());
        control.set_observer(Some(pauses.clone()));
        let h = handler(50);
        control.set_breakpoint(h, 2);

        let worker = run(control.clone(), h, 5);
        control.wait_paused(TIMEOUT).unwrap();
        control.step_one().unwrap();
        control.resume();
        worker.join().unwrap();
        assert_eq!(*pauses.0.lock(), vec![
            (2, PauseReason::Breakpoint),
            (3, PauseReason::Step)
        ]);
    }
}
