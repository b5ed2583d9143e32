//! Per-thread execution stack.
//!
//! Layout of one frame, growing upwards:
//!
//! ```text
//!   receiver, arg_1 .. arg_n          pushed by the sender
//!   OldFrameBoundary                  <- frame header (5 marker words)
//!   OldBasePointer
//!   ReturnHandler
//!   ReturnInstructionOffset
//!   ActualReturnHere
//!   local_0 .. local_m-1              <- base pointer
//!   try markers / operands            <- frame boundary
//! ```
//!
//! Operand pops never go below the frame boundary, so locals and markers of
//! the current frame can only be removed by frame and try bookkeeping.

use std::sync::Arc;

use object::{HandlerRef, Marker, ObjRef, TagError, Value, Word};

pub const FRAME_HEADER_WORDS: usize = 5;

#[derive(Debug, Clone)]
pub struct StackSettings {
    /// Words reserved up front.
    pub initial_words: usize,
    /// Hard limit; growing past it is fatal for the thread.
    pub max_words: usize,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            initial_words: 1024,
            max_words: 1 << 20,
        }
    }
}

impl StackSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.initial_words == 0 {
            return Err("initial_words must be > 0");
        }
        if self.initial_words > self.max_words {
            return Err("initial_words must not exceed max_words");
        }
        // registers are saved in the i32 payload of marker words
        if self.max_words > i32::MAX as usize {
            return Err("max_words must fit a signed 32-bit offset");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    #[error("operand stack underflow")]
    Underflow,
    #[error("stack exhausted at {limit} words")]
    Exhausted { limit: usize },
    #[error("no local {0} in the current frame")]
    BadLocal(u32),
    #[error("no argument {0} in the current frame")]
    BadArgument(u32),
    #[error("corrupt stack: {0}")]
    Corrupt(&'static str),
    #[error("corrupt stack: {0}")]
    Tag(#[from] TagError),
}

/// Where a popped frame returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnAddress {
    /// Handler to resume; `None` if the frame was entered from outside the
    /// loop.
    pub handler: Option<HandlerRef>,
    pub instruction_offset: u32,
    /// Set on frames that mark the outermost boundary of one invocation.
    pub actual_return_here: bool,
}

impl ReturnAddress {
    pub const fn resume(handler: HandlerRef, instruction_offset: u32) -> Self {
        Self {
            handler: Some(handler),
            instruction_offset,
            actual_return_here: false,
        }
    }

    pub const fn boundary(handler: Option<HandlerRef>, instruction_offset: u32) -> Self {
        Self {
            handler,
            instruction_offset,
            actual_return_here: true,
        }
    }
}

/// Observes value traffic on a stack. Purely observational.
pub trait StackListener: Send + Sync {
    fn value_pushed(&self, _value: Value) {}
    fn value_popped(&self, _value: Value) {}
    fn local_written(&self, _index: u32, _value: Value) {}
}

pub struct ExecutionStack {
    words: Vec<Word>,
    base_pointer: usize,
    frame_boundary: usize,
    max_words: usize,
    listener: Option<Arc<dyn StackListener>>,
}

impl ExecutionStack {
    pub fn new(settings: &StackSettings) -> Result<Self, &'static str> {
        settings.validate()?;
        Ok(Self {
            words: Vec::with_capacity(settings.initial_words),
            base_pointer: 0,
            frame_boundary: 0,
            max_words: settings.max_words,
            listener: None,
        })
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn StackListener>>) {
        self.listener = listener;
    }

    #[inline(always)]
    pub fn stack_pointer(&self) -> usize {
        self.words.len()
    }

    #[inline(always)]
    pub fn base_pointer(&self) -> usize {
        self.base_pointer
    }

    #[inline(always)]
    pub fn frame_boundary(&self) -> usize {
        self.frame_boundary
    }

    /// `(stack_pointer, base_pointer, frame_boundary)`.
    pub fn registers(&self) -> (usize, usize, usize) {
        (self.stack_pointer(), self.base_pointer, self.frame_boundary)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn push_word(&mut self, word: Word) -> Result<(), StackError> {
        if self.words.len() >= self.max_words {
            return Err(StackError::Exhausted {
                limit: self.max_words,
            });
        }
        if self.words.len() == self.words.capacity() {
            let target = (self.words.capacity() * 2).clamp(16, self.max_words);
            self.words.reserve_exact(target - self.words.len());
            log::debug!("stack: grown to {} words", self.words.capacity());
        }
        self.words.push(word);
        Ok(())
    }

    fn marker(marker: Marker, payload: usize) -> Word {
        marker.word(payload as i32)
    }

    fn read_marker(&self, index: usize, expected: Marker) -> Result<i32, StackError> {
        let word = *self
            .words
            .get(index)
            .ok_or(StackError::Corrupt("frame header out of range"))?;
        if word.tag().marker() != Some(expected) {
            return Err(StackError::Corrupt("frame header word has the wrong marker"));
        }
        Ok(word.payload())
    }

    fn read_value(&self, index: usize) -> Result<Value, StackError> {
        Ok(Value::from_word(self.words[index])?)
    }

    /// A try marker bounds the operands pushed after it.
    fn read_operand(&self, index: usize) -> Result<Value, StackError> {
        if self.words[index].tag().marker().is_some() {
            return Err(StackError::Underflow);
        }
        self.read_value(index)
    }

    // ── operands ───────────────────────────────────────────────────

    pub fn push(&mut self, value: Value) -> Result<(), StackError> {
        self.push_word(value.to_word())?;
        if let Some(listener) = &self.listener {
            listener.value_pushed(value);
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, StackError> {
        if self.words.len() <= self.frame_boundary {
            return Err(StackError::Underflow);
        }
        let index = self.words.len() - 1;
        let value = self.read_operand(index)?;
        self.words.truncate(index);
        if let Some(listener) = &self.listener {
            listener.value_popped(value);
        }
        Ok(value)
    }

    /// Value `depth` slots below the top, without popping.
    pub fn peek(&self, depth: usize) -> Result<Value, StackError> {
        let index = self
            .words
            .len()
            .checked_sub(depth + 1)
            .filter(|&i| i >= self.frame_boundary)
            .ok_or(StackError::Underflow)?;
        self.read_operand(index)
    }

    /// Pop `count` values, returned in push order.
    pub fn pop_many(&mut self, count: usize) -> Result<Vec<Value>, StackError> {
        let mut values = (0..count).map(|_| self.pop()).collect::<Result<Vec<_>, _>>()?;
        values.reverse();
        Ok(values)
    }

    // ── frames ─────────────────────────────────────────────────────

    /// Enter a callee whose receiver and arguments are already on the
    /// stack. `local_count` slots are reserved and set to `Null`.
    pub fn push_frame(
        &mut self,
        ret: ReturnAddress,
        local_count: u32,
    ) -> Result<(), StackError> {
        let handler = ret.handler.map_or(0, |h| h.addr() as usize);
        self.push_word(Self::marker(Marker::OldFrameBoundary, self.frame_boundary))?;
        self.push_word(Self::marker(Marker::OldBasePointer, self.base_pointer))?;
        self.push_word(Self::marker(Marker::ReturnHandler, handler))?;
        self.push_word(Self::marker(
            Marker::ReturnInstructionOffset,
            ret.instruction_offset as usize,
        ))?;
        self.push_word(Self::marker(
            Marker::ActualReturnHere,
            ret.actual_return_here as usize,
        ))?;
        self.base_pointer = self.words.len();
        for _ in 0..local_count {
            self.push_word(Value::Null.to_word())?;
        }
        self.frame_boundary = self.words.len();
        log::trace!(
            "stack: frame at {} ({} locals)",
            self.base_pointer,
            local_count
        );
        Ok(())
    }

    /// Leave the current frame.
    ///
    /// With `with_value`, the top value is popped first and pushed back onto
    /// the restored stack, directly above the callee's arguments.
    pub fn pop_frame(&mut self, with_value: bool) -> Result<ReturnAddress, StackError> {
        let value = if with_value { Some(self.pop()?) } else { None };
        let header = self
            .base_pointer
            .checked_sub(FRAME_HEADER_WORDS)
            .ok_or(StackError::Corrupt("no frame to pop"))?;

        let old_boundary = self.read_marker(header, Marker::OldFrameBoundary)?;
        let old_base = self.read_marker(header + 1, Marker::OldBasePointer)?;
        let handler = self.read_marker(header + 2, Marker::ReturnHandler)?;
        let offset = self.read_marker(header + 3, Marker::ReturnInstructionOffset)?;
        let actual = self.read_marker(header + 4, Marker::ActualReturnHere)?;
        if old_boundary < 0 || old_base < 0 || offset < 0 || handler < 0 {
            return Err(StackError::Corrupt("negative saved register"));
        }

        self.words.truncate(header);
        self.frame_boundary = old_boundary as usize;
        self.base_pointer = old_base as usize;
        if let Some(value) = value {
            self.push(value)?;
        }
        Ok(ReturnAddress {
            handler: (handler != 0).then(|| HandlerRef::new(ObjRef::new(handler as u32))),
            instruction_offset: offset as u32,
            actual_return_here: actual != 0,
        })
    }

    /// Drop the receiver and `arg_count` arguments of a frame that was just
    /// popped, keeping the return value (if any) on top.
    pub fn release_arguments(&mut self, arg_count: u32, has_value: bool) -> Result<(), StackError> {
        let value = if has_value { Some(self.pop()?) } else { None };
        for _ in 0..=arg_count {
            self.pop()?;
        }
        if let Some(value) = value {
            self.push(value)?;
        }
        Ok(())
    }

    // ── try markers ────────────────────────────────────────────────

    pub fn push_try(&mut self, catch_offset: u32) -> Result<(), StackError> {
        self.push_word(Self::marker(Marker::TryTarget, catch_offset as usize))
    }

    /// Remove the innermost try marker of the current frame, along with
    /// any operands above it. Never looks below the frame boundary.
    pub fn pop_try(&mut self) -> Result<Option<u32>, StackError> {
        let found = (self.frame_boundary..self.words.len())
            .rev()
            .find(|&i| self.words[i].tag().marker() == Some(Marker::TryTarget));
        let Some(index) = found else {
            return Ok(None);
        };
        let offset = self.words[index].payload();
        self.words.truncate(index);
        Ok(Some(offset as u32))
    }

    // ── frame slots ────────────────────────────────────────────────

    pub fn local_count(&self) -> usize {
        self.frame_boundary - self.base_pointer
    }

    pub fn local(&self, index: u32) -> Result<Value, StackError> {
        if index as usize >= self.local_count() {
            return Err(StackError::BadLocal(index));
        }
        self.read_value(self.base_pointer + index as usize)
    }

    pub fn set_local(&mut self, index: u32, value: Value) -> Result<(), StackError> {
        if index as usize >= self.local_count() {
            return Err(StackError::BadLocal(index));
        }
        self.words[self.base_pointer + index as usize] = value.to_word();
        if let Some(listener) = &self.listener {
            listener.local_written(index, value);
        }
        Ok(())
    }

    /// Argument `index` of the current frame, whose handler declares
    /// `arg_count` arguments. Index 0 is the receiver.
    pub fn argument(&self, arg_count: u32, index: u32) -> Result<Value, StackError> {
        if index > arg_count {
            return Err(StackError::BadArgument(index));
        }
        let receiver = self
            .base_pointer
            .checked_sub(FRAME_HEADER_WORDS + arg_count as usize + 1)
            .ok_or(StackError::BadArgument(index))?;
        self.read_value(receiver + index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn stack() -> ExecutionStack {
        ExecutionStack::new(&StackSettings {
            initial_words: 4,
            max_words: 256,
        })
        .unwrap()
    }

    fn handler(addr: u32) -> HandlerRef {
        HandlerRef::new(ObjRef::new(addr))
    }

    #[test]
    fn frames_restore_registers() {
        let mut s = stack();
        s.push(Value::Integer(1)).unwrap();
        s.push(Value::Integer(2)).unwrap();
        let before = s.registers();

        s.push_frame(ReturnAddress::resume(handler(40), 7), 3).unwrap();
        assert_eq!(s.base_pointer(), before.0 + FRAME_HEADER_WORDS);
        assert_eq!(s.frame_boundary(), s.base_pointer() + 3);
        assert_eq!(s.local(2), Ok(Value::Null));
        s.push(Value::Integer(99)).unwrap();
        s.push_try(5).unwrap();

        let ret = s.pop_frame(false).unwrap();
        assert_eq!(ret, ReturnAddress::resume(handler(40), 7));
        assert_eq!(s.registers(), before);
    }

    #[test]
    fn frames_leave_return_value_on_top() {
        let mut s = stack();
        s.push(Value::Integer(10)).unwrap(); // receiver
        s.push(Value::Integer(11)).unwrap(); // argument
        let (sp, bp, fb) = s.registers();

        s.push_frame(ReturnAddress::boundary(None, 0), 1).unwrap();
        assert_eq!(s.argument(1, 0), Ok(Value::Integer(10)));
        assert_eq!(s.argument(1, 1), Ok(Value::Integer(11)));
        assert!(s.argument(1, 2).is_err());
        s.push(Value::Integer(42)).unwrap();

        let ret = s.pop_frame(true).unwrap();
        assert!(ret.actual_return_here);
        assert_eq!(ret.handler, None);
        assert_eq!(s.registers(), (sp + 1, bp, fb));
        assert_eq!(s.peek(0), Ok(Value::Integer(42)));

        s.release_arguments(1, true).unwrap();
        assert_eq!(s.registers(), (sp - 1, bp, fb));
        assert_eq!(s.pop(), Ok(Value::Integer(42)));
    }

    #[test]
    fn nested_frames_unwind_in_order() {
        let mut s = stack();
        let outer = s.registers();
        s.push_frame(ReturnAddress::resume(handler(1), 1), 0).unwrap();
        let middle = s.registers();
        s.push_frame(ReturnAddress::resume(handler(2), 2), 2).unwrap();
        assert_eq!(s.pop_frame(false).unwrap().instruction_offset, 2);
        assert_eq!(s.registers(), middle);
        assert_eq!(s.pop_frame(false).unwrap().instruction_offset, 1);
        assert_eq!(s.registers(), outer);
        assert!(s.pop_frame(false).is_err());
    }

    #[test]
    fn try_markers_are_lifo() {
        let mut s = stack();
        s.push_frame(ReturnAddress::boundary(None, 0), 0).unwrap();
        s.push_try(3).unwrap();
        s.push(Value::Integer(1)).unwrap();
        s.push_try(8).unwrap();
        s.push(Value::Integer(2)).unwrap();

        assert_eq!(s.pop_try(), Ok(Some(8)));
        assert_eq!(s.peek(0), Ok(Value::Integer(1)));
        assert_eq!(s.pop_try(), Ok(Some(3)));
        assert_eq!(s.stack_pointer(), s.frame_boundary());
        assert_eq!(s.pop_try(), Ok(None));
    }

    #[test]
    fn operands_stop_at_a_try_marker() {
        let mut s = stack();
        s.push_frame(ReturnAddress::boundary(None, 0), 0).unwrap();
        s.push(Value::Integer(1)).unwrap();
        s.push_try(4).unwrap();
        assert_eq!(s.peek(0), Err(StackError::Underflow));
        assert_eq!(s.pop(), Err(StackError::Underflow));

        s.push(Value::Integer(2)).unwrap();
        assert_eq!(s.pop(), Ok(Value::Integer(2)));
        assert_eq!(s.pop(), Err(StackError::Underflow));
        assert_eq!(s.pop_try(), Ok(Some(4)));
        assert_eq!(s.pop(), Ok(Value::Integer(1)));
    }

    #[test]
    fn try_markers_do_not_leak_across_frames() {
        let mut s = stack();
        s.push_frame(ReturnAddress::boundary(None, 0), 0).unwrap();
        s.push_try(4).unwrap();
        s.push_frame(ReturnAddress::resume(handler(9), 2), 1).unwrap();
        // the enclosing frame's marker is invisible from the callee
        assert_eq!(s.pop_try(), Ok(None));

        s.push_try(6).unwrap();
        s.pop_frame(false).unwrap();
        // and the callee's marker is gone with its frame
        assert_eq!(s.pop_try(), Ok(Some(4)));
        assert_eq!(s.pop_try(), Ok(None));
    }

    #[test]
    fn pops_stop_at_the_frame_boundary() {
        let mut s = stack();
        s.push(Value::Integer(5)).unwrap();
        s.push_frame(ReturnAddress::boundary(None, 0), 1).unwrap();
        assert_eq!(s.pop(), Err(StackError::Underflow));
        assert_eq!(s.peek(0), Err(StackError::Underflow));
        s.set_local(0, Value::Integer(3)).unwrap();
        assert_eq!(s.local(0), Ok(Value::Integer(3)));
        assert_eq!(s.set_local(1, Value::Null), Err(StackError::BadLocal(1)));
    }

    #[test]
    fn growth_is_bounded() {
        let mut s = ExecutionStack::new(&StackSettings {
            initial_words: 2,
            max_words: 8,
        })
        .unwrap();
        for i in 0..8 {
            s.push(Value::Integer(i)).unwrap();
        }
        assert_eq!(
            s.push(Value::Null),
            Err(StackError::Exhausted { limit: 8 })
        );
        assert_eq!(s.pop_many(3), Ok(vec![
            Value::Integer(5),
            Value::Integer(6),
            Value::Integer(7)
        ]));
    }

    #[test]
    fn settings_validation() {
        assert!(StackSettings::default().validate().is_ok());
        assert!(StackSettings { initial_words: 0, max_words: 4 }.validate().is_err());
        assert!(StackSettings { initial_words: 8, max_words: 4 }.validate().is_err());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl StackListener for Recorder {
        fn value_pushed(&self, value: Value) {
            self.0.lock().push(format!("push {value:?}"));
        }
        fn value_popped(&self, value: Value) {
            self.0.lock().push(format!("pop {value:?}"));
        }
        fn local_written(&self, index: u32, value: Value) {
            self.0.lock().push(format!("local {index} {value:?}"));
        }
    }

    #[test]
    fn listener_sees_values_not_markers() {
        let recorder = Arc::new(Recorder::default());
        let mut s = stack();
        s.set_listener(Some(recorder.clone()));
        s.push(Value::Integer(1)).unwrap();
        s.push_frame(ReturnAddress::boundary(None, 0), 1).unwrap();
        s.set_local(0, Value::Null).unwrap();
        s.push_try(2).unwrap();
        s.pop_try().unwrap();
        s.pop_frame(false).unwrap();
        s.pop().unwrap();
        assert_eq!(*recorder.0.lock(), vec![
            "push Integer(1)".to_owned(),
            "local 0 Null".to_owned(),
            "pop Integer(1)".to_owned(),
        ]);
    }
}
