use crate::instruction::{BytecodeError, Instruction, LITERAL_MAX, LITERAL_MIN};

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`], [`BytecodeBuilder::jump_if_true`],
/// and [`BytecodeBuilder::jump_if_false`]. Resolve it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use]
pub struct Label {
    /// Position of the jump instruction; offsets are relative to it.
    at: u32,
}

/// An open `Try` whose catch offset is filled in by
/// [`BytecodeBuilder::catch`].
#[derive(Debug)]
#[must_use]
pub struct TryLabel {
    at: u32,
}

/// An open `Catch` whose end offset is filled in by
/// [`BytecodeBuilder::end_try_catch`].
#[derive(Debug)]
#[must_use]
pub struct CatchLabel {
    at: u32,
}

/// Builds a VMIL instruction word sequence.
///
/// Operand range errors are recorded and reported by
/// [`into_words`](Self::into_words), so emission itself never fails.
pub struct BytecodeBuilder {
    words: Vec<u32>,
    pending: Vec<u32>,
    error: Option<BytecodeError>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            pending: Vec::new(),
            error: None,
        }
    }

    /// Offset of the next emitted instruction.
    pub fn current_offset(&self) -> u32 {
        self.words.len() as u32
    }

    pub fn into_words(self) -> Result<Vec<u32>, BytecodeError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if let Some(&at) = self.pending.first() {
            return Err(BytecodeError::UnboundLabel(at));
        }
        Ok(self.words)
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn encode(&mut self, instruction: Instruction) -> u32 {
        match instruction.encode() {
            Ok(word) => word,
            Err(error) => {
                self.error.get_or_insert(error);
                0
            }
        }
    }

    fn emit(&mut self, instruction: Instruction) -> &mut Self {
        let word = self.encode(instruction);
        self.words.push(word);
        self
    }

    fn open(&mut self, instruction: Instruction) -> u32 {
        let at = self.current_offset();
        self.emit(instruction);
        self.pending.push(at);
        at
    }

    fn patch(&mut self, at: u32, instruction: Instruction) {
        self.pending.retain(|&p| p != at);
        let word = self.encode(instruction);
        self.words[at as usize] = word;
    }

    pub fn instruction(&mut self, instruction: Instruction) -> &mut Self {
        self.emit(instruction)
    }

    pub fn store_field(&mut self, field: u32) -> &mut Self {
        self.emit(Instruction::StoreField { field })
    }

    pub fn load_field(&mut self, field: u32) -> &mut Self {
        self.emit(Instruction::LoadField { field })
    }

    pub fn store_local(&mut self, local: u32) -> &mut Self {
        self.emit(Instruction::StoreLocal { local })
    }

    pub fn load_local(&mut self, local: u32) -> &mut Self {
        self.emit(Instruction::LoadLocal { local })
    }

    /// `LoadArgument 0` is the receiver.
    pub fn load_argument(&mut self, index: u32) -> &mut Self {
        self.emit(Instruction::LoadArgument { index })
    }

    /// Push any `i32`.
    ///
    /// Values outside the 26-bit literal range are built from a
    /// `PushLiteralInt` followed by `PushLiteralIntExtend` chunks.
    pub fn push_int(&mut self, value: i32) -> &mut Self {
        let clamp = |n: i64| n.clamp(LITERAL_MIN as i64, LITERAL_MAX as i64);
        let first = clamp(value as i64);
        self.emit(Instruction::PushLiteralInt { value: first as i32 });
        let mut remaining = value as i64 - first;
        while remaining != 0 {
            let chunk = clamp(remaining);
            self.emit(Instruction::PushLiteralIntExtend { value: chunk as i32 });
            remaining -= chunk;
        }
        self
    }

    pub fn push_string(&mut self, index: u32) -> &mut Self {
        self.emit(Instruction::PushLiteralString { index })
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Instruction::Pop)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.emit(Instruction::Dup)
    }

    /// Expects the class-name string on top of the stack.
    pub fn new_instance(&mut self) -> &mut Self {
        self.emit(Instruction::NewInstance)
    }

    /// Expects receiver, arguments and the selector string on the stack.
    pub fn send(&mut self) -> &mut Self {
        self.emit(Instruction::SendMessage)
    }

    pub fn return_(&mut self) -> &mut Self {
        self.emit(Instruction::Return)
    }

    pub fn return_void(&mut self) -> &mut Self {
        self.emit(Instruction::ReturnVoid)
    }

    pub fn throw(&mut self) -> &mut Self {
        self.emit(Instruction::Throw)
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// Emit an unconditional forward jump. Returns a [`Label`] that must be
    /// resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self) -> Label {
        Label { at: self.open(Instruction::Jump { offset: 0 }) }
    }

    pub fn jump_if_true(&mut self) -> Label {
        Label { at: self.open(Instruction::JumpIfTrue { offset: 0 }) }
    }

    pub fn jump_if_false(&mut self) -> Label {
        Label { at: self.open(Instruction::JumpIfFalse { offset: 0 }) }
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let offset = (self.current_offset() - label.at) as i32;
        let jump = match Instruction::decode(self.words[label.at as usize]) {
            Ok(Instruction::JumpIfTrue { .. }) => Instruction::JumpIfTrue { offset },
            Ok(Instruction::JumpIfFalse { .. }) => Instruction::JumpIfFalse { offset },
            _ => Instruction::Jump { offset },
        };
        self.patch(label.at, jump);
    }

    fn back_offset(&self, target: u32) -> i32 {
        target as i32 - self.current_offset() as i32
    }

    /// Emit an unconditional backward jump to `target` (an offset obtained
    /// from [`current_offset`](Self::current_offset)).
    pub fn jump_back(&mut self, target: u32) -> &mut Self {
        let offset = self.back_offset(target);
        self.emit(Instruction::Jump { offset })
    }

    pub fn jump_back_if_true(&mut self, target: u32) -> &mut Self {
        let offset = self.back_offset(target);
        self.emit(Instruction::JumpIfTrue { offset })
    }

    pub fn jump_back_if_false(&mut self, target: u32) -> &mut Self {
        let offset = self.back_offset(target);
        self.emit(Instruction::JumpIfFalse { offset })
    }

    // ── try/catch ──────────────────────────────────────────────────

    /// Open a protected region.
    pub fn try_(&mut self) -> TryLabel {
        TryLabel { at: self.open(Instruction::Try { catch: 0 }) }
    }

    /// Close the protected region and start the handler body, which finds
    /// the exception on top of the stack.
    pub fn catch(&mut self, label: TryLabel) -> CatchLabel {
        let catch = self.current_offset();
        self.patch(label.at, Instruction::Try { catch });
        CatchLabel { at: self.open(Instruction::Catch { end: 0 }) }
    }

    pub fn end_try_catch(&mut self, label: CatchLabel) -> &mut Self {
        let end = self.current_offset();
        self.patch(label.at, Instruction::Catch { end });
        self.emit(Instruction::EndTryCatch)
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
