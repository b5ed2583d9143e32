use core::fmt::Write as _;

use crate::instruction::{BytecodeError, Instruction};

/// Decodes a slice of instruction words into [`Instruction`]s.
///
/// Unlike the interpreter, which decodes one word at a time from the heap,
/// the decoder works on an owned code buffer and is used for disassembly
/// and tests.
pub struct BytecodeDecoder<'a> {
    words: &'a [u32],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self { words, pos: 0 }
    }

    /// Offset of the next instruction.
    #[inline(always)]
    pub fn offset(&self) -> u32 {
        self.pos as u32
    }

    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.words.len()
    }

    pub fn decode_next(&mut self) -> Option<Result<Instruction, BytecodeError>> {
        let word = *self.words.get(self.pos)?;
        self.pos += 1;
        Some(Instruction::decode(word))
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<Instruction, BytecodeError>;

    #[inline(always)]
    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// One line per instruction, prefixed with its offset. Words that fail to
/// decode are shown raw.
pub fn disassemble(words: &[u32]) -> String {
    let mut out = String::new();
    for (pc, word) in words.iter().enumerate() {
        let _ = match Instruction::decode(*word) {
            Ok(instruction) => writeln!(out, "{pc:4}: {instruction}"),
            Err(_) => writeln!(out, "{pc:4}: <invalid 0x{word:08x}>"),
        };
    }
    out
}
