/// VMIL opcodes, stored in the top 5 bits of an instruction word.
///
/// Operands live in the low 27 bits. Most operands are unsigned indices;
/// literal integers are sign-extended 26-bit values and jump offsets use a
/// sign/magnitude encoding (see [`OperandKind`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Pop a value and store it into a receiver field.
    /// Operand: field index relative to the declaring class's fields.
    StoreField = 0,

    /// Push a receiver field.
    /// Operand: field index relative to the declaring class's fields.
    LoadField,

    /// Pop a value into a local slot. Operand: local index.
    StoreLocal,

    /// Push a local slot. Operand: local index.
    LoadLocal,

    /// Push an argument. Operand: `0` is the receiver, `1..=n` the arguments.
    LoadArgument,

    /// Push an integer literal. Operand: signed 26-bit value.
    PushLiteralInt,

    /// Pop an integer, add a signed 26-bit immediate, push the sum.
    PushLiteralIntExtend,

    /// Push an interned string. Operand: string-table index.
    PushLiteralString,

    Pop,
    Dup,

    /// Pop a class-name string, resolve it relative to the receiver's class
    /// and push a new instance.
    NewInstance,

    /// Pop a selector string and send it to the receiver below the arguments.
    SendMessage,

    /// Pop the frame and hand the top value to the caller.
    Return,

    /// Pop the frame without a value.
    ReturnVoid,

    /// Relative jump. Operand: sign/magnitude offset from this instruction.
    Jump,
    JumpIfTrue,
    JumpIfFalse,

    /// Pop an exception and unwind to the nearest try marker.
    Throw,

    /// Push a try marker. Operand: offset of the matching `Catch`.
    Try,

    /// Start of the handler body; falling into it drops the try marker and
    /// skips the body. Operand: offset of the matching `EndTryCatch`.
    Catch,

    /// Boundary after a handler body. No effect.
    EndTryCatch,
}

/// How an opcode interprets its 27-bit operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Unsigned,
    /// Sign-extended from bit 25.
    Literal,
    /// Bit 26 is the sign, bits 0..25 the magnitude.
    JumpOffset,
}

impl Op {
    pub const COUNT: usize = Op::EndTryCatch as usize + 1;

    pub const fn operand_kind(self) -> OperandKind {
        match self {
            Op::StoreField
            | Op::LoadField
            | Op::StoreLocal
            | Op::LoadLocal
            | Op::LoadArgument
            | Op::PushLiteralString
            | Op::Try
            | Op::Catch => OperandKind::Unsigned,
            Op::PushLiteralInt | Op::PushLiteralIntExtend => OperandKind::Literal,
            Op::Jump | Op::JumpIfTrue | Op::JumpIfFalse => OperandKind::JumpOffset,
            Op::Pop
            | Op::Dup
            | Op::NewInstance
            | Op::SendMessage
            | Op::Return
            | Op::ReturnVoid
            | Op::Throw
            | Op::EndTryCatch => OperandKind::None,
        }
    }

    pub const fn is_jump(self) -> bool {
        matches!(self.operand_kind(), OperandKind::JumpOffset)
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
