use core::fmt;

use crate::op::{Op, OperandKind};

pub const OPCODE_SHIFT: u32 = 27;
pub const OPERAND_MASK: u32 = (1 << OPCODE_SHIFT) - 1;

const JUMP_SIGN_BIT: u32 = 1 << 26;
const JUMP_MAGNITUDE_MASK: u32 = JUMP_SIGN_BIT - 1;

/// Largest unsigned operand.
pub const MAX_UNSIGNED: u32 = OPERAND_MASK;
/// Range of a literal integer immediate.
pub const LITERAL_MIN: i32 = -(1 << 25);
pub const LITERAL_MAX: i32 = (1 << 25) - 1;
/// Largest jump distance in either direction.
pub const MAX_JUMP: i32 = JUMP_MAGNITUDE_MASK as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BytecodeError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("operand {operand} out of range for {op:?}")]
    OperandOutOfRange { op: Op, operand: i64 },
    #[error("label at instruction {0} was never bound")]
    UnboundLabel(u32),
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    StoreField { field: u32 },
    LoadField { field: u32 },
    StoreLocal { local: u32 },
    LoadLocal { local: u32 },
    LoadArgument { index: u32 },
    PushLiteralInt { value: i32 },
    PushLiteralIntExtend { value: i32 },
    PushLiteralString { index: u32 },
    Pop,
    Dup,
    NewInstance,
    SendMessage,
    Return,
    ReturnVoid,
    Jump { offset: i32 },
    JumpIfTrue { offset: i32 },
    JumpIfFalse { offset: i32 },
    Throw,
    Try { catch: u32 },
    Catch { end: u32 },
    EndTryCatch,
}

/// Split an instruction word into its opcode byte and raw operand.
#[inline(always)]
pub const fn split(word: u32) -> (u8, u32) {
    ((word >> OPCODE_SHIFT) as u8, word & OPERAND_MASK)
}

#[inline(always)]
const fn sign_extend_literal(operand: u32) -> i32 {
    ((operand << 6) as i32) >> 6
}

#[inline(always)]
const fn decode_jump(operand: u32) -> i32 {
    let magnitude = (operand & JUMP_MAGNITUDE_MASK) as i32;
    if operand & JUMP_SIGN_BIT != 0 {
        -magnitude
    } else {
        magnitude
    }
}

impl Instruction {
    pub const fn op(self) -> Op {
        match self {
            Self::StoreField { .. } => Op::StoreField,
            Self::LoadField { .. } => Op::LoadField,
            Self::StoreLocal { .. } => Op::StoreLocal,
            Self::LoadLocal { .. } => Op::LoadLocal,
            Self::LoadArgument { .. } => Op::LoadArgument,
            Self::PushLiteralInt { .. } => Op::PushLiteralInt,
            Self::PushLiteralIntExtend { .. } => Op::PushLiteralIntExtend,
            Self::PushLiteralString { .. } => Op::PushLiteralString,
            Self::Pop => Op::Pop,
            Self::Dup => Op::Dup,
            Self::NewInstance => Op::NewInstance,
            Self::SendMessage => Op::SendMessage,
            Self::Return => Op::Return,
            Self::ReturnVoid => Op::ReturnVoid,
            Self::Jump { .. } => Op::Jump,
            Self::JumpIfTrue { .. } => Op::JumpIfTrue,
            Self::JumpIfFalse { .. } => Op::JumpIfFalse,
            Self::Throw => Op::Throw,
            Self::Try { .. } => Op::Try,
            Self::Catch { .. } => Op::Catch,
            Self::EndTryCatch => Op::EndTryCatch,
        }
    }

    /// Decode one instruction word. Operand bits of operandless opcodes are
    /// ignored.
    pub fn decode(word: u32) -> Result<Self, BytecodeError> {
        let (byte, operand) = split(word);
        let op = Op::try_from(byte).map_err(BytecodeError::UnknownOpcode)?;
        let literal = sign_extend_literal(operand);
        let jump = decode_jump(operand);
        Ok(match op {
            Op::StoreField => Self::StoreField { field: operand },
            Op::LoadField => Self::LoadField { field: operand },
            Op::StoreLocal => Self::StoreLocal { local: operand },
            Op::LoadLocal => Self::LoadLocal { local: operand },
            Op::LoadArgument => Self::LoadArgument { index: operand },
            Op::PushLiteralInt => Self::PushLiteralInt { value: literal },
            Op::PushLiteralIntExtend => Self::PushLiteralIntExtend { value: literal },
            Op::PushLiteralString => Self::PushLiteralString { index: operand },
            Op::Pop => Self::Pop,
            Op::Dup => Self::Dup,
            Op::NewInstance => Self::NewInstance,
            Op::SendMessage => Self::SendMessage,
            Op::Return => Self::Return,
            Op::ReturnVoid => Self::ReturnVoid,
            Op::Jump => Self::Jump { offset: jump },
            Op::JumpIfTrue => Self::JumpIfTrue { offset: jump },
            Op::JumpIfFalse => Self::JumpIfFalse { offset: jump },
            Op::Throw => Self::Throw,
            Op::Try => Self::Try { catch: operand },
            Op::Catch => Self::Catch { end: operand },
            Op::EndTryCatch => Self::EndTryCatch,
        })
    }

    /// Encode into an instruction word, checking the operand range.
    pub fn encode(self) -> Result<u32, BytecodeError> {
        let op = self.op();
        let out_of_range = |operand: i64| BytecodeError::OperandOutOfRange { op, operand };
        let operand = match self {
            Self::StoreField { field: n }
            | Self::LoadField { field: n }
            | Self::StoreLocal { local: n }
            | Self::LoadLocal { local: n }
            | Self::LoadArgument { index: n }
            | Self::PushLiteralString { index: n }
            | Self::Try { catch: n }
            | Self::Catch { end: n } => {
                if n > MAX_UNSIGNED {
                    return Err(out_of_range(n as i64));
                }
                n
            }
            Self::PushLiteralInt { value } | Self::PushLiteralIntExtend { value } => {
                if !(LITERAL_MIN..=LITERAL_MAX).contains(&value) {
                    return Err(out_of_range(value as i64));
                }
                value as u32 & OPERAND_MASK
            }
            Self::Jump { offset } | Self::JumpIfTrue { offset } | Self::JumpIfFalse { offset } => {
                if offset.unsigned_abs() > MAX_JUMP as u32 {
                    return Err(out_of_range(offset as i64));
                }
                let sign = if offset < 0 { JUMP_SIGN_BIT } else { 0 };
                sign | offset.unsigned_abs()
            }
            _ => 0,
        };
        debug_assert!(operand == 0 || op.operand_kind() != OperandKind::None);
        Ok((op as u32) << OPCODE_SHIFT | operand)
    }

    /// Target of a jump at `pc`, `None` for other instructions.
    pub fn jump_target(self, pc: u32) -> Option<i64> {
        match self {
            Self::Jump { offset } | Self::JumpIfTrue { offset } | Self::JumpIfFalse { offset } => {
                Some(pc as i64 + offset as i64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreField { field } => write!(f, "StoreField .{field}"),
            Self::LoadField { field } => write!(f, "LoadField .{field}"),
            Self::StoreLocal { local } => write!(f, "StoreLocal l{local}"),
            Self::LoadLocal { local } => write!(f, "LoadLocal l{local}"),
            Self::LoadArgument { index } => write!(f, "LoadArgument a{index}"),
            Self::PushLiteralInt { value } => write!(f, "PushLiteralInt {value}"),
            Self::PushLiteralIntExtend { value } => {
                write!(f, "PushLiteralIntExtend {value:+}")
            }
            Self::PushLiteralString { index } => write!(f, "PushLiteralString #{index}"),
            Self::Pop => write!(f, "Pop"),
            Self::Dup => write!(f, "Dup"),
            Self::NewInstance => write!(f, "NewInstance"),
            Self::SendMessage => write!(f, "SendMessage"),
            Self::Return => write!(f, "Return"),
            Self::ReturnVoid => write!(f, "ReturnVoid"),
            Self::Jump { offset } => write!(f, "Jump {offset:+}"),
            Self::JumpIfTrue { offset } => write!(f, "JumpIfTrue {offset:+}"),
            Self::JumpIfFalse { offset } => write!(f, "JumpIfFalse {offset:+}"),
            Self::Throw => write!(f, "Throw"),
            Self::Try { catch } => write!(f, "Try @{catch}"),
            Self::Catch { end } => write!(f, "Catch @{end}"),
            Self::EndTryCatch => write!(f, "EndTryCatch"),
        }
    }
}
