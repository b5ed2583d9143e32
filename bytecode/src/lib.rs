mod op;
mod instruction;
mod builder;
mod decoder;

pub use op::{Op, OperandKind};
pub use instruction::{
    BytecodeError, Instruction, LITERAL_MAX, LITERAL_MIN, MAX_JUMP, MAX_UNSIGNED,
    OPCODE_SHIFT, OPERAND_MASK, split,
};
pub use builder::{BytecodeBuilder, CatchLabel, Label, TryLabel};
pub use decoder::{BytecodeDecoder, disassemble};
