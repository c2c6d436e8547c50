//! Bytecode opcodes for the minis VM.
//!
//! Each instruction is one opcode byte followed by fixed-width operands:
//! integers, floats, offsets and counts are 8 bytes little-endian, bools
//! and type tags are one byte, names are a `u64` length plus raw bytes.

/// A single bytecode opcode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // --- Literals ---
    /// `i64` operand.
    PushInt = 0x01,
    /// `f64` operand.
    PushFloat = 0x02,
    /// `u8` operand, nonzero is true.
    PushBool = 0x03,
    /// Name operand holding the string contents.
    PushStr = 0x04,
    PushNull = 0x05,
    /// Pop `count` values (`u64` operand) and push them as a list.
    MakeList = 0x06,

    // --- Variables ---
    /// Push the value bound to a name.
    Get = 0x07,
    /// Pop a value and assign it, declaring an `auto` local if the name is unbound.
    Set = 0x08,
    /// Pop a value and declare it in the current scope (name, type tag).
    Decl = 0x09,
    /// Remove the first binding of a name on the scope chain.
    Unset = 0x0A,
    Pop = 0x0B,

    // --- Arithmetic ---
    Add = 0x10,
    Subtract = 0x11,
    Multiply = 0x12,
    /// Always produces a float.
    Divide = 0x13,
    Negate = 0x14,
    Not = 0x15,

    // --- Comparison ---
    Equal = 0x16,
    NotEqual = 0x17,
    Less = 0x18,
    LessEqual = 0x19,
    Greater = 0x1A,
    GreaterEqual = 0x1B,

    // --- Logical (both operands are always evaluated) ---
    And = 0x1C,
    Or = 0x1D,

    // --- Collections ---
    /// Pop index and container, push the element.
    Index = 0x20,
    /// Pop end, start and container, push the sub-sequence.
    Slice = 0x21,
    /// Pop value and index, store into the list bound to the name operand.
    SetIndex = 0x22,

    // --- Control flow ---
    /// Absolute `u64` target.
    Jump = 0x30,
    /// Pop a value and jump to the `u64` target if it is falsy.
    JumpIfFalse = 0x31,

    // --- Functions ---
    /// Name operand and `u64` argument count.
    Call = 0x38,
    /// Like `Call`, but replaces the current frame.
    TailCall = 0x39,
    Return = 0x3A,
    ReturnVoid = 0x3B,

    // --- Scopes ---
    EnterScope = 0x40,
    ExitScope = 0x41,

    Halt = 0xFF,
}

impl Op {
    pub fn from_u8(byte: u8) -> Option<Op> {
        let op = match byte {
            0x01 => Op::PushInt,
            0x02 => Op::PushFloat,
            0x03 => Op::PushBool,
            0x04 => Op::PushStr,
            0x05 => Op::PushNull,
            0x06 => Op::MakeList,
            0x07 => Op::Get,
            0x08 => Op::Set,
            0x09 => Op::Decl,
            0x0A => Op::Unset,
            0x0B => Op::Pop,
            0x10 => Op::Add,
            0x11 => Op::Subtract,
            0x12 => Op::Multiply,
            0x13 => Op::Divide,
            0x14 => Op::Negate,
            0x15 => Op::Not,
            0x16 => Op::Equal,
            0x17 => Op::NotEqual,
            0x18 => Op::Less,
            0x19 => Op::LessEqual,
            0x1A => Op::Greater,
            0x1B => Op::GreaterEqual,
            0x1C => Op::And,
            0x1D => Op::Or,
            0x20 => Op::Index,
            0x21 => Op::Slice,
            0x22 => Op::SetIndex,
            0x30 => Op::Jump,
            0x31 => Op::JumpIfFalse,
            0x38 => Op::Call,
            0x39 => Op::TailCall,
            0x3A => Op::Return,
            0x3B => Op::ReturnVoid,
            0x40 => Op::EnterScope,
            0x41 => Op::ExitScope,
            0xFF => Op::Halt,
            _ => return None,
        };
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_byte_decodes_to_itself() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Op::from_u8(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Op::from_u8(0x00), None);
        assert_eq!(Op::from_u8(0x39), Some(Op::TailCall));
    }
}
