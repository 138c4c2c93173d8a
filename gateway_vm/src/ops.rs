//! The instruction set.
//!
//! Opcode values and operand widths are shared with the on-chain verifier and
//! must not drift from it.

use alloy::primitives::Bytes;

/// Raw opcode values.
pub mod opcode {
    pub const PUSH_INPUT: u8 = 1;
    pub const PUSH_OUTPUT: u8 = 2;
    pub const PUSH_SLOT: u8 = 3;
    pub const PUSH_TARGET: u8 = 4;

    pub const TARGET: u8 = 10;
    pub const SET_OUTPUT: u8 = 11;
    pub const EVAL_INLINE: u8 = 12;
    pub const EVAL_LOOP: u8 = 13;

    pub const REQ_NONZERO: u8 = 20;
    pub const REQ_CONTRACT: u8 = 21;

    pub const READ_SLOTS: u8 = 30;
    pub const READ_BYTES: u8 = 31;
    pub const READ_ARRAY: u8 = 32;

    pub const SLOT_ZERO: u8 = 40;
    pub const SLOT_ADD: u8 = 41;
    pub const SLOT_FOLLOW: u8 = 42;

    pub const DUP: u8 = 50;
    pub const POP: u8 = 51;
    pub const SWAP: u8 = 52;

    pub const KECCAK: u8 = 60;
    pub const CONCAT: u8 = 61;
    pub const SLICE: u8 = 62;

    pub const DEBUG: u8 = 255;
}

/// Exit codes set by the builder's default requirements.
pub mod exit {
    pub const NOT_A_CONTRACT: u8 = 1;
    pub const ZERO_VALUE: u8 = 2;
}

bitflags::bitflags! {
    /// Behaviour of [`Op::EvalLoop`].
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct LoopFlags: u8 {
        /// Stop at the first run that exits with code 0.
        const STOP_ON_SUCCESS = 0b0000_0001;
        /// Stop at the first run that exits with a nonzero code.
        const STOP_ON_FAILURE = 0b0000_0010;
        /// Keep the target, slot and stack of the run that stopped the loop.
        const ACQUIRE_STATE = 0b0000_0100;
    }
}

/// A decoded instruction.
///
/// Input operands are already resolved against the program's input table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Op {
    PushInput(Bytes),
    PushOutput(u8),
    PushSlot,
    PushTarget,

    Target,
    SetOutput(u8),
    EvalInline,
    EvalLoop { back: u8, flags: LoopFlags },

    RequireNonzero { back: u8, exit: u8 },
    RequireContract { exit: u8 },

    ReadSlots(u8),
    ReadBytes,
    ReadArray { step: u16 },

    SlotZero,
    SlotAdd,
    SlotFollow,

    Dup(u8),
    Pop,
    Swap(u8),

    Keccak,
    Concat,
    Slice { offset: u16, length: u16 },

    Debug(Bytes),
}

impl Op {
    pub const fn opcode(&self) -> u8 {
        match self {
            Op::PushInput(_) => opcode::PUSH_INPUT,
            Op::PushOutput(_) => opcode::PUSH_OUTPUT,
            Op::PushSlot => opcode::PUSH_SLOT,
            Op::PushTarget => opcode::PUSH_TARGET,
            Op::Target => opcode::TARGET,
            Op::SetOutput(_) => opcode::SET_OUTPUT,
            Op::EvalInline => opcode::EVAL_INLINE,
            Op::EvalLoop { .. } => opcode::EVAL_LOOP,
            Op::RequireNonzero { .. } => opcode::REQ_NONZERO,
            Op::RequireContract { .. } => opcode::REQ_CONTRACT,
            Op::ReadSlots(_) => opcode::READ_SLOTS,
            Op::ReadBytes => opcode::READ_BYTES,
            Op::ReadArray { .. } => opcode::READ_ARRAY,
            Op::SlotZero => opcode::SLOT_ZERO,
            Op::SlotAdd => opcode::SLOT_ADD,
            Op::SlotFollow => opcode::SLOT_FOLLOW,
            Op::Dup(_) => opcode::DUP,
            Op::Pop => opcode::POP,
            Op::Swap(_) => opcode::SWAP,
            Op::Keccak => opcode::KECCAK,
            Op::Concat => opcode::CONCAT,
            Op::Slice { .. } => opcode::SLICE,
            Op::Debug(_) => opcode::DEBUG,
        }
    }
}
