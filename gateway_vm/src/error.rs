use std::sync::Arc;

use alloy::primitives::Address;

/// Everything that aborts an evaluation.
///
/// Requirement failures are not errors: they end the evaluation with a
/// nonzero exit code instead.
#[derive(Clone, Debug, thiserror::Error)]
pub enum VmError {
    #[error("invalid program encoding: {0}")]
    InvalidEncoding(String),

    #[error("program has more than {max} inputs")]
    TooManyInputs { max: usize },

    #[error("unknown opcode {op} at {pos}")]
    UnknownOpcode { op: u8, pos: usize },

    #[error("read of {wanted} bytes at {pos} overruns the program ({remaining} left)")]
    ReadOverrun {
        pos: usize,
        wanted: usize,
        remaining: usize,
    },

    #[error("input {index} out of range ({inputs} inputs)")]
    InvalidInput { index: u8, inputs: usize },

    #[error("requirement at {pos} uses exit code 0")]
    InvalidExitCode { pos: usize },

    #[error("stack underflow: wanted {back} back with {depth} values")]
    StackUnderflow { back: usize, depth: usize },

    #[error("stack overflow: more than {max} values")]
    StackOverflow { max: usize },

    #[error("output {index} out of range ({outputs} outputs)")]
    InvalidOutput { index: u8, outputs: usize },

    #[error("more than {max} targets, {target} is one too many")]
    TooManyTargets { target: Address, max: usize },

    #[error("read of {len} bytes exceeds the maximum of {max}")]
    ReadTooLarge { len: usize, max: usize },

    #[error("slot offset is {len} bytes")]
    SlotValueTooLong { len: usize },

    #[error("slice {offset}+{length} outside of {len} bytes")]
    SliceOutOfBounds {
        offset: usize,
        length: usize,
        len: usize,
    },

    #[error("array element size must be nonzero")]
    InvalidArrayStep,

    #[error("storage read failed: {0:#}")]
    Storage(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for VmError {
    fn from(e: anyhow::Error) -> Self {
        Self::Storage(Arc::new(e))
    }
}
