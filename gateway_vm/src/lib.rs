//! Programs that describe which storage to read from which contracts, and
//! the machine that runs them.
//!
//! A [`GatewayRequest`] is built with the chaining methods of
//! [`GatewayProgram`], ABI encoded, and evaluated by a [`GatewayVm`] against
//! any [`StorageSource`]. Evaluation records every state access as a
//! [`Need`], in program order, so that the accesses can later be proven and
//! the same program replayed against the proofs.

pub mod error;
pub mod machine;
pub mod needs;
pub mod ops;
pub mod program;
pub mod reader;
pub mod storage;
pub mod value;

pub use error::VmError;
pub use machine::{GatewayVm, MachineState};
pub use needs::{Need, NeedSelector, ProofSequence};
pub use ops::{exit, LoopFlags, Op};
pub use program::{GatewayProgram, GatewayRequest, MAX_INPUTS};
pub use reader::ProgramReader;
pub use storage::{StorageSource, VmLimits};
pub use value::MaybeBytes;
