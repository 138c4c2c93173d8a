//! Where commits come from and how proofs against them are wrapped.
//!
//! A commit pins the state that requests are evaluated against. The rollup
//! knows which commits are recent enough to be accepted by its verifier, and
//! how that verifier expects a [`ProofSequence`] to be packaged.

mod eth;

use std::future::Future;
use std::sync::Arc;

use alloy::primitives::Bytes;
use gateway_vm::ProofSequence;

use crate::prover::Prover;

pub use self::eth::{decode_witness, encode_witness, EthCommit, EthSelfRollup};

pub trait Commit: Send + Sync + 'static {
    type Prover: Prover;

    fn index(&self) -> u64;

    fn prover(&self) -> &Arc<Self::Prover>;
}

pub trait Rollup: Send + Sync + 'static {
    type Commit: Commit;

    /// The newest commit the verifier accepts.
    fn fetch_latest_commit_index(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// The commit before `index`.
    fn fetch_parent_commit_index(
        &self,
        index: u64,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn fetch_commit(&self, index: u64)
        -> impl Future<Output = anyhow::Result<Self::Commit>> + Send;

    /// Packages `proofs` for the verifier. Pure.
    fn encode_witness(&self, commit: &Self::Commit, proofs: &ProofSequence) -> Bytes;
}
