use std::sync::Arc;

use alloy::{
    primitives::{Bytes, B256, U256},
    sol_types::SolValue,
};
use anyhow::Context as _;
use gateway_vm::ProofSequence;
use tracing::debug;

use super::{Commit, Rollup};
use crate::prover::{EthProver, ProofProvider, ProverConfig};
use crate::provider::BlockProvider;

/// Ethereum proving its own state: every block is a commit, and the
/// verifier trusts a state root it can look up itself.
#[derive(Debug)]
pub struct EthSelfRollup<P> {
    provider: Arc<P>,
    /// How far behind the head the latest commit is.
    pub min_age_blocks: u64,
    /// Only every `commit_step`th block is used as a commit.
    pub commit_step: u64,
    pub prover_config: ProverConfig,
}

#[derive(Debug)]
pub struct EthCommit<P> {
    index: u64,
    state_root: B256,
    prover: Arc<EthProver<P>>,
}

impl<P> EthCommit<P> {
    pub fn state_root(&self) -> B256 {
        self.state_root
    }
}

impl<P> Commit for EthCommit<P>
where
    P: ProofProvider + Send + Sync + 'static,
{
    type Prover = EthProver<P>;

    fn index(&self) -> u64 {
        self.index
    }

    fn prover(&self) -> &Arc<EthProver<P>> {
        &self.prover
    }
}

impl<P> EthSelfRollup<P> {
    pub fn new(provider: Arc<P>, prover_config: ProverConfig) -> Self {
        Self {
            provider,
            min_age_blocks: 0,
            commit_step: 1,
            prover_config,
        }
    }

    pub fn with_min_age_blocks(mut self, blocks: u64) -> Self {
        self.min_age_blocks = blocks;
        self
    }

    pub fn with_commit_step(mut self, step: u64) -> Self {
        self.commit_step = step;
        self
    }

    fn step(&self) -> u64 {
        self.commit_step.max(1)
    }
}

impl<P> Rollup for EthSelfRollup<P>
where
    P: ProofProvider + BlockProvider + Send + Sync + 'static,
{
    type Commit = EthCommit<P>;

    async fn fetch_latest_commit_index(&self) -> anyhow::Result<u64> {
        let head = self.provider.latest_block_number().await?;
        let index = head.saturating_sub(self.min_age_blocks);
        Ok(index - index % self.step())
    }

    async fn fetch_parent_commit_index(&self, index: u64) -> anyhow::Result<u64> {
        index
            .checked_sub(self.step())
            .with_context(|| format!("commit {index} has no parent"))
    }

    async fn fetch_commit(&self, index: u64) -> anyhow::Result<EthCommit<P>> {
        let state_root = self
            .provider
            .state_root(index)
            .await
            .with_context(|| format!("no state root for commit {index}"))?;
        debug!(index, %state_root, "fetched commit");

        Ok(EthCommit {
            index,
            state_root,
            prover: Arc::new(EthProver::new(
                self.provider.clone(),
                index,
                self.prover_config.clone(),
            )),
        })
    }

    fn encode_witness(&self, commit: &EthCommit<P>, proofs: &ProofSequence) -> Bytes {
        encode_witness(commit.index, commit.state_root, proofs)
    }
}

/// `abi.encode(uint256 index, bytes32 stateRoot, bytes[] proofs, bytes order)`
pub fn encode_witness(index: u64, state_root: B256, proofs: &ProofSequence) -> Bytes {
    (
        U256::from(index),
        state_root,
        proofs.proofs.clone(),
        proofs.order.clone(),
    )
        .abi_encode_params()
        .into()
}

pub fn decode_witness(witness: &[u8]) -> anyhow::Result<(u64, B256, ProofSequence)> {
    let (index, state_root, proofs, order) =
        <(U256, B256, Vec<Bytes>, Bytes)>::abi_decode_params(witness, true)
            .context("malformed witness")?;
    let index = u64::try_from(index).context("commit index out of range")?;
    Ok((index, state_root, ProofSequence { proofs, order }))
}
