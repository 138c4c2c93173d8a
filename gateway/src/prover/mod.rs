//! Reading and proving the state that programs touch.

pub mod cli;
mod eth;

use std::future::Future;
use std::time::Duration;

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    rpc::types::BlockId,
    sol_types::SolValue,
};
use gateway_vm::{Need, ProofSequence, StorageSource, VmLimits};

use crate::cache::CachedMapConfig;

pub use self::eth::EthProver;

/// Source of raw Merkle proofs and unverified state.
#[cfg_attr(test, mockall::automock)]
pub trait ProofProvider {
    /// `eth_getProof`. Storage proofs come back in the order of `slots`.
    fn get_proof(
        &self,
        address: Address,
        slots: Vec<U256>,
        block: BlockId,
    ) -> impl Future<Output = anyhow::Result<ProofResponse>> + Send;

    fn get_code(
        &self,
        address: Address,
        block: BlockId,
    ) -> impl Future<Output = anyhow::Result<Bytes>> + Send;

    fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        block: BlockId,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;
}

/// The account half of an `eth_getProof` response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccountProof {
    pub address: Address,
    pub balance: U256,
    pub code_hash: B256,
    pub storage_hash: B256,
    /// RLP encoded trie nodes from the state root down.
    pub proof: Vec<Bytes>,
}

impl AccountProof {
    /// Accounts that do not exist have a zero code hash, accounts without
    /// code the hash of the empty string.
    pub fn is_contract(&self) -> bool {
        self.code_hash != B256::ZERO && self.code_hash.0 != mpt_proof::EMPTY_CODE_HASH.0
    }
}

/// One storage slot of an `eth_getProof` response.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StorageProof {
    pub slot: U256,
    pub value: U256,
    pub proof: Vec<Bytes>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProofResponse {
    pub account: AccountProof,
    pub storage: Vec<StorageProof>,
}

/// Proof blobs are the ABI encoding of `bytes[]`, one entry per trie node.
pub fn encode_proof(nodes: &[Bytes]) -> Bytes {
    nodes.to_vec().abi_encode().into()
}

pub fn decode_proof(blob: &[u8]) -> anyhow::Result<Vec<Bytes>> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    Ok(Vec::<Bytes>::abi_decode(blob, true)?)
}

/// A [`StorageSource`] that can also prove what it served.
pub trait Prover: StorageSource {
    /// Collapses `needs` into distinct proofs and an order mapping each need
    /// to its proof.
    fn prove(&self, needs: &[Need]) -> impl Future<Output = anyhow::Result<ProofSequence>> + Send;
}

#[derive(Clone, Debug)]
pub struct ProverConfig {
    pub limits: VmLimits,
    /// Distinct proofs a single request may need.
    pub max_proofs: usize,
    /// Slots per `eth_getProof` call.
    pub proof_batch_size: usize,
    /// Capacity of each of the account and storage proof caches.
    pub proof_cache_size: usize,
    /// Answer reads with unproven RPC calls when no proof is cached.
    pub fast: bool,
    pub fast_cache: CachedMapConfig,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            limits: VmLimits::default(),
            max_proofs: 128,
            proof_batch_size: 64,
            proof_cache_size: 10_000,
            fast: false,
            fast_cache: CachedMapConfig {
                ttl: Duration::from_secs(60),
                error_ttl: Duration::from_secs(5),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{bytes, keccak256};

    use super::*;

    #[test]
    fn proof_blobs() {
        let nodes = vec![bytes!("c0"), bytes!("deadbeef")];
        let blob = encode_proof(&nodes);
        // offset, length, two offsets, two (length, word) pairs
        assert_eq!(blob.len(), 32 * 8);
        assert_eq!(decode_proof(&blob).unwrap(), nodes);
        assert!(decode_proof(&[]).unwrap().is_empty());
    }

    #[test]
    fn contracts_have_code() {
        let mut account = AccountProof::default();
        assert!(!account.is_contract());

        account.code_hash = keccak256(b"");
        assert!(!account.is_contract());

        account.code_hash = keccak256([0x60u8, 0x00]);
        assert!(account.is_contract());
    }
}
