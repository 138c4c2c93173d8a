//! Replaying a request against the proofs it produced.
//!
//! This checks a response the way the on-chain verifier does: every proof is
//! verified against the commit's state root first, then the same request is
//! evaluated with only the verified values available.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use anyhow::{anyhow, bail, Context as _};
use gateway_vm::{GatewayRequest, GatewayVm, Need, NeedSelector, ProofSequence, StorageSource};
use mpt_proof::{verify_account_state, verify_storage_value, AccountState};

use crate::compat::Compat as _;
use crate::prover::decode_proof;

/// State proven by a [`ProofSequence`].
#[derive(Debug, Default)]
pub struct ProvenStorage {
    accounts: HashMap<Address, Option<AccountState>>,
    storage: HashMap<(Address, U256), B256>,
}

impl ProvenStorage {
    /// Verifies the proof of every need against `state_root`.
    ///
    /// Needs must be in evaluation order: an account is proven before any
    /// of its slots.
    pub fn new(state_root: B256, needs: &[Need], proofs: &ProofSequence) -> anyhow::Result<Self> {
        if proofs.order.len() != needs.len() {
            bail!(
                "{} needs but {} proof references",
                needs.len(),
                proofs.order.len()
            );
        }

        let mut proven = Self::default();
        for (i, need) in needs.iter().enumerate() {
            let blob = proofs
                .proof_for(i)
                .with_context(|| format!("need {i} references a missing proof"))?;
            let target = need.target;

            match need.selector {
                NeedSelector::Account { .. } => {
                    if proven.accounts.contains_key(&target) {
                        continue;
                    }
                    let nodes = decode_proof(blob)?;
                    let account =
                        verify_account_state(target.compat(), &nodes, state_root.compat())?;
                    proven.accounts.insert(target, account);
                }
                NeedSelector::Slot(slot) => {
                    if proven.storage.contains_key(&(target, slot)) {
                        continue;
                    }
                    let account = proven
                        .accounts
                        .get(&target)
                        .ok_or_else(|| anyhow!("storage of {target} proven before its account"))?;
                    let value = match account {
                        Some(account) if account.is_contract() => {
                            let nodes = decode_proof(blob)?;
                            verify_storage_value(slot.compat(), &nodes, account.storage_root)?
                                .compat()
                        }
                        _ => B256::ZERO,
                    };
                    proven.storage.insert((target, slot), value);
                }
            }
        }
        Ok(proven)
    }

    pub fn account(&self, target: Address) -> Option<&Option<AccountState>> {
        self.accounts.get(&target)
    }
}

impl StorageSource for ProvenStorage {
    async fn is_contract(&self, target: Address) -> anyhow::Result<bool> {
        match self.accounts.get(&target) {
            Some(account) => Ok(account.is_some_and(|a| a.is_contract())),
            None => bail!("account {target} was not proven"),
        }
    }

    async fn get_storage(&self, target: Address, slot: U256) -> anyhow::Result<B256> {
        self.storage
            .get(&(target, slot))
            .copied()
            .with_context(|| format!("slot {slot} of {target} was not proven"))
    }
}

/// Verifies `proofs` and re-runs `request` against them, returning the exit
/// code and outputs the verifier would see.
pub async fn replay(
    request: &GatewayRequest,
    state_root: B256,
    needs: &[Need],
    proofs: &ProofSequence,
) -> anyhow::Result<(u8, Vec<Bytes>)> {
    let storage = ProvenStorage::new(state_root, needs, proofs)?;
    let state = GatewayVm::new(Arc::new(storage)).evaluate(request).await?;
    let outputs = state.resolve_outputs().await?;
    Ok((state.exit_code, outputs))
}
