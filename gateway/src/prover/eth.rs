use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use alloy::{
    primitives::{Address, Bytes, B256, U256},
    rpc::types::BlockId,
};
use anyhow::{bail, ensure, Context as _};
use futures::{
    future::{self, BoxFuture, Shared},
    FutureExt as _, TryFutureExt as _,
};
use gateway_vm::{Need, NeedSelector, ProofSequence, StorageSource, VmLimits};
use itertools::Itertools as _;
use tracing::{debug, trace};

use super::{
    encode_proof, AccountProof, ProofProvider, ProofResponse, Prover, ProverConfig, StorageProof,
};
use crate::cache::{CacheError, CachedMap, LruMap, LruValue};

type SlotKey = (Address, U256);
type SlotRef = (Address, Option<U256>);
type Batch = Shared<BoxFuture<'static, Result<Arc<ProofResponse>, CacheError>>>;

/// Proves Ethereum state at one block with `eth_getProof`.
///
/// Account and storage proofs are cached separately, so a request that only
/// touches new slots of a known account still fetches one batch per target.
#[derive(Debug)]
pub struct EthProver<P> {
    provider: Arc<P>,
    block: BlockId,
    config: ProverConfig,
    accounts: LruMap<Address, Arc<AccountProof>>,
    storage: LruMap<SlotKey, Arc<StorageProof>>,
    fast_code: CachedMap<Address, bool>,
    fast_storage: CachedMap<SlotKey, B256>,
}

impl<P> EthProver<P>
where
    P: ProofProvider + Send + Sync + 'static,
{
    pub fn new(provider: Arc<P>, block: u64, config: ProverConfig) -> Self {
        let capacity = NonZeroUsize::new(config.proof_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            block: BlockId::number(block),
            accounts: LruMap::new(capacity),
            storage: LruMap::new(capacity),
            fast_code: CachedMap::new(config.fast_cache),
            fast_storage: CachedMap::new(config.fast_cache),
            config,
        }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub async fn get_account_proof(&self, target: Address) -> anyhow::Result<Arc<AccountProof>> {
        let (account, _) = self.get_proofs(target, Vec::new()).await?;
        Ok(account)
    }

    /// Returns the account proof of `target` and a storage proof per slot,
    /// in the order of `slots`.
    ///
    /// Cached and in-flight proofs are joined. Everything else is fetched in
    /// a single batch, split into calls of at most `proof_batch_size` slots,
    /// which keeps running even if every caller goes away.
    pub async fn get_proofs(
        &self,
        target: Address,
        slots: Vec<U256>,
    ) -> anyhow::Result<(Arc<AccountProof>, Vec<Arc<StorageProof>>)> {
        let cached_account = self.accounts.touch(&target);
        let cached: Vec<_> = slots
            .iter()
            .map(|&slot| self.storage.touch(&(target, slot)))
            .collect();
        let missing: Vec<U256> = slots
            .iter()
            .zip(&cached)
            .filter(|(_, v)| v.is_none())
            .map(|(&slot, _)| slot)
            .unique()
            .collect();

        let (account, storage): (_, Vec<LruValue<Arc<StorageProof>>>) =
            match (cached_account, missing.is_empty()) {
                (Some(account), true) => (account, cached.into_iter().flatten().collect()),
                (cached_account, _) => {
                    let batch = self.fetch_batch(target, missing.clone());
                    let mut settle: Vec<BoxFuture<'static, ()>> = Vec::new();

                    let account = match cached_account {
                        Some(account) => account,
                        None => {
                            let fut = self.accounts.set_pending(
                                target,
                                batch
                                    .clone()
                                    .map_ok(|response| Arc::new(response.account.clone())),
                            );
                            settle.push(fut.clone().map(drop).boxed());
                            LruValue::Pending(fut)
                        }
                    };

                    let fresh: HashMap<U256, _> = missing
                        .iter()
                        .enumerate()
                        .map(|(i, &slot)| {
                            let fut = self.storage.set_pending(
                                (target, slot),
                                batch.clone().map(move |response| -> Result<_, CacheError> {
                                    let proof = response?.storage.get(i).cloned().ok_or_else(|| {
                                        anyhow::anyhow!("no storage proof for slot {slot}")
                                    })?;
                                    Ok(Arc::new(proof))
                                }),
                            );
                            settle.push(fut.clone().map(drop).boxed());
                            (slot, fut)
                        })
                        .collect();
                    tokio::spawn(future::join_all(settle));

                    let storage = slots
                        .iter()
                        .zip(cached)
                        .map(|(slot, v)| v.unwrap_or_else(|| LruValue::Pending(fresh[slot].clone())))
                        .collect();
                    (account, storage)
                }
            };

        let (account, storage) = future::try_join(
            account.get(),
            future::try_join_all(storage.into_iter().map(LruValue::get)),
        )
        .await?;
        Ok((account, storage))
    }

    fn fetch_batch(&self, target: Address, slots: Vec<U256>) -> Batch {
        let provider = self.provider.clone();
        let block = self.block;
        let batch_size = self.config.proof_batch_size.max(1);

        async move {
            trace!(%target, slots = slots.len(), "fetching proofs");
            let response = if slots.len() <= batch_size {
                provider.get_proof(target, slots.clone(), block).await?
            } else {
                let parts = future::try_join_all(
                    slots
                        .chunks(batch_size)
                        .map(|chunk| provider.get_proof(target, chunk.to_vec(), block)),
                )
                .await?;
                merge(parts)?
            };
            ensure!(
                response.storage.len() == slots.len(),
                "eth_getProof for {target} returned {} storage proofs for {} slots",
                response.storage.len(),
                slots.len()
            );
            anyhow::Ok(Arc::new(response))
        }
        .map_err(CacheError::from)
        .boxed()
        .shared()
    }

    async fn prove_target(
        &self,
        target: Address,
        refs: Vec<(usize, Option<U256>)>,
    ) -> anyhow::Result<Vec<(usize, Bytes)>> {
        let slots: Vec<U256> = refs.iter().filter_map(|(_, slot)| *slot).collect();

        // Accounts known to hold no code have no storage worth fetching.
        let contract = match self.accounts.touch(&target) {
            Some(account) => account.get().await?.is_contract(),
            None => true,
        };
        let wanted = if contract { slots.clone() } else { Vec::new() };
        let (account, storage) = self.get_proofs(target, wanted).await?;

        let mut blobs: HashMap<U256, Bytes> = HashMap::new();
        if account.is_contract() {
            blobs.extend(
                slots
                    .iter()
                    .zip(&storage)
                    .map(|(&slot, proof)| (slot, encode_proof(&proof.proof))),
            );
        }

        Ok(refs
            .into_iter()
            .map(|(i, slot)| match slot {
                None => (i, encode_proof(&account.proof)),
                Some(slot) => (i, blobs.get(&slot).cloned().unwrap_or_default()),
            })
            .collect())
    }
}

fn merge(parts: Vec<ProofResponse>) -> anyhow::Result<ProofResponse> {
    let mut parts = parts.into_iter();
    let mut merged = parts.next().context("no proof responses to merge")?;
    for part in parts {
        if part.account.storage_hash != merged.account.storage_hash {
            bail!(
                "inconsistent storage roots for {}: {} and {}",
                merged.account.address,
                merged.account.storage_hash,
                part.account.storage_hash
            );
        }
        merged.storage.extend(part.storage);
    }
    Ok(merged)
}

impl<P> StorageSource for EthProver<P>
where
    P: ProofProvider + Send + Sync + 'static,
{
    async fn is_contract(&self, target: Address) -> anyhow::Result<bool> {
        if let Some(account) = self.accounts.touch(&target) {
            return Ok(account.get().await?.is_contract());
        }
        if self.config.fast {
            let provider = self.provider.clone();
            let block = self.block;
            let contract = self
                .fast_code
                .get(target, move |target| async move {
                    anyhow::Ok(!provider.get_code(target, block).await?.is_empty())
                })
                .await?;
            return Ok(contract);
        }
        Ok(self.get_account_proof(target).await?.is_contract())
    }

    async fn get_storage(&self, target: Address, slot: U256) -> anyhow::Result<B256> {
        if let Some(proof) = self.storage.touch(&(target, slot)) {
            return Ok(proof.get().await?.value.into());
        }
        if let Some(account) = self.accounts.peek(&target) {
            if !account.get().await?.is_contract() {
                return Ok(B256::ZERO);
            }
        }
        if self.config.fast {
            let provider = self.provider.clone();
            let block = self.block;
            let value = self
                .fast_storage
                .get((target, slot), move |(target, slot)| async move {
                    provider.get_storage_at(target, slot, block).await
                })
                .await?;
            return Ok(value);
        }

        let (_, storage) = self.get_proofs(target, vec![slot]).await?;
        storage
            .first()
            .map(|proof| proof.value.into())
            .context("missing storage proof")
    }

    fn limits(&self) -> VmLimits {
        self.config.limits
    }
}

impl<P> Prover for EthProver<P>
where
    P: ProofProvider + Send + Sync + 'static,
{
    async fn prove(&self, needs: &[Need]) -> anyhow::Result<ProofSequence> {
        let mut refs: Vec<SlotRef> = Vec::new();
        let mut index: HashMap<SlotRef, usize> = HashMap::new();
        let mut order = Vec::with_capacity(needs.len());

        for need in needs {
            let key = match need.selector {
                NeedSelector::Account { .. } => (need.target, None),
                NeedSelector::Slot(slot) => (need.target, Some(slot)),
            };
            let i = match index.get(&key) {
                Some(&i) => i,
                None => {
                    if refs.len() >= self.config.max_proofs {
                        bail!("too many proofs: limit is {}", self.config.max_proofs);
                    }
                    refs.push(key);
                    index.insert(key, refs.len() - 1);
                    refs.len() - 1
                }
            };
            order.push(u8::try_from(i).context("proof index does not fit in a byte")?);
        }

        let groups = refs
            .iter()
            .enumerate()
            .map(|(i, &(target, slot))| (target, (i, slot)))
            .into_group_map();
        let blobs = future::try_join_all(
            groups
                .into_iter()
                .map(|(target, refs)| self.prove_target(target, refs)),
        )
        .await?;

        let mut proofs = vec![Bytes::new(); refs.len()];
        for (i, blob) in blobs.into_iter().flatten() {
            proofs[i] = blob;
        }

        debug!(needs = needs.len(), proofs = proofs.len(), "proved needs");
        Ok(ProofSequence {
            proofs,
            order: order.into(),
        })
    }
}
