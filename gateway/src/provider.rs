use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::{Block, BlockId, BlockTransactionsKind, EIP1186AccountProofResponse};
use alloy::{providers::Provider, transports::Transport};
use anyhow::{ensure, Context};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

use crate::prover::{AccountProof, ProofProvider, ProofResponse, StorageProof};

const CACHE_SIZE: usize = 1024;
const MAX_NUMBER_OF_PARALLEL_REQUESTS: usize = 128;

/// Block data the rollup needs to pick and check commits.
pub trait BlockProvider {
    fn latest_block_number(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn state_root(&self, block: u64) -> impl Future<Output = anyhow::Result<B256>> + Send;
}

/// Wrapper around an alloy provider that bounds concurrent requests and
/// caches block headers.
pub struct CachedProvider<ProviderT, TransportT> {
    provider: Arc<ProviderT>,
    // The reqwest client behind alloy has an unbounded connection pool, so
    // parallel requests are counted here.
    semaphore: Arc<Semaphore>,
    blocks_by_number: Arc<Mutex<lru::LruCache<u64, Block>>>,
    _phantom: std::marker::PhantomData<TransportT>,
}

pub struct ProviderGuard<'a, ProviderT> {
    provider: Arc<ProviderT>,
    _permit: SemaphorePermit<'a>,
}

impl<ProviderT> Deref for ProviderGuard<'_, ProviderT> {
    type Target = Arc<ProviderT>;

    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

impl<ProviderT> DerefMut for ProviderGuard<'_, ProviderT> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.provider
    }
}

impl<ProviderT, TransportT> CachedProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    pub fn new(provider: ProviderT) -> Self {
        Self {
            provider: provider.into(),
            semaphore: Arc::new(Semaphore::new(MAX_NUMBER_OF_PARALLEL_REQUESTS)),
            blocks_by_number: Arc::new(Mutex::new(lru::LruCache::new(
                std::num::NonZero::new(CACHE_SIZE).unwrap_or(std::num::NonZero::<usize>::MIN),
            ))),
            _phantom: std::marker::PhantomData,
        }
    }

    pub async fn get_provider(&self) -> Result<ProviderGuard<ProviderT>, anyhow::Error> {
        Ok(ProviderGuard {
            provider: self.provider.clone(),
            _permit: self.semaphore.acquire().await?,
        })
    }

    /// Retrieves a block by number, caching it if it's not already cached.
    pub async fn get_block(&self, number: u64) -> anyhow::Result<Block> {
        if let Some(block) = self.blocks_by_number.lock().await.get(&number).cloned() {
            return Ok(block);
        }

        let block = self
            .get_provider()
            .await?
            .get_block(BlockId::number(number), BlockTransactionsKind::Hashes)
            .await?
            .with_context(|| format!("block {number} does not exist"))?;

        self.blocks_by_number
            .lock()
            .await
            .put(block.header.number, block.clone());
        Ok(block)
    }
}

impl<ProviderT, TransportT> BlockProvider for CachedProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn latest_block_number(&self) -> anyhow::Result<u64> {
        Ok(self.get_provider().await?.get_block_number().await?)
    }

    async fn state_root(&self, block: u64) -> anyhow::Result<B256> {
        Ok(self.get_block(block).await?.header.state_root)
    }
}

impl<ProviderT, TransportT> ProofProvider for CachedProvider<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<U256>,
        block: BlockId,
    ) -> anyhow::Result<ProofResponse> {
        let keys = slots.iter().map(|&slot| B256::from(slot)).collect();
        let response = self
            .get_provider()
            .await?
            .get_proof(address, keys)
            .block_id(block)
            .await
            .with_context(|| format!("eth_getProof failed for {address}"))?;
        into_proof_response(slots, response)
    }

    async fn get_code(&self, address: Address, block: BlockId) -> anyhow::Result<Bytes> {
        self.get_provider()
            .await?
            .get_code_at(address)
            .block_id(block)
            .await
            .with_context(|| format!("eth_getCode failed for {address}"))
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        block: BlockId,
    ) -> anyhow::Result<B256> {
        let value = self
            .get_provider()
            .await?
            .get_storage_at(address, slot)
            .block_id(block)
            .await
            .with_context(|| format!("eth_getStorageAt failed for {address} slot {slot}"))?;
        Ok(value.into())
    }
}

/// Storage proofs are matched to `slots` by position, since nodes differ in
/// how they echo keys back.
fn into_proof_response(
    slots: Vec<U256>,
    response: EIP1186AccountProofResponse,
) -> anyhow::Result<ProofResponse> {
    ensure!(
        response.storage_proof.len() == slots.len(),
        "expected {} storage proofs for {}, got {}",
        slots.len(),
        response.address,
        response.storage_proof.len()
    );

    let storage = slots
        .into_iter()
        .zip(response.storage_proof)
        .map(|(slot, proof)| StorageProof {
            slot,
            value: proof.value,
            proof: proof.proof,
        })
        .collect();

    Ok(ProofResponse {
        account: AccountProof {
            address: response.address,
            balance: response.balance,
            code_hash: response.code_hash,
            storage_hash: response.storage_hash,
            proof: response.account_proof,
        },
        storage,
    })
}
