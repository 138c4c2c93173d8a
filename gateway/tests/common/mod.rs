//! An in-memory chain that serves real Merkle proofs.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::rpc::types::BlockId;
use anyhow::bail;
use eth_trie::{EthTrie, MemoryDB, Trie};
use gateway::compat::Compat as _;
use gateway::provider::BlockProvider;
use gateway::prover::{AccountProof, ProofProvider, ProofResponse, StorageProof};
use mpt_proof::AccountState;
use parking_lot::Mutex;

pub fn common_setup() {
    gateway::tracing::try_init();
}

#[derive(Clone, Debug, Default)]
pub struct TestAccount {
    pub balance: U256,
    pub code: Bytes,
    pub storage: BTreeMap<U256, U256>,
}

/// A chain whose state is the same at every block.
#[derive(Debug, Default)]
pub struct MemoryChain {
    accounts: HashMap<Address, TestAccount>,
    head: u64,
    failing: HashSet<Address>,
    pub proof_calls: AtomicUsize,
    /// Number of slots asked for by each `eth_getProof` call.
    pub proof_batches: Mutex<Vec<usize>>,
    pub code_calls: AtomicUsize,
    pub storage_calls: AtomicUsize,
}

impl MemoryChain {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            ..Default::default()
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn contract(&mut self, address: Address) -> &mut TestAccount {
        self.accounts.entry(address).or_insert_with(|| TestAccount {
            code: Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xfd]),
            ..Default::default()
        })
    }

    pub fn eoa(&mut self, address: Address, balance: U256) {
        self.accounts.insert(
            address,
            TestAccount {
                balance,
                ..Default::default()
            },
        );
    }

    pub fn set(&mut self, address: Address, slot: U256, value: U256) {
        self.contract(address).storage.insert(slot, value);
    }

    /// Stores `v` with the layout solidity uses for `bytes` and `string`.
    pub fn set_bytes(&mut self, address: Address, slot: U256, v: &[u8]) {
        if v.len() < 32 {
            let mut word = [0u8; 32];
            word[..v.len()].copy_from_slice(v);
            word[31] = (v.len() * 2) as u8;
            self.set(address, slot, U256::from_be_bytes(word));
            return;
        }

        self.set(address, slot, U256::from(v.len() * 2 + 1));
        let base = data_slot(slot);
        for (i, chunk) in v.chunks(32).enumerate() {
            let mut word = [0u8; 32];
            word[..chunk.len()].copy_from_slice(chunk);
            self.set(address, base + U256::from(i), U256::from_be_bytes(word));
        }
    }

    /// Makes every `eth_getProof` for `address` fail.
    pub fn fail_proofs_for(&mut self, address: Address) {
        self.failing.insert(address);
    }

    pub fn proof_calls(&self) -> usize {
        self.proof_calls.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> B256 {
        let (mut trie, _) = self.state_trie();
        B256::from(trie.root_hash().unwrap().0)
    }

    fn storage_trie(account: &TestAccount) -> EthTrie<MemoryDB> {
        let mut trie = EthTrie::new(Arc::new(MemoryDB::new(true)));
        for (slot, value) in account.storage.iter().filter(|(_, v)| !v.is_zero()) {
            let value: ethereum_types::U256 = value.compat();
            trie.insert(slot_key(*slot).as_slice(), &rlp::encode(&value))
                .unwrap();
        }
        trie
    }

    fn state_trie(&self) -> (EthTrie<MemoryDB>, HashMap<Address, B256>) {
        let mut trie = EthTrie::new(Arc::new(MemoryDB::new(true)));
        let mut storage_roots = HashMap::new();
        for (address, account) in &self.accounts {
            let storage_root = B256::from(Self::storage_trie(account).root_hash().unwrap().0);
            let state = AccountState {
                nonce: 1,
                balance: account.balance.compat(),
                storage_root: storage_root.compat(),
                code_hash: keccak256(&account.code).compat(),
            };
            trie.insert(keccak256(address).as_slice(), &rlp::encode(&state))
                .unwrap();
            storage_roots.insert(*address, storage_root);
        }
        (trie, storage_roots)
    }
}

impl ProofProvider for MemoryChain {
    async fn get_proof(
        &self,
        address: Address,
        slots: Vec<U256>,
        _block: BlockId,
    ) -> anyhow::Result<ProofResponse> {
        self.proof_calls.fetch_add(1, Ordering::SeqCst);
        self.proof_batches.lock().push(slots.len());
        // Give concurrent callers a chance to pile up on this fetch.
        tokio::task::yield_now().await;
        if self.failing.contains(&address) {
            bail!("node refused to prove {address}");
        }

        let (mut state, storage_roots) = self.state_trie();
        state.root_hash().unwrap();
        let proof = into_bytes(state.get_proof(keccak256(address).as_slice()).unwrap());

        let Some(account) = self.accounts.get(&address) else {
            return Ok(ProofResponse {
                account: AccountProof {
                    address,
                    proof,
                    ..Default::default()
                },
                storage: slots
                    .into_iter()
                    .map(|slot| StorageProof {
                        slot,
                        ..Default::default()
                    })
                    .collect(),
            });
        };

        let mut storage_trie = Self::storage_trie(account);
        storage_trie.root_hash().unwrap();
        // An empty storage root proves every slot on its own.
        let empty = account.storage.values().all(|v| v.is_zero());
        let storage = slots
            .into_iter()
            .map(|slot| StorageProof {
                slot,
                value: account.storage.get(&slot).copied().unwrap_or_default(),
                proof: match empty {
                    true => Vec::new(),
                    false => {
                        into_bytes(storage_trie.get_proof(slot_key(slot).as_slice()).unwrap())
                    }
                },
            })
            .collect();

        Ok(ProofResponse {
            account: AccountProof {
                address,
                balance: account.balance,
                code_hash: keccak256(&account.code),
                storage_hash: storage_roots[&address],
                proof,
            },
            storage,
        })
    }

    async fn get_code(&self, address: Address, _block: BlockId) -> anyhow::Result<Bytes> {
        self.code_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .accounts
            .get(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default())
    }

    async fn get_storage_at(
        &self,
        address: Address,
        slot: U256,
        _block: BlockId,
    ) -> anyhow::Result<B256> {
        self.storage_calls.fetch_add(1, Ordering::SeqCst);
        let value = self
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&slot).copied())
            .unwrap_or_default();
        Ok(value.into())
    }
}

impl BlockProvider for MemoryChain {
    async fn latest_block_number(&self) -> anyhow::Result<u64> {
        Ok(self.head)
    }

    async fn state_root(&self, _block: u64) -> anyhow::Result<B256> {
        Ok(self.root())
    }
}

fn into_bytes(nodes: Vec<Vec<u8>>) -> Vec<Bytes> {
    nodes.into_iter().map(Bytes::from).collect()
}

pub fn slot_key(slot: U256) -> B256 {
    keccak256(slot.to_be_bytes::<32>())
}

/// Where the data of a long `bytes` value, or of a dynamic array, starts.
pub fn data_slot(slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0)
}

/// The slot of `mapping[key]` for a mapping at `slot`.
pub fn mapping_slot(key: U256, slot: U256) -> U256 {
    let mut preimage = key.to_be_bytes::<32>().to_vec();
    preimage.extend_from_slice(&slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(preimage).0)
}

pub fn word(v: u64) -> Bytes {
    Bytes::from(U256::from(v).to_be_bytes::<32>().to_vec())
}
