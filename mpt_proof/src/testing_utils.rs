use std::sync::Arc;

use eth_trie::{EthTrie, MemoryDB, Trie};
use ethereum_types::{H160, H256, U256};
use keccak_hash::keccak;

use crate::account::AccountState;

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

/// An independent trie implementation used to produce proofs that we then
/// check against.
pub(crate) struct TestTrie {
    inner: EthTrie<MemoryDB>,
}

impl Default for TestTrie {
    fn default() -> Self {
        let db = Arc::new(MemoryDB::new(true));
        Self {
            inner: EthTrie::new(db),
        }
    }
}

impl TestTrie {
    /// Inserts `val` under `keccak(preimage)`, the way both the state and the
    /// storage tries key their entries.
    pub(crate) fn insert_hashed(&mut self, preimage: &[u8], val: &[u8]) {
        self.inner.insert(keccak(preimage).as_bytes(), val).unwrap();
    }

    pub(crate) fn root(&mut self) -> H256 {
        // Both of these types are identical except that one is re-exported.
        H256(self.inner.root_hash().unwrap().0)
    }

    pub(crate) fn proof(&mut self, key: &[u8]) -> Vec<Vec<u8>> {
        // The proof is only generated from committed nodes.
        self.inner.root_hash().unwrap();
        self.inner.get_proof(key).unwrap()
    }
}

/// A storage trie holding `slots` with their values RLP encoded as minimal
/// big endian integers. Zero values are never stored.
pub(crate) fn storage_trie(slots: &[(U256, U256)]) -> TestTrie {
    let mut trie = TestTrie::default();
    for (slot, val) in slots.iter().filter(|(_, v)| !v.is_zero()) {
        trie.insert_hashed(&slot_key(*slot), &rlp::encode(val));
    }
    trie
}

/// A state trie holding `accounts`.
pub(crate) fn state_trie(accounts: &[(H160, AccountState)]) -> TestTrie {
    let mut trie = TestTrie::default();
    for (address, account) in accounts {
        trie.insert_hashed(address.as_bytes(), &rlp::encode(account));
    }
    trie
}

pub(crate) fn slot_key(slot: U256) -> [u8; 32] {
    let mut key = [0; 32];
    slot.to_big_endian(&mut key);
    key
}
