//! Decoding of proven state trie accounts and storage trie values.

use ethereum_types::{H160, H256, U256};
use keccak_hash::{keccak, KECCAK_EMPTY, KECCAK_NULL_RLP};
use log::debug;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use thiserror::Error;

use crate::walk::{walk, ProofError};

/// An account as stored in the state trie.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AccountState {
    #[allow(missing_docs)]
    pub nonce: u64,
    #[allow(missing_docs)]
    pub balance: U256,
    /// Root of the account's storage trie.
    pub storage_root: H256,
    /// Hash of the account's code.
    pub code_hash: H256,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: KECCAK_NULL_RLP,
            code_hash: KECCAK_EMPTY,
        }
    }
}

impl AccountState {
    /// Whether the account has code.
    pub fn is_contract(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }
}

impl Encodable for AccountState {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4)
            .append(&self.nonce)
            .append(&self.balance)
            .append(&self.storage_root)
            .append(&self.code_hash);
    }
}

impl Decodable for AccountState {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 4 {
            return Err(DecoderError::RlpIncorrectListLen);
        }

        Ok(Self {
            nonce: rlp.val_at(0)?,
            balance: rlp.val_at(1)?,
            storage_root: rlp.val_at(2)?,
            code_hash: rlp.val_at(3)?,
        })
    }
}

/// An error produced when a proof checks out structurally but the value it
/// proves can not be interpreted, or when the proof itself is rejected.
#[derive(Clone, Debug, Error)]
pub enum VerifyError {
    /// The proof itself was rejected.
    #[error(transparent)]
    Proof(#[from] ProofError),

    /// The state trie value is not a 4 item account list.
    #[error("account {address:#x} has a malformed state entry: {reason}")]
    MalformedAccount {
        #[allow(missing_docs)]
        address: H160,
        #[allow(missing_docs)]
        reason: DecoderError,
    },

    /// The storage trie value is not an RLP string.
    #[error("slot {slot:#x} has a malformed storage entry: {reason}")]
    MalformedStorage {
        #[allow(missing_docs)]
        slot: U256,
        #[allow(missing_docs)]
        reason: DecoderError,
    },

    /// The storage trie value does not fit in a word.
    #[error("slot {slot:#x} holds a {len} byte value")]
    StorageValueTooLong {
        #[allow(missing_docs)]
        slot: U256,
        #[allow(missing_docs)]
        len: usize,
    },
}

/// Verifies `proof` for the state trie entry of `address` against
/// `state_root`.
///
/// Returns `None` if the proof shows that the account does not exist.
pub fn verify_account_state<N: AsRef<[u8]>>(
    address: H160,
    proof: &[N],
    state_root: H256,
) -> Result<Option<AccountState>, VerifyError> {
    let Some(raw) = walk(proof, keccak(address).as_bytes(), state_root)? else {
        debug!("account {:#x} is absent under {:#x}", address, state_root);
        return Ok(None);
    };

    rlp::decode(&raw)
        .map(Some)
        .map_err(|reason| VerifyError::MalformedAccount { address, reason })
}

/// Verifies `proof` for the value of `slot` against a contract's
/// `storage_root`.
///
/// Absent slots read as zero. An empty storage trie proves every slot is zero
/// without looking at the proof at all.
pub fn verify_storage_value<N: AsRef<[u8]>>(
    slot: U256,
    proof: &[N],
    storage_root: H256,
) -> Result<H256, VerifyError> {
    if storage_root == KECCAK_NULL_RLP {
        return Ok(H256::zero());
    }

    let mut key = [0; 32];
    slot.to_big_endian(&mut key);

    let Some(raw) = walk(proof, keccak(key).as_bytes(), storage_root)? else {
        return Ok(H256::zero());
    };

    let data = Rlp::new(&raw)
        .data()
        .map_err(|reason| VerifyError::MalformedStorage { slot, reason })?;
    if data.len() > 32 {
        return Err(VerifyError::StorageValueTooLong {
            slot,
            len: data.len(),
        });
    }

    let mut word = H256::zero();
    word.0[32 - data.len()..].copy_from_slice(data);
    Ok(word)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::{
        testing_utils::{common_setup, slot_key, state_trie, storage_trie, TestTrie},
        WalkError,
    };

    const SEED: u64 = 0xdead_beef;

    fn contract(storage_root: H256) -> AccountState {
        AccountState {
            nonce: 1,
            balance: U256::from(1_000_000u64),
            storage_root,
            code_hash: H256(hex!(
                "a2c1c2cf9f6e0dca0d3c2e8f1e2d4b5a6c7d8e9f00112233445566778899aabb"
            )),
        }
    }

    #[test]
    fn account_rlp_is_four_items() {
        common_setup();

        let account = AccountState::default();
        let encoded = rlp::encode(&account);
        assert_eq!(Rlp::new(&encoded).item_count().unwrap(), 4);
        assert_eq!(rlp::decode::<AccountState>(&encoded).unwrap(), account);
        assert!(!account.is_contract());
    }

    #[test]
    fn proves_present_and_absent_accounts() {
        common_setup();

        let mut rng = StdRng::seed_from_u64(SEED);
        let accounts: Vec<_> = (0..50)
            .map(|i| {
                let address = H160(rng.gen());
                let account = match i % 2 {
                    0 => AccountState::default(),
                    _ => contract(H256(rng.gen())),
                };
                (address, account)
            })
            .collect();

        let mut trie = state_trie(&accounts);
        let root = trie.root();

        for (address, account) in &accounts {
            let proof = trie.proof(keccak(address).as_bytes());
            let proven = verify_account_state(*address, &proof, root).unwrap();
            assert_eq!(proven.as_ref(), Some(account));
        }

        let missing = H160::repeat_byte(0x77);
        let proof = trie.proof(keccak(missing).as_bytes());
        assert_eq!(verify_account_state(missing, &proof, root).unwrap(), None);
    }

    #[test]
    fn account_in_empty_state_is_absent() {
        common_setup();

        let proof: Vec<Vec<u8>> = Vec::new();
        let state = verify_account_state(H160::zero(), &proof, KECCAK_NULL_RLP).unwrap();
        assert_eq!(state, None);
    }

    #[test]
    fn garbage_account_entry_is_malformed() {
        common_setup();

        let address = H160::repeat_byte(1);
        let mut trie = TestTrie::default();
        trie.insert_hashed(address.as_bytes(), &rlp::encode(&b"not an account".to_vec()));
        let root = trie.root();

        let proof = trie.proof(keccak(address).as_bytes());
        let err = verify_account_state(address, &proof, root).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedAccount { .. }));
    }

    #[test]
    fn proves_small_slots() {
        common_setup();

        let slots = [(U256::zero(), U256::zero()), (U256::one(), U256::one())];
        let mut trie = storage_trie(&slots);
        let root = trie.root();

        let proof = trie.proof(keccak(slot_key(U256::one())).as_bytes());
        assert_eq!(
            verify_storage_value(U256::one(), &proof, root).unwrap(),
            H256::from_low_u64_be(1)
        );

        let proof = trie.proof(keccak(slot_key(U256::zero())).as_bytes());
        assert_eq!(
            verify_storage_value(U256::zero(), &proof, root).unwrap(),
            H256::zero()
        );
    }

    #[test]
    fn proves_random_slots() {
        common_setup();

        let mut rng = StdRng::seed_from_u64(SEED);
        let slots: Vec<_> = (0..100)
            .map(|_| (U256(rng.gen()), U256(rng.gen())))
            .collect();

        let mut trie = storage_trie(&slots);
        let root = trie.root();

        for (slot, value) in &slots {
            let proof = trie.proof(keccak(slot_key(*slot)).as_bytes());
            let proven = verify_storage_value(*slot, &proof, root).unwrap();
            assert_eq!(U256::from_big_endian(proven.as_bytes()), *value);
        }
    }

    #[test]
    fn empty_storage_root_skips_the_proof() {
        common_setup();

        let garbage = vec![vec![0xde, 0xad]];
        let value = verify_storage_value(U256::from(5), &garbage, KECCAK_NULL_RLP).unwrap();
        assert_eq!(value, H256::zero());
    }

    #[test]
    fn storage_proof_against_other_root_is_rejected() {
        common_setup();

        let mut trie = storage_trie(&[(U256::from(3), U256::from(4))]);
        let proof = trie.proof(keccak(slot_key(U256::from(3))).as_bytes());

        let other = H256::repeat_byte(0x11);
        let err = verify_storage_value(U256::from(3), &proof, other).unwrap_err();
        match err {
            VerifyError::Proof(e) => assert_eq!(e.reason, WalkError::PointerMismatch { index: 0 }),
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn oversized_storage_value_is_rejected() {
        common_setup();

        let slot = U256::from(9);
        let mut trie = TestTrie::default();
        trie.insert_hashed(&slot_key(slot), &rlp::encode(&vec![0xffu8; 33]));
        let root = trie.root();

        let proof = trie.proof(keccak(slot_key(slot)).as_bytes());
        let err = verify_storage_value(slot, &proof, root).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::StorageValueTooLong { len: 33, .. }
        ));
    }
}
