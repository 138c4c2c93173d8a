//! Verification of Ethereum Merkle Patricia Trie proofs.
//!
//! Proofs come straight out of `eth_getProof`: an ordered list of RLP encoded
//! trie nodes running from the root towards the value. This crate walks those
//! nodes against a trusted root and either returns the proven value, proves
//! that the key is absent, or rejects the proof.
//!
//! The walk follows the same rules as the on-chain verifier that consumes
//! gateway witnesses, so a proof accepted here is accepted there:
//! - the first node must hash to the root;
//! - every following node must hash to the pointer held by its parent, or
//!   equal it byte for byte when the node is shorter than 32 bytes;
//! - a key may only run out of proof when the last node pointed at nothing.
//!
//! [`verify_account_state`] and [`verify_storage_value`] decode the values of
//! the state trie and of a contract's storage trie respectively.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod account;
pub mod nibbles;
pub mod walk;

#[cfg(test)]
pub(crate) mod testing_utils;

pub use account::{verify_account_state, verify_storage_value, AccountState, VerifyError};
/// Hash of the code of an account without code.
pub use keccak_hash::KECCAK_EMPTY as EMPTY_CODE_HASH;
/// Root hash of a trie without any entries.
pub use keccak_hash::KECCAK_NULL_RLP as EMPTY_TRIE_ROOT;
pub use walk::{walk, ProofError, WalkError};
