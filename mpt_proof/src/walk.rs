//! The core proof walk shared by account and storage verification.

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::{keccak, KECCAK_NULL_RLP};
use log::trace;
use rlp::{DecoderError, Rlp};
use thiserror::Error;

use crate::nibbles::{decode_hex_prefix, shared_prefix_len, to_nibbles, Nibble, NodePath};

const BRANCH_ITEMS: usize = 17;
const PATH_ITEMS: usize = 2;
const BRANCH_VALUE_INDEX: usize = 16;

/// Reasons a proof is rejected.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum WalkError {
    /// A node does not hash to (or equal) the pointer that led to it.
    #[error("node {index} does not match the pointer of its parent")]
    PointerMismatch {
        /// Position of the node in the proof.
        index: usize,
    },

    /// A node is not a single well-formed RLP list.
    #[error("node {index} is malformed: {reason}")]
    MalformedNode {
        /// Position of the node in the proof.
        index: usize,
        /// What the RLP decoder complained about.
        reason: DecoderError,
    },

    /// A node is neither a branch nor a leaf/extension.
    #[error("node {index} has {items} items")]
    UnexpectedItemCount {
        /// Position of the node in the proof.
        index: usize,
        /// Number of items found.
        items: usize,
    },

    /// A leaf or extension path carries an unknown hex prefix flag.
    #[error("node {index} has an invalid path prefix flag {flag:#x}")]
    InvalidPathPrefix {
        /// Position of the node in the proof.
        index: usize,
        /// The flag nibble.
        flag: u8,
    },

    /// A child pointer is neither empty, a 32 byte hash nor an embedded node.
    #[error("node {index} holds a child pointer of {len} bytes")]
    InvalidChildPointer {
        /// Position of the node in the proof.
        index: usize,
        /// Encoded length of the pointer.
        len: usize,
    },

    /// An extension node points at nothing.
    #[error("extension node {index} has an empty child")]
    EmptyExtension {
        /// Position of the node in the proof.
        index: usize,
    },

    /// A leaf stores an empty value, which a trie never contains.
    #[error("leaf at node {index} holds an empty value")]
    EmptyValue {
        /// Position of the node in the proof.
        index: usize,
    },

    /// The proof ended before the walk reached a value or an empty pointer.
    #[error("proof ran out of nodes with {remaining} key nibbles left")]
    KeyRemainder {
        /// Nibbles of the key still unconsumed.
        remaining: usize,
    },

    /// The walk terminated but the proof keeps going.
    #[error("{extra} nodes follow the terminating node")]
    TrailingNodes {
        /// Number of unused nodes.
        extra: usize,
    },
}

/// A rejected proof along with everything needed to diagnose it.
#[derive(Clone, Debug, Error)]
#[error("invalid proof for key 0x{} against root {root:#x}: {reason}", hex::encode(.key))]
pub struct ProofError {
    /// The (already hashed) key that was walked.
    pub key: Vec<u8>,
    /// The trusted root.
    pub root: H256,
    /// The nodes of the rejected proof.
    pub proof: Vec<Bytes>,
    /// Why the proof was rejected.
    #[source]
    pub reason: WalkError,
}

/// What the next node on the path is expected to be.
#[derive(Clone, Copy, Debug)]
enum NodeRef<'a> {
    Empty,
    Hash(H256),
    Raw(&'a [u8]),
}

enum Step<'a> {
    Descend { next: NodeRef<'a>, consumed: usize },
    Done(Option<Vec<u8>>),
}

/// Walks `nodes` from `root` along the nibbles of `key`.
///
/// Returns the raw value stored at `key` (still RLP encoded, as tries store
/// it), or `None` when the proof shows that `key` is absent.
pub fn walk<N: AsRef<[u8]>>(
    nodes: &[N],
    key: &[u8],
    root: H256,
) -> Result<Option<Vec<u8>>, ProofError> {
    trace!(
        "walking {} proof nodes for key 0x{}",
        nodes.len(),
        hex::encode(key)
    );

    walk_nibbles(nodes, &to_nibbles(key), root).map_err(|reason| ProofError {
        key: key.to_vec(),
        root,
        proof: nodes
            .iter()
            .map(|n| Bytes::copy_from_slice(n.as_ref()))
            .collect(),
        reason,
    })
}

fn walk_nibbles<N: AsRef<[u8]>>(
    nodes: &[N],
    key: &[Nibble],
    root: H256,
) -> Result<Option<Vec<u8>>, WalkError> {
    if nodes.is_empty() && root == KECCAK_NULL_RLP {
        return Ok(None);
    }

    let mut expected = NodeRef::Hash(root);
    let mut key_index = 0;

    for (index, node) in nodes.iter().enumerate() {
        let node = node.as_ref();
        check_pointer(index, node, expected)?;

        let rlp = Rlp::new(node);
        let info = rlp
            .payload_info()
            .map_err(|reason| WalkError::MalformedNode { index, reason })?;
        if !rlp.is_list() || info.total() != node.len() {
            return Err(WalkError::MalformedNode {
                index,
                reason: DecoderError::RlpExpectedToBeList,
            });
        }

        let items = rlp
            .item_count()
            .map_err(|reason| WalkError::MalformedNode { index, reason })?;
        let step = match items {
            BRANCH_ITEMS => branch_step(index, &rlp, &key[key_index..])?,
            PATH_ITEMS => path_step(index, &rlp, &key[key_index..])?,
            items => return Err(WalkError::UnexpectedItemCount { index, items }),
        };

        match step {
            Step::Descend { next, consumed } => {
                expected = next;
                key_index += consumed;
            }
            Step::Done(value) => {
                let extra = nodes.len() - index - 1;
                if extra != 0 {
                    return Err(WalkError::TrailingNodes { extra });
                }
                return Ok(value);
            }
        }
    }

    Err(WalkError::KeyRemainder {
        remaining: key.len() - key_index,
    })
}

fn check_pointer(index: usize, node: &[u8], expected: NodeRef<'_>) -> Result<(), WalkError> {
    let matches = match expected {
        NodeRef::Hash(hash) => keccak(node) == hash,
        NodeRef::Raw(raw) => node == raw,
        NodeRef::Empty => false,
    };

    match matches {
        true => Ok(()),
        false => Err(WalkError::PointerMismatch { index }),
    }
}

fn branch_step<'a>(index: usize, rlp: &Rlp<'a>, key: &[Nibble]) -> Result<Step<'a>, WalkError> {
    let Some(&nibble) = key.first() else {
        let value = item(index, rlp, BRANCH_VALUE_INDEX)?
            .data()
            .map_err(|reason| WalkError::MalformedNode { index, reason })?;
        return Ok(Step::Done((!value.is_empty()).then(|| value.to_vec())));
    };

    match child_pointer(index, &item(index, rlp, nibble as usize)?)? {
        NodeRef::Empty => Ok(Step::Done(None)),
        next => Ok(Step::Descend { next, consumed: 1 }),
    }
}

fn path_step<'a>(index: usize, rlp: &Rlp<'a>, key: &[Nibble]) -> Result<Step<'a>, WalkError> {
    let encoded_path = item(index, rlp, 0)?
        .data()
        .map_err(|reason| WalkError::MalformedNode { index, reason })?;
    let NodePath { nibbles, is_leaf } = decode_hex_prefix(encoded_path)
        .map_err(|flag| WalkError::InvalidPathPrefix { index, flag })?;

    let shared = shared_prefix_len(&nibbles, key);

    if is_leaf {
        // A diverging leaf proves the key absent.
        if shared != nibbles.len() || shared != key.len() {
            return Ok(Step::Done(None));
        }

        let value = item(index, rlp, 1)?
            .data()
            .map_err(|reason| WalkError::MalformedNode { index, reason })?;
        if value.is_empty() {
            return Err(WalkError::EmptyValue { index });
        }
        return Ok(Step::Done(Some(value.to_vec())));
    }

    if shared < nibbles.len() {
        return Ok(Step::Done(None));
    }

    match child_pointer(index, &item(index, rlp, 1)?)? {
        NodeRef::Empty => Err(WalkError::EmptyExtension { index }),
        next => Ok(Step::Descend {
            next,
            consumed: shared,
        }),
    }
}

fn item<'a>(index: usize, rlp: &Rlp<'a>, at: usize) -> Result<Rlp<'a>, WalkError> {
    rlp.at(at)
        .map_err(|reason| WalkError::MalformedNode { index, reason })
}

fn child_pointer<'a>(index: usize, child: &Rlp<'a>) -> Result<NodeRef<'a>, WalkError> {
    if child.is_list() {
        let raw = child.as_raw();
        return match raw.len() < 32 {
            true => Ok(NodeRef::Raw(raw)),
            false => Err(WalkError::InvalidChildPointer {
                index,
                len: raw.len(),
            }),
        };
    }

    let data = child
        .data()
        .map_err(|reason| WalkError::MalformedNode { index, reason })?;
    match data.len() {
        0 => Ok(NodeRef::Empty),
        32 => Ok(NodeRef::Hash(H256::from_slice(data))),
        len => Err(WalkError::InvalidChildPointer { index, len }),
    }
}
