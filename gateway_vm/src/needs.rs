use alloy::{
    primitives::{Address, Bytes, U256},
    sol_types::SolValue,
};

/// What a need asks to be proven about its target.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NeedSelector {
    /// The account itself. Required accounts must be contracts.
    Account { required: bool },
    /// One storage slot of the account.
    Slot(U256),
}

/// A state access recorded during evaluation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Need {
    pub target: Address,
    pub selector: NeedSelector,
}

impl Need {
    pub fn account(target: Address, required: bool) -> Self {
        Self {
            target,
            selector: NeedSelector::Account { required },
        }
    }

    pub fn slot(target: Address, slot: U256) -> Self {
        Self {
            target,
            selector: NeedSelector::Slot(slot),
        }
    }
}

/// Deduplicated proofs plus, for every need, the index of its proof.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProofSequence {
    pub proofs: Vec<Bytes>,
    pub order: Bytes,
}

impl ProofSequence {
    /// Encodes the ABI tuple `(bytes[] proofs, bytes order)`.
    pub fn encode(&self) -> Bytes {
        (self.proofs.clone(), self.order.clone())
            .abi_encode_params()
            .into()
    }

    /// The proof backing need `i`.
    pub fn proof_for(&self, i: usize) -> Option<&Bytes> {
        self.order
            .get(i)
            .and_then(|&index| self.proofs.get(index as usize))
    }
}
