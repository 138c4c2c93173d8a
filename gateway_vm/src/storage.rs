use std::future::Future;

use alloy::primitives::{Address, B256, U256};

/// Resource limits of a single evaluation. The on-chain verifier enforces the
/// same values, so they may only change together with it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VmLimits {
    pub max_stack: usize,
    pub max_unique_targets: usize,
    pub max_read_bytes: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            max_stack: 64,
            max_unique_targets: 32,
            max_read_bytes: 1024,
        }
    }
}

/// Where the machine reads state from.
///
/// The gateway reads through a caching prover, the replay verifier through
/// previously verified proofs.
pub trait StorageSource: Send + Sync + 'static {
    fn is_contract(&self, target: Address) -> impl Future<Output = anyhow::Result<bool>> + Send;

    fn get_storage(
        &self,
        target: Address,
        slot: U256,
    ) -> impl Future<Output = anyhow::Result<B256>> + Send;

    fn limits(&self) -> VmLimits {
        VmLimits::default()
    }
}
