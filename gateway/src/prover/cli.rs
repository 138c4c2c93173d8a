use std::time::Duration;

use clap::Args;
use gateway_vm::VmLimits;

use crate::cache::CachedMapConfig;

const HELP_HEADING: &str = "Prover options";

/// Prover settings read from flags or the environment.
#[derive(Args, Clone, PartialEq, Eq, Debug)]
pub struct CliProverConfig {
    /// Maximum number of distinct proofs a single request may need.
    #[arg(long, env="GATEWAY_MAX_PROOFS", help_heading = HELP_HEADING, default_value_t = 128)]
    max_proofs: usize,
    /// Number of storage slots requested per `eth_getProof` call.
    #[arg(long, env="GATEWAY_PROOF_BATCH_SIZE", help_heading = HELP_HEADING, default_value_t = 64)]
    proof_batch_size: usize,
    /// Number of account proofs, and of storage proofs, kept per block.
    #[arg(long, env="GATEWAY_PROOF_CACHE_SIZE", help_heading = HELP_HEADING, default_value_t = 10_000)]
    proof_cache_size: usize,
    /// Read state with plain RPC calls while evaluating, and only fetch
    /// proofs for what the request ended up needing.
    #[arg(long, env="GATEWAY_FAST", help_heading = HELP_HEADING, default_value_t = false)]
    fast: bool,
    /// Seconds an unproven read is kept.
    #[arg(long, env="GATEWAY_FAST_TTL", help_heading = HELP_HEADING, default_value_t = 60)]
    fast_ttl: u64,
    /// Seconds a failed unproven read is kept.
    #[arg(long, env="GATEWAY_FAST_ERROR_TTL", help_heading = HELP_HEADING, default_value_t = 5)]
    fast_error_ttl: u64,
}

impl From<CliProverConfig> for super::ProverConfig {
    fn from(cli: CliProverConfig) -> Self {
        Self {
            limits: VmLimits::default(),
            max_proofs: cli.max_proofs,
            proof_batch_size: cli.proof_batch_size,
            proof_cache_size: cli.proof_cache_size,
            fast: cli.fast,
            fast_cache: CachedMapConfig {
                ttl: Duration::from_secs(cli.fast_ttl),
                error_ttl: Duration::from_secs(cli.fast_error_ttl),
                ..Default::default()
            },
        }
    }
}
