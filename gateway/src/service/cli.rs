use std::time::Duration;

use clap::Args;

use crate::cache::CachedMapConfig;

const HELP_HEADING: &str = "Gateway options";

#[derive(Args, Clone, PartialEq, Eq, Debug)]
pub struct CliGatewayConfig {
    /// Seconds the latest commit index is reused before asking again.
    #[arg(long, env="GATEWAY_LATEST_TTL", help_heading = HELP_HEADING, default_value_t = 60)]
    latest_ttl: u64,
    /// Number of commits, and their provers, kept in memory.
    #[arg(long, env="GATEWAY_COMMIT_CACHE_SIZE", help_heading = HELP_HEADING, default_value_t = 16)]
    commit_cache_size: usize,
    /// How many commits behind the latest one requests may ask for.
    #[arg(long, env="GATEWAY_COMMIT_DEPTH", help_heading = HELP_HEADING, default_value_t = 2)]
    commit_depth: usize,
    /// Number of responses kept for repeated requests.
    #[arg(long, env="GATEWAY_CALL_CACHE_SIZE", help_heading = HELP_HEADING, default_value_t = 10_000)]
    call_cache_size: usize,
}

impl From<CliGatewayConfig> for super::GatewayConfig {
    fn from(cli: CliGatewayConfig) -> Self {
        let defaults = Self::default();
        Self {
            latest_ttl: Duration::from_secs(cli.latest_ttl),
            commit_cache: CachedMapConfig {
                max_cached: cli.commit_cache_size,
                ..defaults.commit_cache
            },
            commit_depth: cli.commit_depth,
            call_cache_size: cli.call_cache_size,
            ..defaults
        }
    }
}
