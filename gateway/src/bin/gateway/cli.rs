use alloy::primitives::{Address, Bytes, U256};
use clap::{Parser, Subcommand, ValueHint};
use gateway::{prover::cli::CliProverConfig, service::cli::CliGatewayConfig};
use url::Url;

const ROLLUP_HELP_HEADING: &str = "Rollup options";

/// Storage proof gateway for Ethereum state.
#[derive(Parser)]
#[command(version, propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,

    /// The node RPC URL.
    #[arg(short = 'u', long, env = "GATEWAY_RPC_URL", value_hint = ValueHint::Url)]
    pub(crate) rpc_url: Url,

    /// Blocks between the chain head and the latest commit.
    #[arg(long, env = "GATEWAY_MIN_AGE_BLOCKS", help_heading = ROLLUP_HELP_HEADING, default_value_t = 0)]
    pub(crate) min_age_blocks: u64,

    /// Only blocks that are a multiple of this are commits.
    #[arg(long, env = "GATEWAY_COMMIT_STEP", help_heading = ROLLUP_HELP_HEADING, default_value_t = 1)]
    pub(crate) commit_step: u64,

    #[clap(flatten)]
    pub(crate) prover_config: CliProverConfig,

    #[clap(flatten)]
    pub(crate) gateway_config: CliGatewayConfig,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Evaluates a request and prints its outputs and proofs as JSON.
    Eval {
        /// The request, ABI encoded as `(bytes ops, bytes[] inputs)`.
        #[arg(short, long)]
        request: Bytes,
        /// The commit to evaluate against. Defaults to the latest one.
        #[arg(short, long)]
        index: Option<u64>,
    },
    /// Prints the latest commit index.
    Latest,
    /// Fetches and locally verifies an account and some of its slots.
    VerifyAccount {
        #[arg(short, long)]
        address: Address,
        /// Comma separated storage slots.
        #[arg(short, long, value_delimiter = ',')]
        slots: Vec<U256>,
        /// The commit to verify against. Defaults to the latest one.
        #[arg(short, long)]
        index: Option<u64>,
    },
}
