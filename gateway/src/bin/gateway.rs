use std::sync::Arc;

use alloy::primitives::{Bytes, B256, U256};
use alloy::providers::RootProvider;
use alloy::transports::http::ReqwestTransport;
use anyhow::{ensure, Result};
use clap::Parser as _;
use gateway::{
    compat::Compat as _,
    env::load_dotenvy_vars_if_present,
    provider::CachedProvider,
    rollup::{Commit as _, EthSelfRollup},
    Gateway,
};
use gateway_vm::GatewayRequest;
use mpt_proof::{verify_account_state, verify_storage_value};
use serde::Serialize;
use tracing::info;

#[path = "gateway/cli.rs"]
mod cli;

use cli::Command;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvalOutput<'a> {
    index: u64,
    exit_code: u8,
    outputs: &'a [Bytes],
    proofs: &'a [Bytes],
    order: &'a Bytes,
    witness: &'a Bytes,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountOutput {
    index: u64,
    state_root: B256,
    exists: bool,
    contract: bool,
    storage_root: B256,
    storage: Vec<SlotOutput>,
}

#[derive(Serialize)]
struct SlotOutput {
    slot: U256,
    value: B256,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenvy_vars_if_present();
    gateway::tracing::init();
    let args = cli::Cli::parse();

    let provider = Arc::new(CachedProvider::<_, ReqwestTransport>::new(
        RootProvider::new_http(args.rpc_url.clone()),
    ));
    let rollup = EthSelfRollup::new(provider, args.prover_config.into())
        .with_min_age_blocks(args.min_age_blocks)
        .with_commit_step(args.commit_step);
    let gateway = Gateway::new(rollup, args.gateway_config.into());

    match args.command {
        Command::Eval { request, index } => {
            let request = GatewayRequest::decode(&request)?;
            let response = gateway.handle(request, index).await?;
            print_json(&EvalOutput {
                index: response.index,
                exit_code: response.exit_code,
                outputs: &response.outputs,
                proofs: &response.proofs.proofs,
                order: &response.proofs.order,
                witness: &response.witness,
            })?;
        }
        Command::Latest => {
            println!("{}", gateway.latest_commit_index().await?);
        }
        Command::VerifyAccount {
            address,
            slots,
            index,
        } => {
            let commit = gateway.recent_commit(index).await?;
            let (account, storage) = commit
                .prover()
                .get_proofs(address, slots.clone())
                .await?;

            let state = verify_account_state(
                address.compat(),
                &account.proof,
                commit.state_root().compat(),
            )?;
            let storage_root = state.map(|s| s.storage_root).unwrap_or_default();

            let mut values = Vec::with_capacity(slots.len());
            for (slot, proof) in slots.iter().zip(&storage) {
                let value: B256 = match state {
                    Some(_) => verify_storage_value(slot.compat(), &proof.proof, storage_root)?
                        .compat(),
                    None => Default::default(),
                };
                ensure!(
                    U256::from_be_bytes(value.0) == proof.value,
                    "slot {slot} of {address} proves {value} but the node reported {}",
                    proof.value
                );
                values.push(SlotOutput { slot: *slot, value });
            }
            info!(%address, index = commit.index(), "verified account");

            print_json(&AccountOutput {
                index: commit.index(),
                state_root: commit.state_root(),
                exists: state.is_some(),
                contract: state.is_some_and(|s| s.is_contract()),
                storage_root: storage_root.compat(),
                storage: values,
            })?;
        }
    }

    Ok(())
}
