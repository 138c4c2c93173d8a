//! Answers requests against recent commits of a [`Rollup`].

pub mod cli;

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use alloy::primitives::{keccak256, Bytes, B256};
use anyhow::{bail, Context as _};
use futures::TryFutureExt as _;
use gateway_vm::{GatewayRequest, GatewayVm, Need, ProofSequence};
use tracing::{debug, info};

use crate::cache::{CacheError, CachedMap, CachedMapConfig, CachedValue, LruMap};
use crate::prover::Prover as _;
use crate::rollup::{Commit, Rollup};

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// How long the latest commit index is trusted.
    pub latest_ttl: Duration,
    /// How long a failure to fetch the latest commit index is kept.
    pub latest_error_ttl: Duration,
    pub commit_cache: CachedMapConfig,
    /// How many commits behind the latest one a request may ask for.
    pub commit_depth: usize,
    /// Number of finished responses kept.
    pub call_cache_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            latest_ttl: Duration::from_secs(60),
            latest_error_ttl: Duration::from_secs(1),
            commit_cache: CachedMapConfig {
                ttl: Duration::from_secs(3600),
                error_ttl: Duration::from_secs(1),
                max_cached: 16,
                ..Default::default()
            },
            commit_depth: 2,
            call_cache_size: 10_000,
        }
    }
}

/// The result of a request: its outputs, and what it takes to prove them.
#[derive(Clone, Debug)]
pub struct GatewayResponse {
    pub index: u64,
    pub exit_code: u8,
    pub outputs: Vec<Bytes>,
    /// Every state access, in evaluation order.
    pub needs: Vec<Need>,
    pub proofs: ProofSequence,
    /// `proofs` packaged for the rollup's verifier.
    pub witness: Bytes,
}

type CallKey = (u64, B256);

pub struct Gateway<R: Rollup> {
    rollup: Arc<R>,
    config: GatewayConfig,
    latest: CachedValue<u64>,
    commits: CachedMap<u64, Arc<R::Commit>>,
    calls: LruMap<CallKey, Arc<GatewayResponse>>,
}

impl<R: Rollup> std::fmt::Debug for Gateway<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("latest", &self.latest)
            .field("commits", &self.commits)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl<R: Rollup> Gateway<R> {
    pub fn new(rollup: R, config: GatewayConfig) -> Self {
        let rollup = Arc::new(rollup);
        let latest = {
            let rollup = rollup.clone();
            CachedValue::new(
                move || {
                    let rollup = rollup.clone();
                    async move { rollup.fetch_latest_commit_index().await }
                },
                config.latest_ttl,
                config.latest_error_ttl,
            )
        };
        let calls = LruMap::new(
            NonZeroUsize::new(config.call_cache_size).unwrap_or(NonZeroUsize::MIN),
        );

        Self {
            commits: CachedMap::new(config.commit_cache),
            rollup,
            config,
            latest,
            calls,
        }
    }

    pub fn rollup(&self) -> &Arc<R> {
        &self.rollup
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn latest_commit_index(&self) -> anyhow::Result<u64> {
        Ok(self.latest.get().await?)
    }

    /// The commit at `index`, fetched at most once while cached.
    pub async fn commit(&self, index: u64) -> anyhow::Result<Arc<R::Commit>> {
        let rollup = self.rollup.clone();
        let commit = self
            .commits
            .get(index, move |index| async move {
                rollup.fetch_commit(index).map_ok(Arc::new).await
            })
            .await?;
        Ok(commit)
    }

    /// Resolves `index`, or the latest commit when it is `None`, checking
    /// that it is one of the `commit_depth + 1` most recent commits.
    pub async fn recent_commit(&self, index: Option<u64>) -> anyhow::Result<Arc<R::Commit>> {
        let latest = self.latest_commit_index().await?;
        let Some(wanted) = index else {
            return self.commit(latest).await;
        };
        if wanted > latest {
            bail!("commit {wanted} is newer than the latest commit {latest}");
        }

        let mut index = latest;
        for _ in 0..self.config.commit_depth {
            if index <= wanted {
                break;
            }
            index = self.rollup.fetch_parent_commit_index(index).await?;
        }
        if index != wanted {
            bail!(
                "commit {wanted} is not one of the {} most recent commits",
                self.config.commit_depth + 1
            );
        }
        self.commit(wanted).await
    }

    /// Evaluates `request` against a recent commit and proves everything it
    /// read. Identical requests against the same commit share one response.
    pub async fn handle(
        &self,
        request: GatewayRequest,
        index: Option<u64>,
    ) -> anyhow::Result<Arc<GatewayResponse>> {
        let commit = self.recent_commit(index).await?;
        let key = (commit.index(), keccak256(request.encode()?));

        let rollup = self.rollup.clone();
        let response = self
            .calls
            .touch_or_set_pending(key, move || {
                respond(rollup, commit, request).map_err(CacheError::from)
            })
            .get()
            .await?;
        Ok(response)
    }
}

async fn respond<R: Rollup>(
    rollup: Arc<R>,
    commit: Arc<R::Commit>,
    request: GatewayRequest,
) -> anyhow::Result<Arc<GatewayResponse>> {
    let index = commit.index();
    let vm = GatewayVm::new(commit.prover().clone());
    let state = vm
        .evaluate(&request)
        .await
        .with_context(|| format!("evaluation failed at commit {index}"))?;
    let outputs = state.resolve_outputs().await?;
    debug!(index, outputs = outputs.len(), "resolved outputs");

    let proofs = commit.prover().prove(&state.needs).await?;
    let witness = rollup.encode_witness(&commit, &proofs);

    info!(
        index,
        exit_code = state.exit_code,
        needs = state.needs.len(),
        proofs = proofs.proofs.len(),
        "handled request"
    );
    Ok(Arc::new(GatewayResponse {
        index,
        exit_code: state.exit_code,
        outputs,
        needs: state.needs,
        proofs,
        witness,
    }))
}
