//! Bounded-concurrency generation with retry passes and placeholders.
//!
//! ```text
//! items ──► pass 1 (attempts) ──► pass 2 (cooldown, attempts) ──► pass 3 (longer cooldown, fewer attempts)
//!              │ done / abandoned        │ done / abandoned              │ done / exhausted
//!              ▼                         ▼                               ▼
//!           artifact or placeholder, keyed by item index, returned in index order
//! ```
//!
//! Audio and image stages share this executor and only differ in their
//! [`StageGenerator`].

mod policy;
mod progress;

pub use policy::{ItemOutcome, Pass, RetryPolicy};
pub use progress::ProgressAggregator;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use reel_models::{GenerationConfig, Indexed};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::metrics;
use policy::AttemptState;

/// One kind of generated artifact (narration chunks, scene images, ...).
#[async_trait]
pub trait StageGenerator: Send + Sync {
    type Item: Indexed + Send + Sync;
    type Artifact: Send;

    /// Short stage label for logs and metrics.
    fn stage(&self) -> &'static str;

    async fn generate(&self, item: &Self::Item) -> Result<Self::Artifact, WorkerError>;

    /// Stand-in artifact for an item that could not be generated.
    async fn placeholder(&self, item: &Self::Item, error: &str) -> Self::Artifact;

    fn is_retryable(&self, error: &WorkerError) -> bool {
        error.is_retryable()
    }
}

/// Runs a [`StageGenerator`] over a list of items.
#[derive(Debug, Clone)]
pub struct GenerationStageExecutor {
    policy: RetryPolicy,
    large_stage_threshold: usize,
}

impl GenerationStageExecutor {
    pub fn new(policy: RetryPolicy, large_stage_threshold: usize) -> Self {
        Self {
            policy,
            large_stage_threshold: large_stage_threshold.max(1),
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(RetryPolicy::from(&config.retry), config.large_stage_threshold)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Concurrency actually used for `item_count` items.
    pub fn effective_concurrency(&self, max_concurrency: usize, item_count: usize) -> usize {
        let max = max_concurrency.max(1);
        if item_count > self.large_stage_threshold {
            (max / 2).max(1)
        } else {
            max
        }
    }

    /// Generate one artifact per item.
    ///
    /// Never fails: items that keep failing are replaced by the generator's
    /// placeholder. The result has the same length as `items` and is ordered
    /// by item index. `on_progress(completed, total)` fires once per item.
    pub async fn generate_all<G, F>(
        &self,
        generator: &G,
        items: &[G::Item],
        max_concurrency: usize,
        on_progress: F,
    ) -> Vec<G::Artifact>
    where
        G: StageGenerator,
        F: Fn(usize, usize) + Send + Sync,
    {
        let stage = generator.stage();
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let started = Instant::now();
        let concurrency = self.effective_concurrency(max_concurrency, total);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let progress = ProgressAggregator::new(total, on_progress);
        info!(stage, items = total, concurrency, "Starting generation stage");

        // (item index, input position) keeps duplicate indices apart
        let mut results: BTreeMap<(usize, usize), G::Artifact> = BTreeMap::new();
        let mut pending: Vec<usize> = (0..total).collect();
        let passes = self.policy.passes();

        for (pass_idx, pass) in passes.iter().enumerate() {
            if pending.is_empty() {
                break;
            }
            let is_final = pass_idx + 1 == passes.len();
            if !pass.cooldown.is_zero() {
                info!(
                    stage,
                    pass = pass.number,
                    failed = pending.len(),
                    cooldown_ms = pass.cooldown.as_millis() as u64,
                    "Cooling down before retry pass"
                );
                tokio::time::sleep(pass.cooldown).await;
            }

            let futures = pending.iter().map(|&position| {
                let semaphore = semaphore.clone();
                let progress = &progress;
                let item = &items[position];
                async move {
                    let outcome = match semaphore.acquire().await {
                        Ok(_permit) => self.drive_item(generator, item, pass.attempts).await,
                        Err(_) => ItemOutcome::Abandoned("generation semaphore closed".to_string()),
                    };
                    let artifact = match outcome {
                        ItemOutcome::Done(artifact) => {
                            metrics::record_stage_item(stage, false);
                            Some(artifact)
                        }
                        ItemOutcome::Abandoned(error) => {
                            warn!(stage, index = item.index(), "Item abandoned: {}", error);
                            metrics::record_stage_item(stage, true);
                            Some(generator.placeholder(item, &error).await)
                        }
                        ItemOutcome::Exhausted(error) if is_final => {
                            warn!(
                                stage,
                                index = item.index(),
                                "Item failed after every pass, using placeholder: {}",
                                error
                            );
                            metrics::record_stage_item(stage, true);
                            Some(generator.placeholder(item, &error).await)
                        }
                        ItemOutcome::Exhausted(_) => None,
                    };
                    if artifact.is_some() {
                        progress.record_completion();
                    }
                    (position, artifact)
                }
            });

            let mut still_failing = Vec::new();
            for (position, artifact) in join_all(futures).await {
                match artifact {
                    Some(artifact) => {
                        results.insert((items[position].index(), position), artifact);
                    }
                    None => still_failing.push(position),
                }
            }

            if !still_failing.is_empty() {
                info!(
                    stage,
                    pass = pass.number,
                    failed = still_failing.len(),
                    "Pass finished with retryable failures"
                );
            }
            pending = still_failing;
        }

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_stage_duration(stage, elapsed);
        info!(
            stage,
            items = total,
            elapsed_secs = format!("{:.1}", elapsed),
            "Generation stage finished"
        );

        results.into_values().collect()
    }

    /// Run one item through up to `attempts` tries.
    async fn drive_item<G>(&self, generator: &G, item: &G::Item, attempts: u32) -> ItemOutcome<G::Artifact>
    where
        G: StageGenerator,
    {
        let stage = generator.stage();
        let mut state = AttemptState::Attempting(0);

        loop {
            state = match state {
                AttemptState::Attempting(attempt) => match generator.generate(item).await {
                    Ok(artifact) => return ItemOutcome::Done(artifact),
                    Err(e) if !generator.is_retryable(&e) => {
                        return ItemOutcome::Abandoned(e.to_string());
                    }
                    Err(e) => {
                        metrics::record_stage_retry(stage);
                        if attempt + 1 >= attempts {
                            return ItemOutcome::Exhausted(e.to_string());
                        }
                        let delay = self.policy.delay_for_attempt(attempt);
                        debug!(
                            stage,
                            index = item.index(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Attempt failed, backing off: {}",
                            e
                        );
                        AttemptState::Backoff {
                            delay,
                            next: attempt + 1,
                        }
                    }
                },
                AttemptState::Backoff { delay, next } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    AttemptState::Attempting(next)
                }
            };
        }
    }
}
