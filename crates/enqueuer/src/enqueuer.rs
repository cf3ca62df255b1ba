//! Enqueuer: feeds block numbers from the chain tip into the work queue.
//!
//! Each iteration falls into exactly one regime:
//! - **queue full**: `enqueued - processed >= min_queue_size`; nothing is published and
//!   the loop sleeps `sleep_queue_full`.
//! - **caught up**: the tip is not ahead of the enqueue cursor (including a tip that
//!   went backwards); the loop sleeps `sleep_new_blocks`.
//! - **catching up**: blocks `enqueued+1 ..= min(enqueued + queue_max_items, tip)` are
//!   published in order, then the cursor is persisted, and the loop continues at once.
//!
//! The cursor is persisted only after every publish in the batch was confirmed, so a
//! crash can re-publish a batch but never skip one. Any error ends the loop: the broker
//! connection is closed and the error is returned for the supervisor to restart us.

use crate::chain::ChainSource;
use crate::config::{ConfigError, EnqueuerConfig};
use crate::cursor::ProgressStore;
use crate::queue::BlockQueue;
use std::ops::RangeInclusive;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Backpressure: the consumer is `depth` blocks behind.
    QueueFull { depth: u64 },
    /// No block beyond the cursor exists yet.
    CaughtUp { tip: u64 },
    /// Published and persisted `from..=to`.
    Enqueued { from: u64, to: u64 },
}

#[derive(Debug, Error)]
pub enum EnqueuerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} required")]
    Missing(&'static str),
    #[error("chain source: {0:#}")]
    Chain(anyhow::Error),
    #[error("publish block {block}: {error:#}")]
    Publish { block: u64, error: anyhow::Error },
    #[error("progress store: {0:#}")]
    Store(anyhow::Error),
    #[error("queue keep-alive: {0:#}")]
    KeepAlive(anyhow::Error),
}

/// Blocks to publish next, or None when the tip is not ahead of the cursor.
///
/// The range never holds more than `cap` blocks.
pub fn plan_batch(enqueued: u64, tip: u64, cap: u64) -> Option<RangeInclusive<u64>> {
    if tip <= enqueued || cap == 0 {
        return None;
    }
    let upper = enqueued.saturating_add(cap).min(tip);
    Some(enqueued + 1..=upper)
}

/// Builder for the enqueuer.
pub struct EnqueuerBuilder {
    config: EnqueuerConfig,
    chain: Option<Box<dyn ChainSource>>,
    queue: Option<Box<dyn BlockQueue>>,
    store: Option<Box<dyn ProgressStore>>,
}

impl EnqueuerBuilder {
    pub fn new() -> Self {
        Self {
            config: EnqueuerConfig::default(),
            chain: None,
            queue: None,
            store: None,
        }
    }

    pub fn config(mut self, config: EnqueuerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chain_source(mut self, chain: impl ChainSource + 'static) -> Self {
        self.chain = Some(Box::new(chain));
        self
    }

    pub fn queue(mut self, queue: impl BlockQueue + 'static) -> Self {
        self.queue = Some(Box::new(queue));
        self
    }

    pub fn progress_store(mut self, store: impl ProgressStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Validate the config and load the enqueue cursor (sync floor when absent).
    /// The queue is closed if the cursor cannot be read.
    pub async fn build(self) -> Result<Enqueuer, EnqueuerError> {
        self.config.validate()?;
        let chain = self.chain.ok_or(EnqueuerError::Missing("chain source"))?;
        let mut queue = self.queue.ok_or(EnqueuerError::Missing("queue"))?;
        let mut store = self.store.ok_or(EnqueuerError::Missing("progress store"))?;
        let stored = match store.enqueued_cursor().await {
            Ok(stored) => stored,
            Err(e) => {
                if let Err(close_err) = queue.close().await {
                    tracing::warn!(reason = %close_err, "closing queue connection failed");
                }
                return Err(EnqueuerError::Store(e));
            }
        };
        let enqueued = stored.unwrap_or(self.config.sync_from_block);
        tracing::info!(enqueued, resumed = stored.is_some(), "enqueue cursor loaded");
        Ok(Enqueuer {
            config: self.config,
            chain,
            queue,
            store,
            enqueued,
        })
    }
}

impl Default for EnqueuerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The enqueue loop. Sole writer of `last_block_enqueued`.
pub struct Enqueuer {
    config: EnqueuerConfig,
    chain: Box<dyn ChainSource>,
    queue: Box<dyn BlockQueue>,
    store: Box<dyn ProgressStore>,
    enqueued: u64,
}

impl Enqueuer {
    /// Highest block published and persisted so far.
    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }

    pub fn config(&self) -> &EnqueuerConfig {
        &self.config
    }

    /// Run one iteration without sleeping. Idle regimes service the queue connection.
    pub async fn step(&mut self) -> Result<Step, EnqueuerError> {
        let processed = self
            .store
            .processed_cursor()
            .await
            .map_err(EnqueuerError::Store)?
            .unwrap_or(self.config.sync_from_block);
        let depth = self.enqueued.saturating_sub(processed);
        if depth >= self.config.min_queue_size {
            tracing::info!(
                depth,
                sleep_secs = self.config.sleep_queue_full.as_secs(),
                "queue full, sleeping"
            );
            self.queue.keep_alive().await.map_err(EnqueuerError::KeepAlive)?;
            return Ok(Step::QueueFull { depth });
        }

        let tip = self.chain.latest_block_number().await.map_err(EnqueuerError::Chain)?;
        tracing::info!(tip, enqueued = self.enqueued, "polled chain tip");
        let batch = match plan_batch(self.enqueued, tip, self.config.queue_max_items) {
            Some(batch) => batch,
            None => {
                if tip < self.enqueued {
                    tracing::warn!(
                        tip,
                        enqueued = self.enqueued,
                        "chain tip behind enqueue cursor, treating as caught up"
                    );
                }
                tracing::info!(
                    sleep_secs = self.config.sleep_new_blocks.as_secs(),
                    "no new blocks, sleeping"
                );
                self.queue.keep_alive().await.map_err(EnqueuerError::KeepAlive)?;
                return Ok(Step::CaughtUp { tip });
            }
        };

        let (from, to) = (*batch.start(), *batch.end());
        for block in batch {
            self.queue
                .publish(block)
                .await
                .map_err(|error| EnqueuerError::Publish { block, error })?;
        }
        self.store
            .set_enqueued_cursor(to)
            .await
            .map_err(EnqueuerError::Store)?;
        self.enqueued = to;
        tracing::info!(from, to, count = to - from + 1, "batch enqueued");
        Ok(Step::Enqueued { from, to })
    }

    /// Loop until an error or until `shutdown` flips to true (or its sender is dropped).
    /// The stop signal is only observed between iterations and while sleeping, never mid-batch.
    /// The broker connection is closed on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EnqueuerError> {
        let result = self.run_inner(&mut shutdown).await;
        match &result {
            Ok(()) => tracing::info!(enqueued = self.enqueued, "enqueuer stopped"),
            Err(e) => tracing::error!(reason = %e, enqueued = self.enqueued, "enqueuer failed, shutting down"),
        }
        if let Err(e) = self.queue.close().await {
            tracing::warn!(reason = %e, "closing queue connection failed");
        }
        result
    }

    async fn run_inner(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), EnqueuerError> {
        loop {
            let stop = *shutdown.borrow();
            if stop {
                return Ok(());
            }
            let pause = match self.step().await? {
                Step::Enqueued { .. } => continue,
                Step::QueueFull { .. } => self.config.sleep_queue_full,
                Step::CaughtUp { .. } => self.config.sleep_new_blocks,
            };
            tokio::select! {
                _ = sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
