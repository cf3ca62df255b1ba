//! Durable progress cursors.
//!
//! Two independently owned integers live side by side in the progress store:
//! `last_block_enqueued` (written only by the enqueuer) and `last_block_processed`
//! (written only by the downstream consumer; read-only here). Neither key is ever
//! deleted, and there is no transaction spanning both.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;

/// Key of the enqueuer's own bookmark.
pub const LAST_BLOCK_ENQUEUED_KEY: &str = "last_block_enqueued";

/// Key maintained by the downstream consumer.
pub const LAST_BLOCK_PROCESSED_KEY: &str = "last_block_processed";

/// Progress store as seen by the enqueuer. Absent keys are `None`, not errors.
#[async_trait]
pub trait ProgressStore: Send {
    /// Highest block the consumer has finished. Read-only view.
    async fn processed_cursor(&mut self) -> Result<Option<u64>>;

    /// Highest block published and recorded by the enqueuer.
    async fn enqueued_cursor(&mut self) -> Result<Option<u64>>;

    /// Persist the enqueuer's bookmark. Returns once the store has acknowledged the write.
    async fn set_enqueued_cursor(&mut self, block: u64) -> Result<()>;
}

/// Cursor values are decimal strings. Anything else is corruption, not absence.
pub fn parse_cursor(key: &str, raw: Option<String>) -> Result<Option<u64>> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("cursor {key} is not a block number: {s:?}")),
    }
}

/// Redis-backed progress store.
pub struct RedisProgressStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisProgressStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("redis url")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("redis connect")?;
        tracing::info!(url, "connected to progress store");
        Ok(Self { conn })
    }

    async fn get(&mut self, key: &str) -> Result<Option<u64>> {
        let raw: Option<String> = self
            .conn
            .get(key)
            .await
            .with_context(|| format!("redis GET {key}"))?;
        parse_cursor(key, raw)
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn processed_cursor(&mut self) -> Result<Option<u64>> {
        self.get(LAST_BLOCK_PROCESSED_KEY).await
    }

    async fn enqueued_cursor(&mut self) -> Result<Option<u64>> {
        let cursor = self.get(LAST_BLOCK_ENQUEUED_KEY).await?;
        tracing::info!(?cursor, "read last_block_enqueued");
        Ok(cursor)
    }

    async fn set_enqueued_cursor(&mut self, block: u64) -> Result<()> {
        tracing::info!(block, "writing last_block_enqueued");
        self.conn
            .set::<_, _, ()>(LAST_BLOCK_ENQUEUED_KEY, block.to_string())
            .await
            .with_context(|| format!("redis SET {LAST_BLOCK_ENQUEUED_KEY}"))
    }
}
