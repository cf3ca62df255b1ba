//! Work queue publisher (AMQP via lapin).
//!
//! One durable queue declared with `x-max-priority` and `x-max-length`; every block
//! number is sent as a decimal string to the default exchange and confirmed by the
//! broker before `publish` returns. A full queue rejects publishes (`x-overflow =
//! reject-publish`) so the broker nacks instead of dropping the oldest blocks.

use crate::config::{QueueConfig, MAX_PRIORITY};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Persistent delivery mode.
const DELIVERY_PERSISTENT: u8 = 2;

/// Destination for block numbers.
#[async_trait]
pub trait BlockQueue: Send {
    /// Publish one block. Returns only after the broker has acknowledged it.
    async fn publish(&mut self, block: u64) -> Result<()>;

    /// Called while the enqueuer idles so the connection is not left unattended.
    async fn keep_alive(&mut self) -> Result<()>;

    /// Orderly close of the broker connection.
    async fn close(&mut self) -> Result<()>;
}

/// Message body for a block: its decimal representation.
pub fn encode_block(block: u64) -> Vec<u8> {
    block.to_string().into_bytes()
}

/// Inverse of [encode_block], for consumers of the queue.
pub fn decode_block(payload: &[u8]) -> Result<u64> {
    let s = std::str::from_utf8(payload).context("payload not utf-8")?;
    s.parse().with_context(|| format!("payload not a block number: {s:?}"))
}

/// Overflow policy: nack publishes past `x-max-length` rather than drop-head.
const OVERFLOW_REJECT_PUBLISH: &str = "reject-publish";

/// Queue declaration arguments: priority support plus the caller's capacity.
pub fn queue_arguments(max_items: u64) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-max-priority".into(), AMQPValue::ShortShortUInt(MAX_PRIORITY));
    args.insert(
        "x-max-length".into(),
        AMQPValue::LongLongInt(i64::try_from(max_items).unwrap_or(i64::MAX)),
    );
    args.insert(
        "x-overflow".into(),
        AMQPValue::LongString(OVERFLOW_REJECT_PUBLISH.into()),
    );
    args
}

pub struct AmqpBlockQueue {
    connection: Connection,
    channel: Channel,
    queue_name: String,
    priority: Option<u8>,
}

impl AmqpBlockQueue {
    /// Connect, open a confirm-mode channel and declare the queue.
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .context("AMQP connect")?;
        let channel = connection.create_channel().await.context("AMQP channel")?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("enable publisher confirms")?;
        let queue = channel
            .queue_declare(
                &config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments(config.max_items),
            )
            .await
            .with_context(|| format!("declare queue {}", config.queue_name))?;
        tracing::info!(
            queue = queue.name().as_str(),
            messages = queue.message_count(),
            max_items = config.max_items,
            "work queue declared"
        );
        Ok(Self {
            connection,
            channel,
            queue_name: queue.name().as_str().to_string(),
            priority: config.priority,
        })
    }

    fn properties(&self) -> BasicProperties {
        let props = BasicProperties::default().with_delivery_mode(DELIVERY_PERSISTENT);
        match self.priority {
            Some(p) => props.with_priority(p),
            None => props,
        }
    }
}

#[async_trait]
impl BlockQueue for AmqpBlockQueue {
    async fn publish(&mut self, block: u64) -> Result<()> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &encode_block(block),
                self.properties(),
            )
            .await
            .context("basic_publish")?
            .await
            .context("publisher confirm")?;
        if !confirm.is_ack() {
            anyhow::bail!("broker did not acknowledge block {}", block);
        }
        tracing::debug!(block, "block delivered");
        Ok(())
    }

    async fn keep_alive(&mut self) -> Result<()> {
        if !self.connection.status().connected() || !self.channel.status().connected() {
            anyhow::bail!("AMQP connection is no longer open");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "enqueuer shutdown")
            .await
            .context("AMQP close")
    }
}
