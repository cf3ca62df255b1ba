//! Block enqueuer: follows the chain tip and publishes block numbers to a work queue.
//!
//! - **Enqueuer**: the loop. Reads the enqueue and processed cursors, applies backpressure
//!   when the consumer falls behind, publishes bounded catch-up batches in order, and
//!   persists the enqueue cursor only after the broker confirmed every block.
//! - **ChainSource** / **BlockQueue** / **ProgressStore**: the three collaborators, with
//!   JSON-RPC, AMQP and Redis implementations.

pub mod chain;
pub mod config;
pub mod cursor;
pub mod enqueuer;
pub mod queue;

pub use chain::{ChainSource, RpcChainSource};
pub use config::{ChainConfig, ConfigError, EnqueuerConfig, QueueConfig, StoreConfig};
pub use cursor::{ProgressStore, RedisProgressStore, LAST_BLOCK_ENQUEUED_KEY, LAST_BLOCK_PROCESSED_KEY};
pub use enqueuer::{plan_batch, Enqueuer, EnqueuerBuilder, EnqueuerError, Step};
pub use queue::{AmqpBlockQueue, BlockQueue};
