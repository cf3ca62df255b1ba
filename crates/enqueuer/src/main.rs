//! Enqueuer process: follow the chain tip and feed block numbers to the work queue.
//!
//! Every option can be given as a flag or as the environment variable named in `--help`.
//! Exits non-zero on the first unrecoverable error; restart is the supervisor's job.
//!
//! Usage:
//!
//!   RABBIT_URL=amqp://... RABBIT_QUEUE_NAME=blocks RABBIT_QUEUE_MAX_ITEMS=100 \
//!   CHAIN_RPC_URL=http://... cargo run -p enqueuer

use clap::Parser;
use enqueuer::{
    AmqpBlockQueue, ChainConfig, Enqueuer, EnqueuerBuilder, EnqueuerConfig, QueueConfig, RedisProgressStore,
    RpcChainSource, StoreConfig,
};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Seconds to sleep when no new blocks are available
    #[arg(long, env = "SLEEP_NEW_BLOCKS", default_value_t = 5)]
    sleep_new_blocks: u64,

    /// Seconds to sleep when the queue is full
    #[arg(long, env = "SLEEP_SEC_QUEUE_FULL", default_value_t = 30)]
    sleep_sec_queue_full: u64,

    /// Outstanding blocks (enqueued minus processed) at which publishing pauses
    #[arg(long, env = "MIN_QUEUE_SIZE", default_value_t = 25)]
    min_queue_size: u64,

    /// Block to start after when no cursor is stored
    #[arg(long, env = "SYNC_FROM_BLOCK", default_value_t = 0)]
    sync_from_block: u64,

    /// AMQP broker URI
    #[arg(long, env = "RABBIT_URL")]
    rabbit_url: String,

    /// Work queue name
    #[arg(long, env = "RABBIT_QUEUE_NAME")]
    rabbit_queue_name: String,

    /// Queue capacity; also the largest catch-up batch
    #[arg(long, env = "RABBIT_QUEUE_MAX_ITEMS", default_value_t = 100)]
    rabbit_queue_max_items: u64,

    /// Priority attached to published blocks (0-10)
    #[arg(long, env = "RABBIT_PRIORITY")]
    rabbit_priority: Option<u8>,

    #[arg(long, env = "REDIS_HOST", default_value = "redis")]
    redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    /// JSON-RPC endpoint of the chain node
    #[arg(long, env = "CHAIN_RPC_URL")]
    chain_rpc_url: String,

    /// Per-request timeout for the chain node, in seconds
    #[arg(long, env = "CHAIN_RPC_TIMEOUT", default_value_t = 30)]
    chain_rpc_timeout: u64,
}

impl Args {
    fn enqueuer_config(&self) -> EnqueuerConfig {
        EnqueuerConfig {
            sleep_new_blocks: Duration::from_secs(self.sleep_new_blocks),
            sleep_queue_full: Duration::from_secs(self.sleep_sec_queue_full),
            min_queue_size: self.min_queue_size,
            sync_from_block: self.sync_from_block,
            queue_max_items: self.rabbit_queue_max_items,
        }
    }

    fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            url: self.rabbit_url.clone(),
            queue_name: self.rabbit_queue_name.clone(),
            max_items: self.rabbit_queue_max_items,
            priority: self.rabbit_priority,
        }
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            host: self.redis_host.clone(),
            port: self.redis_port,
            db: self.redis_db,
        }
    }

    fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            http_url: self.chain_rpc_url.clone(),
            request_timeout: Duration::from_secs(self.chain_rpc_timeout),
        }
    }
}

/// Connect the collaborators and load the cursor. Errors here happen before the loop starts.
async fn connect(args: &Args) -> anyhow::Result<Enqueuer> {
    let config = args.enqueuer_config();
    config.validate()?;
    let store = RedisProgressStore::connect(&args.store_config().url()).await?;
    let chain = RpcChainSource::new(&args.chain_config())?;
    let queue = AmqpBlockQueue::connect(&args.queue_config()).await?;

    let enqueuer = EnqueuerBuilder::new()
        .config(config)
        .chain_source(chain)
        .queue(queue)
        .progress_store(store)
        .build()
        .await?;
    Ok(enqueuer)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let enqueuer = match connect(&args).await {
        Ok(enqueuer) => enqueuer,
        Err(e) => {
            tracing::error!(reason = %format!("{e:#}"), "enqueuer startup failed");
            return ExitCode::FAILURE;
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested");
            let _ = stop_tx.send(true);
        }
    });

    // Loop failures are logged by Enqueuer::run.
    match enqueuer.run(stop_rx).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
