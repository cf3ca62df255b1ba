//! In-memory collaborators for driving the enqueuer in tests.
//! Each fake is a cheap handle over shared state: keep a clone to inspect after the run.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use enqueuer::{BlockQueue, ChainSource, EnqueuerConfig, ProgressStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ChainState {
    pub tip: u64,
    pub fail: bool,
    pub polls: usize,
}

#[derive(Clone, Default)]
pub struct FakeChain(pub Arc<Mutex<ChainState>>);

impl FakeChain {
    pub fn at(tip: u64) -> Self {
        let chain = Self::default();
        chain.set_tip(tip);
        chain
    }

    pub fn set_tip(&self, tip: u64) {
        self.0.lock().unwrap().tip = tip;
    }

    pub fn fail(&self) {
        self.0.lock().unwrap().fail = true;
    }

    pub fn polls(&self) -> usize {
        self.0.lock().unwrap().polls
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn latest_block_number(&mut self) -> Result<u64> {
        let mut state = self.0.lock().unwrap();
        state.polls += 1;
        if state.fail {
            anyhow::bail!("chain source unreachable");
        }
        Ok(state.tip)
    }
}

#[derive(Debug, Default)]
pub struct QueueState {
    pub published: Vec<u64>,
    pub keep_alives: usize,
    pub closed: bool,
    pub close_calls: usize,
    pub connection_lost: bool,
    pub reject_block: Option<u64>,
}

#[derive(Clone, Default)]
pub struct FakeQueue(pub Arc<Mutex<QueueState>>);

impl FakeQueue {
    pub fn reject(&self, block: u64) {
        self.0.lock().unwrap().reject_block = Some(block);
    }

    /// Make every later keep-alive report a dead connection.
    pub fn lose_connection(&self) {
        self.0.lock().unwrap().connection_lost = true;
    }

    pub fn close_calls(&self) -> usize {
        self.0.lock().unwrap().close_calls
    }

    pub fn published(&self) -> Vec<u64> {
        self.0.lock().unwrap().published.clone()
    }

    pub fn keep_alives(&self) -> usize {
        self.0.lock().unwrap().keep_alives
    }

    pub fn closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }
}

#[async_trait]
impl BlockQueue for FakeQueue {
    async fn publish(&mut self, block: u64) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.reject_block == Some(block) {
            anyhow::bail!("broker nacked block {}", block);
        }
        state.published.push(block);
        Ok(())
    }

    async fn keep_alive(&mut self) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.closed || state.connection_lost {
            anyhow::bail!("connection closed");
        }
        state.keep_alives += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.closed = true;
        state.close_calls += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub enqueued: Option<u64>,
    pub processed: Option<u64>,
    pub writes: Vec<u64>,
    pub fail_reads: bool,
}

#[derive(Clone, Default)]
pub struct FakeStore(pub Arc<Mutex<StoreState>>);

impl FakeStore {
    pub fn with(enqueued: Option<u64>, processed: Option<u64>) -> Self {
        let store = Self::default();
        {
            let mut state = store.0.lock().unwrap();
            state.enqueued = enqueued;
            state.processed = processed;
        }
        store
    }

    pub fn set_processed(&self, block: u64) {
        self.0.lock().unwrap().processed = Some(block);
    }

    pub fn enqueued(&self) -> Option<u64> {
        self.0.lock().unwrap().enqueued
    }

    pub fn writes(&self) -> Vec<u64> {
        self.0.lock().unwrap().writes.clone()
    }

    pub fn fail_reads(&self) {
        self.0.lock().unwrap().fail_reads = true;
    }
}

#[async_trait]
impl ProgressStore for FakeStore {
    async fn processed_cursor(&mut self) -> Result<Option<u64>> {
        let state = self.0.lock().unwrap();
        if state.fail_reads {
            anyhow::bail!("store timeout");
        }
        Ok(state.processed)
    }

    async fn enqueued_cursor(&mut self) -> Result<Option<u64>> {
        let state = self.0.lock().unwrap();
        if state.fail_reads {
            anyhow::bail!("store timeout");
        }
        Ok(state.enqueued)
    }

    async fn set_enqueued_cursor(&mut self, block: u64) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.enqueued = Some(block);
        state.writes.push(block);
        Ok(())
    }
}

/// Config with the given thresholds and sleeps short enough for tests.
pub fn config(min_queue_size: u64, queue_max_items: u64, sync_from_block: u64) -> EnqueuerConfig {
    EnqueuerConfig {
        sleep_new_blocks: Duration::from_millis(1),
        sleep_queue_full: Duration::from_millis(1),
        min_queue_size,
        sync_from_block,
        queue_max_items,
    }
}
