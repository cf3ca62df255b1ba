//! Chain source: current tip via JSON-RPC `eth_blockNumber`.
//!
//! Failures are returned as-is; the enqueuer does not retry source errors.

use crate::config::ChainConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Anything that can report the highest known block number.
#[async_trait]
pub trait ChainSource: Send {
    async fn latest_block_number(&mut self) -> Result<u64>;
}

async fn http_json_rpc(client: &reqwest::Client, url: &str, method: &str, params: Value, id: u64) -> Result<Value> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;
    let resp = resp.error_for_status().context("HTTP status")?;
    let json: Value = resp.json().await.context("parse response")?;
    rpc_result(json)
}

fn rpc_result(json: Value) -> Result<Value> {
    if let Some(err) = json.get("error") {
        anyhow::bail!("RPC error: {}", err);
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Missing result"))
}

/// Parse a JSON-RPC quantity (`"0x1a"`).
pub fn parse_quantity(result: &Value) -> Result<u64> {
    let s = result.as_str().ok_or_else(|| anyhow::anyhow!("blockNumber not string"))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).context("parse block number")
}

/// Chain source backed by an HTTP JSON-RPC endpoint.
pub struct RpcChainSource {
    client: reqwest::Client,
    http_url: String,
    next_id: u64,
}

impl RpcChainSource {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.request_timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            client,
            http_url: config.http_url.clone(),
            next_id: 1,
        })
    }
}

#[async_trait]
impl ChainSource for RpcChainSource {
    async fn latest_block_number(&mut self) -> Result<u64> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let result = http_json_rpc(&self.client, &self.http_url, "eth_blockNumber", json!([]), id).await?;
        let tip = parse_quantity(&result)?;
        tracing::debug!(tip, "chain tip");
        Ok(tip)
    }
}
