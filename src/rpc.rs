//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to the two endpoints the pipeline needs:
//! `eth_getLogs` and block timestamp resolution via `eth_getBlockByNumber`.
//! Handles hex string parsing and error handling.

use crate::chain::ChainClient;
use crate::config::Config;
use crate::filter::{EventQueryFilter, ToBlock};
use crate::records::ServerId;
use crate::types::RawEventLog;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// JSON-RPC client for a single Ethereum node.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client with a bounded per-request timeout.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Failed to send RPC request")?;

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        // Check for RPC error
        if let Some(error) = json.get("error") {
            anyhow::bail!("RPC error: {}", error);
        }

        // Extract result
        json.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }

    /// Query event logs matching a filter.
    pub async fn get_logs(&self, filter: &EventQueryFilter) -> Result<Vec<RawEventLog>> {
        let params = json!([filter_to_params(filter)]);
        let result = self.call("eth_getLogs", params).await?;
        serde_json::from_value(result).context("Failed to deserialize event logs")
    }

    /// Get the timestamp (Unix epoch seconds) of a block.
    pub async fn get_block_timestamp(&self, block: u64) -> Result<u64> {
        let block_str = format!("0x{:x}", block);
        let params = json!([block_str, false]);
        let result = self.call("eth_getBlockByNumber", params).await?;

        if result.is_null() {
            anyhow::bail!("Block {} not found", block);
        }

        // Extract timestamp field from block
        let timestamp_str = result
            .get("timestamp")
            .and_then(|v| v.as_str())
            .context("Block missing 'timestamp' field")?;

        let timestamp_str = timestamp_str.strip_prefix("0x").unwrap_or(timestamp_str);
        if timestamp_str.is_empty() {
            anyhow::bail!("Block timestamp is empty");
        }
        u64::from_str_radix(timestamp_str, 16).context("Failed to parse block timestamp")
    }
}

/// Encode a query filter as `eth_getLogs` parameters.
fn filter_to_params(filter: &EventQueryFilter) -> Value {
    let to_block = match filter.to_block {
        ToBlock::Latest => json!("latest"),
        ToBlock::Number(block) => json!(format!("0x{:x}", block)),
    };
    let topics: Vec<Value> = filter
        .topics
        .iter()
        .map(|topic| match topic {
            Some(value) => json!(format!("0x{:x}", value)),
            None => Value::Null,
        })
        .collect();

    json!({
        "fromBlock": format!("0x{:x}", filter.from_block),
        "toBlock": to_block,
        "address": format!("0x{:x}", filter.address),
        "topics": topics,
    })
}

/// One RPC client per enabled server.
pub struct ChainClients {
    clients: HashMap<ServerId, RpcClient>,
}

impl ChainClients {
    /// Build a client for every server in the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut clients = HashMap::new();
        for server in &config.servers {
            let client = RpcClient::new(server.rpc_url.clone(), config.rpc_timeout())
                .with_context(|| format!("Failed to build RPC client for {}", server.name))?;
            clients.insert(server.chain_id, client);
        }
        Ok(Self { clients })
    }

    fn client(&self, server: ServerId) -> Result<&RpcClient> {
        self.clients
            .get(&server)
            .with_context(|| format!("No RPC client configured for server {}", server))
    }
}

impl ChainClient for ChainClients {
    async fn query_logs(
        &self,
        server: ServerId,
        filter: &EventQueryFilter,
    ) -> Result<Vec<RawEventLog>> {
        self.client(server)?.get_logs(filter).await
    }

    async fn block_timestamp(&self, server: ServerId, block: u64) -> Result<u64> {
        self.client(server)?.get_block_timestamp(block).await
    }
}
