//! Ethereum JSON-RPC types
//!
//! Type definitions for event logs returned from `eth_getLogs` and helpers
//! for the hex-string encodings Ethereum JSON-RPC endpoints use.

use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

/// Raw event log returned by `eth_getLogs`.
///
/// Transient: converted into an `ActivityRecord` once its block timestamp
/// has been resolved, never persisted as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEventLog {
    /// Block the log was included in (hex string in JSON)
    #[serde(rename = "blockNumber", deserialize_with = "deserialize_hex_u64")]
    pub block_number: u64,

    /// Hash of the transaction that emitted the log (hex string in JSON)
    #[serde(rename = "transactionHash", deserialize_with = "deserialize_hex_b256")]
    pub transaction_hash: B256,

    /// Position of the transaction within its block (hex string in JSON)
    #[serde(rename = "transactionIndex", deserialize_with = "deserialize_hex_u64")]
    pub transaction_index: u64,

    /// Position of the log within its block (hex string in JSON)
    #[serde(rename = "logIndex", deserialize_with = "deserialize_hex_u64")]
    pub log_index: u64,

    /// Address of the contract that emitted the log
    #[serde(rename = "address", deserialize_with = "deserialize_hex_address")]
    pub address: Address,

    /// Indexed topics (topic0 = event signature, topics[1..] = indexed params)
    #[serde(rename = "topics", default)]
    pub topics: Vec<String>,

    /// Non-indexed event data (hex string)
    #[serde(rename = "data", deserialize_with = "deserialize_hex_bytes")]
    pub data: Vec<u8>,
}

/// Parse a 32-byte hex topic string into a B256.
pub fn parse_topic(topic: &str) -> Result<B256> {
    let s = topic.strip_prefix("0x").unwrap_or(topic);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).context("Invalid hex in topic")?;
    if bytes.len() != 32 {
        anyhow::bail!("Topic must be 32 bytes, got {}", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

/// Extract the address encoded in a 32-byte topic (last 20 bytes).
pub fn topic_to_address(topic: B256) -> Address {
    Address::from_slice(&topic.as_slice()[12..])
}

// Hex deserialization helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
pub(crate) fn pad_hex_string(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Deserialize a hex string to u64.
fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    u64::from_str_radix(s, 16).map_err(serde::de::Error::custom)
}

/// Deserialize a hex string to B256.
fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom(format!(
            "Expected 32 bytes for hash, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

/// Deserialize a hex string to Address.
fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 20 {
        return Err(serde::de::Error::custom(format!(
            "Expected 20 bytes for address, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

/// Deserialize a hex string to bytes.
fn deserialize_hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        Ok(Vec::new())
    } else {
        let s = pad_hex_string(s);
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
