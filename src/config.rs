//! Ingestion configuration
//!
//! Loads the enabled server list and pipeline tuning knobs from a JSON file.
//! Everything the pipeline needs to decide how often and how wide to sweep
//! is injectable here; nothing is hardcoded in the pipeline itself.

use crate::records::ServerId;
use crate::types::pad_hex_string;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// One enabled RPC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Chain id, doubles as the server identity
    pub chain_id: ServerId,
    /// Human-readable name for logging ("mainnet", "polygon", ...)
    pub name: String,
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Maximum width of one `eth_getLogs` sweep in blocks.
    ///
    /// Some providers reject unbounded ranges; when set, a fetch queries at
    /// most `from_block + max_event_block_range` and picks up the rest on
    /// the next sweep. None means "query up to the latest block".
    #[serde(default)]
    pub max_event_block_range: Option<u64>,
}

/// Top-level ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Enabled servers; tokens are tracked per server
    pub servers: Vec<ServerConfig>,
    /// Minimum interval between full ingestion sweeps, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Bounded timeout for each chain query / timestamp resolution, in seconds
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Maximum number of concurrent (token, card) fetches within one sweep
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Short-circuit every fetch cycle to an empty success (test/offline mode)
    #[serde(default)]
    pub auto_fetch_disabled: bool,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_fetch_concurrency() -> usize {
    8
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            anyhow::bail!("Config must enable at least one server");
        }
        if self.fetch_concurrency == 0 {
            anyhow::bail!("fetch_concurrency must be at least 1");
        }
        for server in &self.servers {
            if server.rpc_url.is_empty() {
                anyhow::bail!("Server {} has an empty rpc_url", server.chain_id);
            }
            if server.max_event_block_range == Some(0) {
                anyhow::bail!("Server {} has a zero max_event_block_range", server.chain_id);
            }
        }
        Ok(())
    }

    /// Ids of all enabled servers, in config order.
    pub fn enabled_servers(&self) -> Vec<ServerId> {
        self.servers.iter().map(|s| s.chain_id).collect()
    }

    /// Look up one server's configuration.
    pub fn server(&self, id: ServerId) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.chain_id == id)
    }

    /// Minimum interval between full sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Request timeout for chain queries and timestamp resolution.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix.
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let s = pad_hex_string(s);
    let bytes = hex::decode(&s).with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!(
            "Address must be 20 bytes (40 hex chars), got {} bytes",
            bytes.len()
        );
    }

    Ok(Address::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_config_with_defaults() {
        let file = write_config(
            r#"{
                "servers": [
                    {"chain_id": 1, "name": "mainnet", "rpc_url": "http://127.0.0.1:8545"}
                ]
            }"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.enabled_servers(), vec![ServerId(1)]);
        assert_eq!(config.sweep_interval_secs, 60);
        assert_eq!(config.rpc_timeout_secs, 30);
        assert_eq!(config.fetch_concurrency, 8);
        assert!(!config.auto_fetch_disabled);
        assert!(config.server(ServerId(1)).unwrap().max_event_block_range.is_none());
    }

    #[test]
    fn test_load_config_full() {
        let file = write_config(
            r#"{
                "servers": [
                    {"chain_id": 1, "name": "mainnet", "rpc_url": "http://127.0.0.1:8545", "max_event_block_range": 10000},
                    {"chain_id": 137, "name": "polygon", "rpc_url": "http://127.0.0.1:8546"}
                ],
                "sweep_interval_secs": 30,
                "rpc_timeout_secs": 10,
                "fetch_concurrency": 4,
                "auto_fetch_disabled": true
            }"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.enabled_servers(), vec![ServerId(1), ServerId(137)]);
        assert_eq!(
            config.server(ServerId(1)).unwrap().max_event_block_range,
            Some(10000)
        );
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert!(config.auto_fetch_disabled);
        assert!(config.server(ServerId(42)).is_none());
    }

    #[test]
    fn test_load_config_rejects_empty_servers() {
        let file = write_config(r#"{"servers": []}"#);
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_load_config_rejects_zero_concurrency() {
        let file = write_config(
            r#"{
                "servers": [{"chain_id": 1, "name": "mainnet", "rpc_url": "http://x"}],
                "fetch_concurrency": 0
            }"#,
        );
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_parse_address() {
        let addr1 = parse_address("0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
        let addr2 = parse_address("0742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
        assert_eq!(addr1, addr2);
        assert!(parse_address("0x1234").is_err());
    }
}
