//! Token registry and metadata definition interfaces
//!
//! The pipeline consumes both as snapshots plus a change notification
//! stream. The in-memory implementations here back the ingestor binary
//! (loaded from JSON files) and the tests; a wallet application would
//! provide its own implementations over its token database.

use crate::card::TokenDefinition;
use crate::records::ServerId;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Capacity of the change notification channels. Watchers that fall behind
/// coalesce the missed notifications into a single full sweep.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// One enabled token in the registry. Identity = (contract, server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub contract: Address,
    pub chain_id: ServerId,
}

/// Snapshot access to the set of enabled tokens.
pub trait TokenRegistry: Send + Sync {
    /// All enabled tokens on the given servers.
    fn snapshot(&self, servers: &[ServerId]) -> Vec<TokenEntry>;

    /// Look up one token by identity.
    fn token(&self, contract: Address, server: ServerId) -> Option<TokenEntry>;
}

/// Per-contract event card definitions.
pub trait DefinitionStore: Send + Sync {
    /// The definition for a contract, if one has been loaded.
    fn definition(&self, contract: Address) -> Option<TokenDefinition>;
}

/// In-memory token registry with a change notification stream.
pub struct InMemoryTokenRegistry {
    tokens: RwLock<Vec<TokenEntry>>,
    changes: broadcast::Sender<()>,
}

impl InMemoryTokenRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tokens: RwLock::new(Vec::new()),
            changes,
        }
    }

    /// Load tokens from a JSON file: an array of {contract, chain_id}.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tokens file: {:?}", path))?;
        let tokens: Vec<TokenEntry> =
            serde_json::from_str(&contents).context("Failed to parse tokens file")?;
        let registry = Self::new();
        *registry.tokens.write().expect("registry lock poisoned") = tokens;
        Ok(registry)
    }

    /// Subscribe to token-set change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    /// Enable a token. Notifies watchers.
    pub fn add(&self, entry: TokenEntry) {
        {
            let mut tokens = self.tokens.write().expect("registry lock poisoned");
            if !tokens.contains(&entry) {
                tokens.push(entry);
            }
        }
        let _ = self.changes.send(());
    }

    /// Disable a token. Notifies watchers.
    pub fn remove(&self, contract: Address, server: ServerId) {
        {
            let mut tokens = self.tokens.write().expect("registry lock poisoned");
            tokens.retain(|t| !(t.contract == contract && t.chain_id == server));
        }
        let _ = self.changes.send(());
    }
}

impl Default for InMemoryTokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenRegistry for InMemoryTokenRegistry {
    fn snapshot(&self, servers: &[ServerId]) -> Vec<TokenEntry> {
        let tokens = self.tokens.read().expect("registry lock poisoned");
        tokens
            .iter()
            .filter(|t| servers.contains(&t.chain_id))
            .copied()
            .collect()
    }

    fn token(&self, contract: Address, server: ServerId) -> Option<TokenEntry> {
        let tokens = self.tokens.read().expect("registry lock poisoned");
        tokens
            .iter()
            .find(|t| t.contract == contract && t.chain_id == server)
            .copied()
    }
}

/// Entry in the definitions JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DefinitionEntry {
    contract: Address,
    #[serde(flatten)]
    definition: TokenDefinition,
}

/// In-memory definition store with a change stream keyed by contract.
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<Address, TokenDefinition>>,
    changes: broadcast::Sender<Address>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            definitions: RwLock::new(HashMap::new()),
            changes,
        }
    }

    /// Load definitions from a JSON file: an array of
    /// {contract, server, cards}.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read definitions file: {:?}", path))?;
        let entries: Vec<DefinitionEntry> =
            serde_json::from_str(&contents).context("Failed to parse definitions file")?;
        let store = Self::new();
        {
            let mut definitions = store.definitions.write().expect("definitions lock poisoned");
            for entry in entries {
                definitions.insert(entry.contract, entry.definition);
            }
        }
        Ok(store)
    }

    /// Subscribe to definition change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Address> {
        self.changes.subscribe()
    }

    /// Insert or replace a contract's definition. Notifies watchers.
    pub fn insert(&self, contract: Address, definition: TokenDefinition) {
        {
            let mut definitions = self.definitions.write().expect("definitions lock poisoned");
            definitions.insert(contract, definition);
        }
        let _ = self.changes.send(contract);
    }
}

impl Default for InMemoryDefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionStore for InMemoryDefinitionStore {
    fn definition(&self, contract: Address) -> Option<TokenDefinition> {
        let definitions = self.definitions.read().expect("definitions lock poisoned");
        definitions.get(&contract).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::testutil::transfer_card;
    use crate::card::DefinitionServer;
    use alloy_primitives::address;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_snapshot_filters_by_server() {
        let registry = InMemoryTokenRegistry::new();
        let contract = address!("dac17f958d2ee523a2206206994597c13d831ec7");
        registry.add(TokenEntry {
            contract,
            chain_id: ServerId(1),
        });
        registry.add(TokenEntry {
            contract,
            chain_id: ServerId(137),
        });

        let snapshot = registry.snapshot(&[ServerId(1)]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].chain_id, ServerId(1));

        assert!(registry.token(contract, ServerId(137)).is_some());
        assert!(registry.token(contract, ServerId(42)).is_none());

        registry.remove(contract, ServerId(1));
        assert!(registry.snapshot(&[ServerId(1)]).is_empty());
    }

    #[test]
    fn test_registry_change_notifications() {
        let registry = InMemoryTokenRegistry::new();
        let mut rx = registry.subscribe();
        registry.add(TokenEntry {
            contract: address!("dac17f958d2ee523a2206206994597c13d831ec7"),
            chain_id: ServerId(1),
        });
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_definition_insert_and_notify() {
        let store = InMemoryDefinitionStore::new();
        let contract = address!("dac17f958d2ee523a2206206994597c13d831ec7");
        let mut rx = store.subscribe();

        assert!(store.definition(contract).is_none());
        store.insert(
            contract,
            TokenDefinition {
                server: DefinitionServer::AnyEnabled,
                cards: vec![transfer_card()],
            },
        );
        assert_eq!(store.definition(contract).unwrap().cards.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), contract);
    }

    #[test]
    fn test_load_tokens_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"contract": "0xdac17f958d2ee523a2206206994597c13d831ec7", "chain_id": 1}},
                {{"contract": "0x0742d35cc6634c0532925a3b844bc9e7595f0beb", "chain_id": 137}}
            ]"#
        )
        .unwrap();
        file.flush().unwrap();

        let registry = InMemoryTokenRegistry::load(file.path()).unwrap();
        assert_eq!(registry.snapshot(&[ServerId(1), ServerId(137)]).len(), 2);
    }

    #[test]
    fn test_load_definitions_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{
                    "contract": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                    "server": "any",
                    "cards": [{{
                        "origin_contract": "0xdac17f958d2ee523a2206206994597c13d831ec7",
                        "event_name": "Transfer",
                        "abi_signature": "Transfer(address,address,uint256)",
                        "parameters": [
                            {{"name": "from", "type": "address", "indexed": true}},
                            {{"name": "to", "type": "address", "indexed": true}},
                            {{"name": "value", "type": "uint256"}}
                        ],
                        "filter_name": "to",
                        "filter_value": "${{ownerAddress}}"
                    }}]
                }}
            ]"#
        )
        .unwrap();
        file.flush().unwrap();

        let store = InMemoryDefinitionStore::load(file.path()).unwrap();
        let definition = store
            .definition(address!("dac17f958d2ee523a2206206994597c13d831ec7"))
            .unwrap();
        assert_eq!(definition.server, DefinitionServer::AnyEnabled);
        assert_eq!(definition.cards.len(), 1);
        assert_eq!(definition.cards[0].event_name, "Transfer");
    }
}
