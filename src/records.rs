//! Record types for persisted token activity
//!
//! These structs represent the data stored in the activity store.
//! They use postcard for binary serialization, which is compact and deterministic.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an enabled RPC server (the chain id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub u64);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One persisted activity row, derived from a single on-chain event log.
///
/// Primary key = (origin_contract, token_contract, server, event_name,
/// transaction_id, log_index). Writing the same key again is a no-op,
/// which makes re-fetching an already-seen block range harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Contract that emitted the event (the card's event origin)
    pub origin_contract: Address,
    /// Token contract this activity is surfaced for
    pub token_contract: Address,
    /// Server the event was observed on
    pub server: ServerId,
    /// Event name from the card definition (e.g. "Transfer")
    pub event_name: String,
    /// Block the log was included in
    pub block_number: u64,
    /// Hash of the transaction that emitted the log
    pub transaction_id: B256,
    /// Position of the transaction within its block
    pub transaction_index: u64,
    /// Position of the log within its block
    pub log_index: u64,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// Human-readable description of the filter that matched this event
    pub filter_text: String,
    /// Decoded event payload as a JSON object string
    pub payload_json: String,
}

impl ActivityRecord {
    /// The grouping key this record belongs to.
    pub fn group_key(&self) -> EventGroupKey {
        EventGroupKey {
            origin_contract: self.origin_contract,
            token_contract: self.token_contract,
            server: self.server,
            event_name: self.event_name.clone(),
        }
    }
}

/// Grouping key for "last matched event" lookups.
///
/// The highest persisted block number within a group defines the exclusive
/// lower bound for the next fetch's from-block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventGroupKey {
    pub origin_contract: Address,
    pub token_contract: Address,
    pub server: ServerId,
    pub event_name: String,
}
