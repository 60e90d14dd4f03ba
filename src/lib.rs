//! Tidelog - on-chain token activity ingestion
//!
//! This library turns raw on-chain event logs into persistent, queryable
//! activity records for a wallet. Event cards describe which logs matter
//! for a token, the fetcher pulls and decodes matching logs, and the
//! coordinator keeps everything fresh as tokens and definitions change.

pub mod keys;
pub mod records;
pub mod store;
pub mod cli;

// Ingestion pipeline modules
pub mod card;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod fetcher;
pub mod filter;
pub mod poller;
pub mod registry;
pub mod rpc;
pub mod types;
pub mod watchers;

// Re-export the main types for convenience
pub use records::{ActivityRecord, EventGroupKey, ServerId};
pub use store::{ActivityStore, RocksActivityStore};
