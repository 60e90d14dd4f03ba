//! CLI implementation for activityctl
//!
//! Provides a developer-friendly command-line interface for inspecting
//! the activity store. All commands output pretty JSON.

use crate::config::parse_address;
use crate::records::{ActivityRecord, EventGroupKey, ServerId};
use crate::store::{ActivityStore, RocksActivityStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Activity store CLI tool
#[derive(Parser)]
#[command(name = "activityctl")]
#[command(about = "Token activity store CLI tool")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./activity_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the highest-block activity record for one group
    LastEvent {
        /// Contract that emits the event (hex, with or without 0x prefix)
        origin: String,
        /// Token contract the activity is surfaced for
        token: String,
        /// Chain id of the server
        chain_id: u64,
        /// Event name (e.g. Transfer)
        event_name: String,
    },
    /// List all activity records in one group
    ListEvents {
        /// Contract that emits the event (hex, with or without 0x prefix)
        origin: String,
        /// Token contract the activity is surfaced for
        token: String,
        /// Chain id of the server
        chain_id: u64,
        /// Event name (e.g. Transfer)
        event_name: String,
    },
    /// Count the activity records in one group
    CountEvents {
        /// Contract that emits the event (hex, with or without 0x prefix)
        origin: String,
        /// Token contract the activity is surfaced for
        token: String,
        /// Chain id of the server
        chain_id: u64,
        /// Event name (e.g. Transfer)
        event_name: String,
    },
}

/// Build a group key from CLI arguments.
fn parse_group(origin: &str, token: &str, chain_id: u64, event_name: &str) -> Result<EventGroupKey> {
    Ok(EventGroupKey {
        origin_contract: parse_address(origin)?,
        token_contract: parse_address(token)?,
        server: ServerId(chain_id),
        event_name: event_name.to_string(),
    })
}

/// Render one record for JSON output.
fn record_to_json(record: &ActivityRecord) -> Value {
    json!({
        "origin_contract": format!("0x{:x}", record.origin_contract),
        "token_contract": format!("0x{:x}", record.token_contract),
        "server": record.server.0,
        "event_name": record.event_name,
        "block_number": record.block_number,
        "transaction_id": format!("0x{:x}", record.transaction_id),
        "transaction_index": record.transaction_index,
        "log_index": record.log_index,
        "timestamp": record.timestamp,
        "filter_text": record.filter_text,
        "payload": serde_json::from_str::<Value>(&record.payload_json)
            .unwrap_or(Value::Null),
    })
}

/// Run the CLI command and print JSON output.
pub fn run(cli: Cli) -> Result<()> {
    let store = RocksActivityStore::open(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = match cli.command {
        Commands::LastEvent {
            origin,
            token,
            chain_id,
            event_name,
        } => {
            let group = parse_group(&origin, &token, chain_id, &event_name)?;
            match store.last_matched_event(&group)? {
                Some(record) => record_to_json(&record),
                None => Value::Null,
            }
        }
        Commands::ListEvents {
            origin,
            token,
            chain_id,
            event_name,
        } => {
            let group = parse_group(&origin, &token, chain_id, &event_name)?;
            let records = store.activities_in_group(&group)?;
            Value::Array(records.iter().map(record_to_json).collect())
        }
        Commands::CountEvents {
            origin,
            token,
            chain_id,
            event_name,
        } => {
            let group = parse_group(&origin, &token, chain_id, &event_name)?;
            json!({ "count": store.count_in_group(&group)? })
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
