//! Event fetch cycle
//!
//! Runs one fetch for one (token, card) pair: read the last matched block,
//! build the filter, query the chain, resolve timestamps, convert to
//! activity records, and batch-write them. A failed chain query abandons the
//! cycle for this sweep; a failed timestamp or decode drops only that log.

use crate::card::EventCard;
use crate::chain::ChainClient;
use crate::config::Config;
use crate::filter::{build_filter, EventQueryFilter, FilterOutcome};
use crate::records::{ActivityRecord, EventGroupKey, ServerId};
use crate::store::ActivityStore;
use crate::types::{parse_topic, topic_to_address, RawEventLog};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// How one fetch cycle ended. All variants are successes; chain query and
/// storage failures surface as errors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Auto-fetching is disabled; nothing was attempted.
    Disabled,
    /// No indexed parameter resolved to a filter value; the chain was
    /// never contacted.
    NothingToQuery,
    /// The chain was queried.
    Fetched {
        /// Logs returned by the query
        seen: usize,
        /// Logs dropped because their timestamp or payload could not be
        /// resolved this sweep; they are retried implicitly next sweep
        dropped: usize,
        /// Records written to the store
        written: usize,
    },
}

/// Run one fetch cycle for a (token, card) pair.
pub async fn fetch_card<C: ChainClient>(
    chain: &C,
    store: &dyn ActivityStore,
    config: &Config,
    wallet: Address,
    token_contract: Address,
    server: ServerId,
    card: &EventCard,
) -> Result<FetchOutcome> {
    if config.auto_fetch_disabled {
        return Ok(FetchOutcome::Disabled);
    }

    let group = EventGroupKey {
        origin_contract: card.origin_contract,
        token_contract,
        server,
        event_name: card.event_name.clone(),
    };

    let last_matched_block = store
        .last_matched_event(&group)
        .context("Failed to read last matched event")?
        .map(|record| record.block_number);

    let max_block_range = config
        .server(server)
        .and_then(|s| s.max_event_block_range);

    let filter = match build_filter(card, wallet, last_matched_block, max_block_range) {
        FilterOutcome::NothingToQuery => {
            debug!(
                token = %token_contract,
                event = %card.event_name,
                "No resolvable event filter, skipping fetch"
            );
            return Ok(FetchOutcome::NothingToQuery);
        }
        FilterOutcome::Query(filter) => filter,
    };

    let logs = chain
        .query_logs(server, &filter)
        .await
        .with_context(|| {
            format!(
                "Log query failed for {} on server {}",
                card.event_name, server
            )
        })?;

    let seen = logs.len();
    let mut records = Vec::with_capacity(seen);
    for log in logs {
        // One bad log never blocks the rest of the batch; it is retried
        // implicitly on the next sweep because nothing was recorded for it.
        let timestamp = match chain.block_timestamp(server, log.block_number).await {
            Ok(timestamp) => timestamp,
            Err(e) => {
                debug!(
                    block = log.block_number,
                    error = %e,
                    "Timestamp resolution failed, dropping log for this sweep"
                );
                continue;
            }
        };

        match convert_log(&group, card, &filter, &log, timestamp) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    block = log.block_number,
                    log_index = log.log_index,
                    error = %e,
                    "Failed to decode log, dropping it for this sweep"
                );
            }
        }
    }
    let dropped = seen - records.len();
    let written = records.len();

    store
        .upsert_batch(&records)
        .context("Failed to write activity batch")?;

    if seen > 0 {
        info!(
            token = %token_contract,
            event = %card.event_name,
            server = %server,
            seen,
            dropped,
            written,
            "Fetch cycle complete"
        );
    }

    Ok(FetchOutcome::Fetched {
        seen,
        dropped,
        written,
    })
}

/// Convert one timestamped log into an activity record.
fn convert_log(
    group: &EventGroupKey,
    card: &EventCard,
    filter: &EventQueryFilter,
    log: &RawEventLog,
    timestamp: u64,
) -> Result<ActivityRecord> {
    Ok(ActivityRecord {
        origin_contract: group.origin_contract,
        token_contract: group.token_contract,
        server: group.server,
        event_name: group.event_name.clone(),
        block_number: log.block_number,
        transaction_id: log.transaction_hash,
        transaction_index: log.transaction_index,
        log_index: log.log_index,
        timestamp,
        filter_text: filter.filter_text.clone(),
        payload_json: decode_payload(card, log)?,
    })
}

/// Decode a log's indexed parameters into a JSON object string.
///
/// Indexed parameters are named from the card's signature order; addresses
/// are unpadded to their 20-byte form, other types keep the full 32-byte
/// topic encoding. Non-indexed data is kept as a raw hex blob under "data".
fn decode_payload(card: &EventCard, log: &RawEventLog) -> Result<String> {
    let mut payload = Map::new();

    for (position, param) in card.indexed_parameters().enumerate() {
        let topic_str = log
            .topics
            .get(position + 1)
            .with_context(|| format!("Log missing topic for indexed parameter {}", param.name))?;
        let topic = parse_topic(topic_str)
            .with_context(|| format!("Invalid topic for indexed parameter {}", param.name))?;
        let value = if param.solidity_type == "address" {
            format!("0x{:x}", topic_to_address(topic))
        } else {
            format!("0x{:x}", topic)
        };
        payload.insert(param.name.clone(), json!(value));
    }

    payload.insert("data".to_string(), json!(format!("0x{}", hex::encode(&log.data))));

    serde_json::to_string(&Value::Object(payload)).context("Failed to encode event payload")
}
