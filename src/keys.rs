//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Activity keys sort by block number within a group, so the last key in a
//! group prefix scan is the highest-block record for that group.

use crate::records::EventGroupKey;
use alloy_primitives::B256;

/// Length of the variable suffix after a group prefix:
/// block (8 bytes) + transaction hash (32 bytes) + log index (8 bytes).
pub const ACTIVITY_SUFFIX_LEN: usize = 48;

/// Encode the group prefix shared by all activity keys in one group.
///
/// Format: byte 'E' (0x45) + origin (20 bytes) + token (20 bytes)
/// + server (8 bytes, big-endian) + name length (1 byte) + name bytes.
///
/// Event names longer than 255 bytes are rejected by the store before
/// any key is encoded.
pub fn encode_group_prefix(group: &EventGroupKey) -> Vec<u8> {
    let name = group.event_name.as_bytes();
    let mut key = Vec::with_capacity(50 + name.len());
    key.push(b'E');
    key.extend_from_slice(group.origin_contract.as_slice());
    key.extend_from_slice(group.token_contract.as_slice());
    key.extend_from_slice(&group.server.0.to_be_bytes());
    key.push(name.len() as u8);
    key.extend_from_slice(name);
    key
}

/// Encode a full activity key.
///
/// Format: group prefix + block (8 bytes, big-endian) + transaction hash
/// (32 bytes) + log index (8 bytes, big-endian). The (tx_hash, log_index)
/// tail makes the key unique per physical log entry, so re-writing the same
/// log lands on the same key.
pub fn encode_activity_key(
    group: &EventGroupKey,
    block: u64,
    tx_hash: B256,
    log_index: u64,
) -> Vec<u8> {
    let mut key = encode_group_prefix(group);
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(tx_hash.as_slice());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

/// Encode the upper bound for a reverse scan over one group.
///
/// This is the group prefix followed by a maximal suffix; the first key at
/// or below it that still starts with the prefix is the group's last record.
pub fn encode_group_upper_bound(group: &EventGroupKey) -> Vec<u8> {
    let mut key = encode_group_prefix(group);
    key.extend_from_slice(&[0xff; ACTIVITY_SUFFIX_LEN]);
    key
}
