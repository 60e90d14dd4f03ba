//! Chain query interface
//!
//! The pipeline consumes the chain through this trait so fetch cycles can be
//! exercised against a scripted client in tests. The production
//! implementation lives in `rpc.rs`.

use crate::filter::EventQueryFilter;
use crate::records::ServerId;
use crate::types::RawEventLog;
use anyhow::Result;
use std::future::Future;

/// Read-only chain access used by the event fetcher.
///
/// Both calls carry a bounded timeout in the implementation; a timeout is
/// reported as an ordinary query failure.
pub trait ChainClient: Send + Sync {
    /// Query event logs matching a filter on one server.
    fn query_logs(
        &self,
        server: ServerId,
        filter: &EventQueryFilter,
    ) -> impl Future<Output = Result<Vec<RawEventLog>>> + Send;

    /// Resolve the wall-clock timestamp (Unix epoch seconds) of a block.
    fn block_timestamp(
        &self,
        server: ServerId,
        block: u64,
    ) -> impl Future<Output = Result<u64>> + Send;
}
