//! Change watchers
//!
//! Bridge the external change notification streams (token set, metadata
//! definitions) onto the coordinator's signal queue. Delivery is
//! channel-based; ordering is irrelevant and missed notifications coalesce
//! into a full sweep.

use crate::coordinator::Signal;
use alloy_primitives::Address;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Forward token-set changes as full-sweep triggers.
///
/// Runs until either end of the plumbing closes.
pub fn spawn_token_set_watcher(
    mut changes: broadcast::Receiver<()>,
    tx: mpsc::UnboundedSender<Signal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(()) => {
                    if tx.send(Signal::Sweep).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // A sweep covers every token, so the missed
                    // notifications collapse into one trigger.
                    warn!(missed, "Token-set watcher lagged, forcing a sweep");
                    if tx.send(Signal::Sweep).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Token-set watcher stopped");
    })
}

/// Forward definition changes as single-token fetch triggers.
pub fn spawn_definition_watcher(
    mut changes: broadcast::Receiver<Address>,
    tx: mpsc::UnboundedSender<Signal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(contract) => {
                    if tx.send(Signal::DefinitionChanged(contract)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // We no longer know which contracts changed; fall back
                    // to a full sweep.
                    warn!(missed, "Definition watcher lagged, forcing a sweep");
                    if tx.send(Signal::Sweep).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Definition watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[tokio::test]
    async fn test_token_set_change_triggers_sweep() {
        let (changes_tx, changes_rx) = broadcast::channel(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_token_set_watcher(changes_rx, tx);

        changes_tx.send(()).unwrap();
        assert_eq!(rx.recv().await, Some(Signal::Sweep));

        drop(changes_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_definition_change_carries_contract() {
        let (changes_tx, changes_rx) = broadcast::channel(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_definition_watcher(changes_rx, tx);

        let contract = address!("dac17f958d2ee523a2206206994597c13d831ec7");
        changes_tx.send(contract).unwrap();
        assert_eq!(rx.recv().await, Some(Signal::DefinitionChanged(contract)));

        drop(changes_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_stops_when_coordinator_goes_away() {
        let (changes_tx, changes_rx) = broadcast::channel(8);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_token_set_watcher(changes_rx, tx);

        drop(rx);
        changes_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
