//! Ingestion coordinator
//!
//! Top-level owner of the pipeline: receives change signals over a queue,
//! gates full sweeps through the rate-limited poller, fans each sweep out
//! across all tracked (token, card) pairs with a bounded task pool, and
//! aggregates completion. No error from an individual fetch aborts a sweep.

use crate::card::DefinitionServer;
use crate::chain::ChainClient;
use crate::config::Config;
use crate::fetcher::{fetch_card, FetchOutcome};
use crate::poller::{CompleteAction, RateLimitedPoller, TriggerAction};
use crate::records::ServerId;
use crate::registry::{DefinitionStore, TokenRegistry};
use crate::store::ActivityStore;
use alloy_primitives::Address;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Signals delivered to the coordinator's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Request a full ingestion sweep (token set changed, startup, timer)
    Sweep,
    /// A contract's event card definition changed; fetch just that token,
    /// immediately and without rate limiting
    DefinitionChanged(Address),
    /// A deferred sweep's timer elapsed
    ScheduledFired,
    /// A sweep finished (success or partial failure)
    SweepFinished,
    /// Stop the event loop once any running sweep has completed
    Shutdown,
}

/// Counts aggregated across one sweep.
#[derive(Debug, Default)]
struct SweepStats {
    fetched: usize,
    skipped: usize,
    records: usize,
    failures: usize,
}

/// Top-level ingestion coordinator.
pub struct Coordinator<C: ChainClient + 'static> {
    chain: Arc<C>,
    store: Arc<dyn ActivityStore>,
    registry: Arc<dyn TokenRegistry>,
    definitions: Arc<dyn DefinitionStore>,
    config: Arc<Config>,
    wallet: Address,
    poller: RateLimitedPoller,
    fan_out: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Signal>,
}

impl<C: ChainClient + 'static> Coordinator<C> {
    /// Create a coordinator and the receiving half of its signal queue.
    pub fn new(
        chain: Arc<C>,
        store: Arc<dyn ActivityStore>,
        registry: Arc<dyn TokenRegistry>,
        definitions: Arc<dyn DefinitionStore>,
        config: Arc<Config>,
        wallet: Address,
    ) -> (Self, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = RateLimitedPoller::new(config.sweep_interval());
        let fan_out = Arc::new(Semaphore::new(config.fetch_concurrency));
        (
            Self {
                chain,
                store,
                registry,
                definitions,
                config,
                wallet,
                poller,
                fan_out,
                tx,
            },
            rx,
        )
    }

    /// A handle for feeding signals into the event loop.
    pub fn signal_sender(&self) -> mpsc::UnboundedSender<Signal> {
        self.tx.clone()
    }

    /// Run the coordinator's event loop until shutdown.
    ///
    /// Shutdown is graceful: a running sweep finishes its batch writes
    /// before the loop exits.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<Signal>) -> Result<()> {
        let mut shutting_down = false;

        while let Some(signal) = rx.recv().await {
            match signal {
                Signal::Sweep => {
                    if shutting_down {
                        continue;
                    }
                    match self.poller.trigger(Instant::now()) {
                        TriggerAction::Start => self.spawn_sweep(),
                        TriggerAction::ScheduleIn(wait) => self.arm_timer(wait),
                        TriggerAction::AlreadyPending => {
                            debug!("Sweep trigger coalesced into pending sweep")
                        }
                    }
                }
                Signal::ScheduledFired => {
                    if shutting_down {
                        continue;
                    }
                    if self.poller.scheduled_fired(Instant::now()) {
                        self.spawn_sweep();
                    }
                }
                Signal::DefinitionChanged(contract) => {
                    if shutting_down {
                        continue;
                    }
                    self.spawn_definition_fetch(contract);
                }
                Signal::SweepFinished => {
                    match self.poller.complete(Instant::now()) {
                        CompleteAction::Idle => {}
                        CompleteAction::ScheduleRerunIn(wait) => {
                            if !shutting_down {
                                self.arm_timer(wait);
                            }
                        }
                    }
                    if shutting_down {
                        break;
                    }
                }
                Signal::Shutdown => {
                    shutting_down = true;
                    if !self.poller.is_running() {
                        break;
                    }
                    info!("Shutdown requested, waiting for running sweep to finish");
                }
            }
        }

        info!("Coordinator stopped");
        Ok(())
    }

    /// Arm a one-shot timer that feeds `ScheduledFired` back into the loop.
    fn arm_timer(&self, wait: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = tx.send(Signal::ScheduledFired);
        });
    }

    /// Start a full sweep in the background and report completion through
    /// the signal queue.
    fn spawn_sweep(&self) {
        let chain = Arc::clone(&self.chain);
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let definitions = Arc::clone(&self.definitions);
        let config = Arc::clone(&self.config);
        let fan_out = Arc::clone(&self.fan_out);
        let wallet = self.wallet;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            run_sweep(chain, store, registry, definitions, config, wallet, fan_out).await;
            let _ = tx.send(Signal::SweepFinished);
        });
    }

    /// Immediately fetch one token's cards after its definition changed.
    ///
    /// Bypasses the poller: the definition just became available or changed
    /// and staleness would be user-visible right away.
    fn spawn_definition_fetch(&self, contract: Address) {
        let chain = Arc::clone(&self.chain);
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let definitions = Arc::clone(&self.definitions);
        let config = Arc::clone(&self.config);
        let wallet = self.wallet;

        tokio::spawn(async move {
            let Some(definition) = definitions.definition(contract) else {
                return;
            };
            if definition.cards.is_empty() {
                return;
            }

            let servers: Vec<ServerId> = match definition.server {
                DefinitionServer::Specific(server) => {
                    if config.server(server).is_some() {
                        vec![server]
                    } else {
                        debug!(
                            contract = %contract,
                            server = %server,
                            "Definition targets a disabled server, ignoring"
                        );
                        Vec::new()
                    }
                }
                DefinitionServer::AnyEnabled => config.enabled_servers(),
            };

            for server in servers {
                // Only fetch for tokens the wallet actually tracks.
                let Some(entry) = registry.token(contract, server) else {
                    continue;
                };
                for card in &definition.cards {
                    if let Err(e) = fetch_card(
                        chain.as_ref(),
                        store.as_ref(),
                        &config,
                        wallet,
                        entry.contract,
                        server,
                        card,
                    )
                    .await
                    {
                        warn!(
                            contract = %contract,
                            server = %server,
                            event = %card.event_name,
                            error = %e,
                            "Definition-change fetch failed, will retry next sweep"
                        );
                    }
                }
            }
        });
    }
}

/// Run one full sweep: fetch every card of every tracked token.
///
/// Fetches run concurrently up to the fan-out limit. Individual failures
/// are counted and logged, never propagated; the sweep always completes.
async fn run_sweep<C: ChainClient + 'static>(
    chain: Arc<C>,
    store: Arc<dyn ActivityStore>,
    registry: Arc<dyn TokenRegistry>,
    definitions: Arc<dyn DefinitionStore>,
    config: Arc<Config>,
    wallet: Address,
    fan_out: Arc<Semaphore>,
) {
    let started = Instant::now();
    let servers = config.enabled_servers();
    let entries = registry.snapshot(&servers);
    info!(tokens = entries.len(), "Starting ingestion sweep");

    let mut tasks: JoinSet<Result<FetchOutcome>> = JoinSet::new();
    for entry in entries {
        let Some(definition) = definitions.definition(entry.contract) else {
            continue;
        };
        // A definition pinned to one server only applies to the token
        // tracked on that server.
        if let DefinitionServer::Specific(scope) = definition.server {
            if scope != entry.chain_id {
                continue;
            }
        }
        for card in definition.cards {
            let chain = Arc::clone(&chain);
            let store = Arc::clone(&store);
            let config = Arc::clone(&config);
            let fan_out = Arc::clone(&fan_out);
            tasks.spawn(async move {
                let _permit = fan_out
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow::anyhow!("Fan-out semaphore closed"))?;
                fetch_card(
                    chain.as_ref(),
                    store.as_ref(),
                    &config,
                    wallet,
                    entry.contract,
                    entry.chain_id,
                    &card,
                )
                .await
            });
        }
    }

    let mut stats = SweepStats::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(FetchOutcome::Fetched { written, .. })) => {
                stats.fetched += 1;
                stats.records += written;
            }
            Ok(Ok(FetchOutcome::NothingToQuery | FetchOutcome::Disabled)) => {
                stats.skipped += 1;
            }
            Ok(Err(e)) => {
                stats.failures += 1;
                warn!(error = %e, "Fetch failed, will retry next sweep");
            }
            Err(e) => {
                stats.failures += 1;
                warn!(error = %e, "Fetch task panicked or was cancelled");
            }
        }
    }

    info!(
        fetched = stats.fetched,
        skipped = stats.skipped,
        records = stats.records,
        failures = stats.failures,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Sweep complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::testutil::transfer_card;
    use crate::card::TokenDefinition;
    use crate::chain::mock::MockChain;
    use crate::config::ServerConfig;
    use crate::fetcher::testutil::transfer_log_to;
    use crate::records::EventGroupKey;
    use crate::registry::{InMemoryDefinitionStore, InMemoryTokenRegistry, TokenEntry};
    use crate::store::RocksActivityStore;
    use alloy_primitives::address;
    use tempfile::TempDir;

    const SERVER: ServerId = ServerId(1);

    fn wallet() -> Address {
        address!("0742d35cc6634c0532925a3b844bc9e7595f0beb")
    }

    fn token() -> Address {
        address!("dac17f958d2ee523a2206206994597c13d831ec7")
    }

    fn test_config() -> Config {
        Config {
            servers: vec![ServerConfig {
                chain_id: SERVER,
                name: "testnet".to_string(),
                rpc_url: "http://127.0.0.1:8545".to_string(),
                max_event_block_range: None,
            }],
            sweep_interval_secs: 60,
            rpc_timeout_secs: 5,
            fetch_concurrency: 4,
            auto_fetch_disabled: false,
        }
    }

    struct Fixture {
        chain: Arc<MockChain>,
        store: Arc<RocksActivityStore>,
        registry: Arc<InMemoryTokenRegistry>,
        definitions: Arc<InMemoryDefinitionStore>,
        config: Arc<Config>,
        _temp_dir: TempDir,
    }

    fn fixture(server_scope: DefinitionServer) -> Fixture {
        let card = transfer_card();
        let chain = Arc::new(MockChain::new(vec![
            transfer_log_to(&card, wallet(), 100, 0xaa, 0),
            transfer_log_to(&card, wallet(), 105, 0xbb, 2),
        ]));
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RocksActivityStore::open(temp_dir.path()).unwrap());
        let registry = Arc::new(InMemoryTokenRegistry::new());
        registry.add(TokenEntry {
            contract: token(),
            chain_id: SERVER,
        });
        let definitions = Arc::new(InMemoryDefinitionStore::new());
        definitions.insert(
            token(),
            TokenDefinition {
                server: server_scope,
                cards: vec![card],
            },
        );
        Fixture {
            chain,
            store,
            registry,
            definitions,
            config: Arc::new(test_config()),
            _temp_dir: temp_dir,
        }
    }

    fn group() -> EventGroupKey {
        let card = transfer_card();
        EventGroupKey {
            origin_contract: card.origin_contract,
            token_contract: token(),
            server: SERVER,
            event_name: card.event_name,
        }
    }

    #[tokio::test]
    async fn test_sweep_persists_records_and_shuts_down() {
        let f = fixture(DefinitionServer::AnyEnabled);
        let (coordinator, rx) = Coordinator::new(
            Arc::clone(&f.chain),
            f.store.clone() as Arc<dyn ActivityStore>,
            f.registry.clone() as Arc<dyn TokenRegistry>,
            f.definitions.clone() as Arc<dyn DefinitionStore>,
            Arc::clone(&f.config),
            wallet(),
        );
        let sender = coordinator.signal_sender();
        let handle = tokio::spawn(coordinator.run(rx));

        sender.send(Signal::Sweep).unwrap();
        // Shutdown waits for the running sweep to finish its writes.
        sender.send(Signal::Shutdown).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(f.store.count_in_group(&group()).unwrap(), 2);
        assert_eq!(f.chain.queries(), 1);
    }

    #[tokio::test]
    async fn test_burst_of_triggers_runs_one_sweep() {
        let f = fixture(DefinitionServer::AnyEnabled);
        let (coordinator, rx) = Coordinator::new(
            Arc::clone(&f.chain),
            f.store.clone() as Arc<dyn ActivityStore>,
            f.registry.clone() as Arc<dyn TokenRegistry>,
            f.definitions.clone() as Arc<dyn DefinitionStore>,
            Arc::clone(&f.config),
            wallet(),
        );
        let sender = coordinator.signal_sender();
        let handle = tokio::spawn(coordinator.run(rx));

        // All of these land before the first sweep finishes; the extras
        // coalesce, and shutdown drops the queued rerun.
        for _ in 0..5 {
            sender.send(Signal::Sweep).unwrap();
        }
        sender.send(Signal::Shutdown).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(f.chain.queries(), 1);
        assert_eq!(f.store.count_in_group(&group()).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sweep_with_failing_writes_still_completes() {
        let f = fixture(DefinitionServer::AnyEnabled);
        let store = Arc::new(crate::fetcher::testutil::WriteFailingStore {
            inner: RocksActivityStore::open(f._temp_dir.path().join("failing")).unwrap(),
        });
        let (coordinator, rx) = Coordinator::new(
            Arc::clone(&f.chain),
            store.clone() as Arc<dyn ActivityStore>,
            f.registry.clone() as Arc<dyn TokenRegistry>,
            f.definitions.clone() as Arc<dyn DefinitionStore>,
            Arc::clone(&f.config),
            wallet(),
        );
        let sender = coordinator.signal_sender();
        let handle = tokio::spawn(coordinator.run(rx));

        sender.send(Signal::Sweep).unwrap();
        // Graceful shutdown waits for the sweep, so a clean exit here
        // proves the batch failure was counted, not propagated.
        sender.send(Signal::Shutdown).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(f.chain.queries(), 1);
        assert_eq!(store.inner.count_in_group(&group()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_definition_change_fetches_single_token() {
        let f = fixture(DefinitionServer::Specific(SERVER));
        let (coordinator, rx) = Coordinator::new(
            Arc::clone(&f.chain),
            f.store.clone() as Arc<dyn ActivityStore>,
            f.registry.clone() as Arc<dyn TokenRegistry>,
            f.definitions.clone() as Arc<dyn DefinitionStore>,
            Arc::clone(&f.config),
            wallet(),
        );
        let sender = coordinator.signal_sender();
        let handle = tokio::spawn(coordinator.run(rx));

        sender.send(Signal::DefinitionChanged(token())).unwrap();
        // Give the unthrottled fetch task a moment to run, then stop.
        tokio::time::sleep(Duration::from_millis(200)).await;
        sender.send(Signal::Shutdown).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(f.chain.queries(), 1);
        assert_eq!(f.store.count_in_group(&group()).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_definition_change_for_untracked_contract_is_ignored() {
        let f = fixture(DefinitionServer::AnyEnabled);
        let (coordinator, rx) = Coordinator::new(
            Arc::clone(&f.chain),
            f.store.clone() as Arc<dyn ActivityStore>,
            f.registry.clone() as Arc<dyn TokenRegistry>,
            f.definitions.clone() as Arc<dyn DefinitionStore>,
            Arc::clone(&f.config),
            wallet(),
        );
        let sender = coordinator.signal_sender();
        let handle = tokio::spawn(coordinator.run(rx));

        let untracked = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");
        sender.send(Signal::DefinitionChanged(untracked)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sender.send(Signal::Shutdown).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(f.chain.queries(), 0);
    }
}
