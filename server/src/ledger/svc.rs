use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, instrument, warn, Level};

use common::config::Config;

use crate::service::{CoreMsg, MsgReceiver, ServiceRegistry, ServiceType};

use super::{backend::LedgerBackend, msg::LedgerMsg};

pub struct LedgerService {
    config: Arc<Config>,
    receiver: Arc<Mutex<MsgReceiver>>,
    handle: OnceCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
    ledger: Arc<BandwidthLedger>,
}

impl LedgerService {
    pub fn create(config: Arc<Config>, registry: &ServiceRegistry, backend: Arc<dyn LedgerBackend>) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CoreMsg>(1024);

        registry
            .insert(ServiceType::Ledger, tx)
            .expect("failed to add ledger sender to registry");

        LedgerService {
            config,
            receiver: Arc::new(Mutex::new(rx)),
            handle: OnceCell::new(),
            ledger: Arc::new(BandwidthLedger::new(registry.clone(), backend)),
        }
    }

    /// Shared handle callers outside the actor (the HTTP layer's policy
    /// gates and `/api/info` assembly) can read from directly instead of
    /// paying a channel round trip for every request.
    pub fn ledger(&self) -> Arc<BandwidthLedger> {
        self.ledger.clone()
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    pub async fn start(&self, registry: &ServiceRegistry) -> anyhow::Result<()> {
        let _ = registry;
        let receiver = self.receiver.clone();
        let state = self.ledger.clone();

        let flush_interval = Duration::from_secs(self.config.cleanup.stream_cleanup_interval_seconds.max(1));
        tokio::task::spawn(flush_loop(state.clone(), flush_interval));

        let serve = async move {
            let mut receiver = receiver.lock().await;

            while let Some(msg) = receiver.recv().await {
                let state = Arc::clone(&state);
                tokio::task::spawn(async move {
                    if let Err(err) = state.message_handler(msg).await {
                        error!(service = "ledger", error = %err, "failed to handle message");
                    }
                });
            }

            Err(anyhow::Error::msg("ledger channel disconnected"))
        };

        let handle = tokio::task::spawn(serve);
        self.handle
            .set(handle)
            .map_err(|_| anyhow::Error::msg("ledger already started"))?;

        debug!("finished startup for ledger service");
        Ok(())
    }
}

async fn flush_loop(ledger: Arc<BandwidthLedger>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(err) = ledger.flush_all().await {
            warn!(error = %err, "bandwidth ledger flush failed");
        }
    }
}

/// Process-local accrual counters, periodically batched out to an external
/// store. The current-month counter is never evicted by any cleaner.
pub struct BandwidthLedger {
    registry: ServiceRegistry,
    backend: Arc<dyn LedgerBackend>,
    months: DashMap<String, AtomicU64>,
}

impl BandwidthLedger {
    pub fn new(registry: ServiceRegistry, backend: Arc<dyn LedgerBackend>) -> Self {
        BandwidthLedger {
            registry,
            backend,
            months: DashMap::new(),
        }
    }

    pub fn registry(&self) -> ServiceRegistry {
        self.registry.clone()
    }

    pub async fn message_handler(&self, msg: CoreMsg) -> anyhow::Result<()> {
        match msg {
            CoreMsg::Ledger(message) => match message {
                LedgerMsg::Accrue { resp, bytes } => resp
                    .send(self.accrue(bytes).await)
                    .map_err(|_| anyhow::Error::msg("failed to respond to Accrue")),
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }

    /// Accrues `bytes` against the month of *now*, computed at the instant
    /// this is called (chunk-write time) rather than when the owning
    /// request began — this is load-bearing for correctness near a month
    /// boundary.
    pub async fn accrue(&self, bytes: u64) -> anyhow::Result<()> {
        let month_key = current_month_key();
        self.months
            .entry(month_key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(bytes, Ordering::SeqCst);
        Ok(())
    }

    pub fn usage(&self, month_key: &str) -> u64 {
        self.months
            .get(month_key)
            .map(|counter| counter.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub async fn flush_all(&self) -> anyhow::Result<()> {
        for entry in self.months.iter() {
            let month_key = entry.key().clone();
            let bytes = entry.value().load(Ordering::SeqCst);
            self.backend.flush(&month_key, bytes).await?;
        }
        Ok(())
    }
}

pub fn current_month_key() -> String {
    Utc::now().format("%Y-%m").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accrual_is_monotonic_within_the_month() {
        let ledger = BandwidthLedger::new(ServiceRegistry::new(), Arc::new(super::super::backend::InMemoryLedgerBackend::new()));

        ledger.accrue(100).await.unwrap();
        ledger.accrue(50).await.unwrap();

        assert_eq!(ledger.usage(&current_month_key()), 150);
    }

    #[tokio::test]
    async fn flush_persists_current_total_idempotently() {
        let backend = Arc::new(super::super::backend::InMemoryLedgerBackend::new());
        let ledger = BandwidthLedger::new(ServiceRegistry::new(), backend.clone());

        ledger.accrue(200).await.unwrap();
        ledger.flush_all().await.unwrap();
        ledger.flush_all().await.unwrap();

        assert_eq!(backend.load(&current_month_key()).await.unwrap(), 200);
    }
}
