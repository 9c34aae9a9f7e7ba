use async_trait::async_trait;
use dashmap::DashMap;

/// The persisted side of the bandwidth ledger: an external document store
/// keyed by `year-month`, per the core's external-interfaces contract. The
/// core only ever writes to this collection; it never reads or writes the
/// `users` collection owned by the command surface.
#[async_trait]
pub trait LedgerBackend: Send + Sync + 'static {
    /// Replaces (or creates) the stored byte count for `month_key`.
    /// Implementations must make repeated flushes of the same value
    /// idempotent.
    async fn flush(&self, month_key: &str, bytes_used: u64) -> anyhow::Result<()>;

    /// Loads the persisted byte count for `month_key`, or 0 if unseen.
    async fn load(&self, month_key: &str) -> anyhow::Result<u64>;
}

/// In-process stand-in for the document store, used in tests and as a
/// development default. A production deployment supplies a real
/// `LedgerBackend` wrapping its document store client.
#[derive(Default)]
pub struct InMemoryLedgerBackend {
    months: DashMap<String, u64>,
}

impl InMemoryLedgerBackend {
    pub fn new() -> Self {
        InMemoryLedgerBackend::default()
    }
}

#[async_trait]
impl LedgerBackend for InMemoryLedgerBackend {
    async fn flush(&self, month_key: &str, bytes_used: u64) -> anyhow::Result<()> {
        self.months.insert(month_key.to_string(), bytes_used);
        Ok(())
    }

    async fn load(&self, month_key: &str) -> anyhow::Result<u64> {
        Ok(self.months.get(month_key).map(|v| *v).unwrap_or(0))
    }
}
