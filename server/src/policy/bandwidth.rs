use std::sync::Arc;

use crate::ledger::{current_month_key, BandwidthLedger};

#[derive(Debug, thiserror::Error)]
#[error("monthly bandwidth ceiling reached")]
pub struct BandwidthCeilingReached;

/// Monthly bandwidth ceiling check. Disabled when `ceiling_bytes == 0`.
/// Reads the ledger's already-accrued total for the current month; does
/// not reserve or pre-charge anything, so concurrent requests admitted in
/// the same instant can all pass before the next chunk's accrual pushes
/// usage over.
pub struct BandwidthGate {
    ledger: Arc<BandwidthLedger>,
    ceiling_bytes: u64,
}

impl BandwidthGate {
    pub fn new(ledger: Arc<BandwidthLedger>, ceiling_bytes: u64) -> Self {
        BandwidthGate { ledger, ceiling_bytes }
    }

    pub fn ledger(&self) -> Arc<BandwidthLedger> {
        self.ledger.clone()
    }

    pub fn check(&self) -> Result<(), BandwidthCeilingReached> {
        if self.ceiling_bytes == 0 {
            return Ok(());
        }

        if self.ledger.usage(&current_month_key()) >= self.ceiling_bytes {
            Err(BandwidthCeilingReached)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedgerBackend;
    use crate::service::ServiceRegistry;

    #[tokio::test]
    async fn disabled_when_zero() {
        let ledger = Arc::new(BandwidthLedger::new(ServiceRegistry::new(), Arc::new(InMemoryLedgerBackend::new())));
        let gate = BandwidthGate::new(ledger, 0);
        assert!(gate.check().is_ok());
    }

    #[tokio::test]
    async fn rejects_at_or_above_ceiling() {
        let ledger = Arc::new(BandwidthLedger::new(ServiceRegistry::new(), Arc::new(InMemoryLedgerBackend::new())));
        ledger.accrue(100).await.unwrap();

        let gate = BandwidthGate::new(ledger.clone(), 100);
        assert!(gate.check().is_err());

        let gate = BandwidthGate::new(ledger, 101);
        assert!(gate.check().is_ok());
    }
}
