use crate::service::{CoreMsg, Responder};

#[derive(Debug)]
pub enum LedgerMsg {
    /// Accrues `bytes` against the ledger key for the current calendar
    /// month, computed at the moment this message is handled (chunk-write
    /// time), not when the owning request started.
    Accrue { resp: Responder<()>, bytes: u64 },
}

impl From<LedgerMsg> for CoreMsg {
    fn from(value: LedgerMsg) -> Self {
        CoreMsg::Ledger(value)
    }
}
