pub mod backend;
pub mod msg;
pub mod svc;

pub use backend::{InMemoryLedgerBackend, LedgerBackend};
pub use svc::{current_month_key, BandwidthLedger, LedgerService};
