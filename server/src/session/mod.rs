pub mod msg;
pub mod session;
pub mod svc;
pub mod transport;

pub use session::{SessionState, UpstreamSession};
pub use svc::{SessionPool, SessionPoolService};
pub use transport::{TransportError, UpstreamTransport};
