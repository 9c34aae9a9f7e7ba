pub mod msg;
pub mod svc;

use serde::{Deserialize, Serialize};

/// The tuple of identifiers needed to request raw bytes of a file from the
/// upstream platform. Immutable for a given `message_id` over the life of
/// the file; access hashes are identity-scoped, so this is cached per
/// `ClientIdentity`, not globally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocator {
    pub data_center_id: u32,
    pub volume_id: u64,
    pub local_id: u64,
    pub access_hash: u64,
    pub size: u64,
    pub mime: String,
    pub filename: String,
    /// Unix seconds the message was created; used by the expiry gate. The
    /// upstream platform's message ids are not literally timestamps, so a
    /// transport implementation derives this however it tracks message
    /// creation time.
    pub message_timestamp: i64,
}
