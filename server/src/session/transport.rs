use async_trait::async_trait;
use bytes::Bytes;

use common::config::IdentityCredential;

use crate::locator::FileLocator;

/// Errors a transport implementation reports back to the session pool and
/// chunk fetcher. This is the boundary the core never crosses: nothing above
/// this trait knows the name of the upstream platform or its client library.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// The platform signalled that the file lives in a different
    /// data-center than the one we asked. Callers must invalidate the
    /// current session and retry against `correct_data_center_id`.
    #[error("file migrated to data center {correct_data_center_id}")]
    AuthMigration { correct_data_center_id: u32 },

    #[error("reference not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A thin interface the streaming core owns; implementations of this trait
/// wrap whatever client library talks to the messaging platform's media
/// servers. The core never names that library directly, only this trait.
#[async_trait]
pub trait UpstreamTransport: Send + Sync + 'static {
    /// Establishes (or re-establishes) an authenticated channel to
    /// `data_center_id` for the given identity. Implementations may no-op if
    /// already connected.
    async fn open_session(
        &self,
        credential: &IdentityCredential,
        data_center_id: u32,
    ) -> Result<(), TransportError>;

    /// Fetches metadata for `message_id` through `credential`'s primary
    /// session, returning the file's locator.
    async fn fetch_metadata(
        &self,
        credential: &IdentityCredential,
        message_id: u64,
    ) -> Result<FileLocator, TransportError>;

    /// Fetches exactly `length` bytes (or fewer, only at end-of-file) of the
    /// file described by `locator`, starting at `offset`, using the session
    /// already opened for `data_center_id`.
    async fn fetch_chunk(
        &self,
        credential: &IdentityCredential,
        data_center_id: u32,
        locator: &FileLocator,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, TransportError>;
}

/// Deterministic transport that serves a single fixed-size file whose byte
/// `k` equals `k mod 256`, per the end-to-end scenarios' mocked-upstream
/// contract. Used by the test suite, and wired into `main` as the default
/// so the binary runs standalone; a real deployment supplies its own
/// `UpstreamTransport` backed by the chat platform's client library.
pub struct MockTransport {
    pub data_center_id: u32,
    pub file_size: u64,
    pub mime: String,
    pub filename: String,
}

impl MockTransport {
    pub fn new(file_size: u64) -> Self {
        MockTransport {
            data_center_id: 1,
            file_size,
            mime: "application/octet-stream".to_string(),
            filename: "mock.bin".to_string(),
        }
    }

    fn locator_for(&self, message_id: u64) -> FileLocator {
        FileLocator {
            data_center_id: self.data_center_id,
            volume_id: 1,
            local_id: message_id,
            access_hash: message_id.wrapping_mul(7919),
            size: self.file_size,
            mime: self.mime.clone(),
            filename: self.filename.clone(),
            message_timestamp: 0,
        }
    }
}

#[async_trait]
impl UpstreamTransport for MockTransport {
    async fn open_session(
        &self,
        _credential: &IdentityCredential,
        _data_center_id: u32,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn fetch_metadata(
        &self,
        _credential: &IdentityCredential,
        message_id: u64,
    ) -> Result<FileLocator, TransportError> {
        Ok(self.locator_for(message_id))
    }

    async fn fetch_chunk(
        &self,
        _credential: &IdentityCredential,
        _data_center_id: u32,
        locator: &FileLocator,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, TransportError> {
        if offset >= locator.size {
            return Ok(Bytes::new());
        }

        let end = (offset + length).min(locator.size);
        let bytes: Vec<u8> = (offset..end).map(|i| (i % 256) as u8).collect();
        Ok(Bytes::from(bytes))
    }
}
