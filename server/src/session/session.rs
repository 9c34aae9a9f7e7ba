use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{RwLock, Semaphore};
use tracing::instrument;

use common::config::IdentityCredential;

use super::transport::{TransportError, UpstreamTransport};
use crate::locator::FileLocator;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Connecting,
    Ready,
    /// Carries the data-center the platform says the file actually lives
    /// in, so the pool can re-dial the right place on retry.
    ReauthNeeded { correct_data_center_id: u32 },
    Closed,
}

/// Long-lived authenticated channel to one data-center. Reference-counted
/// weakly by the Chunk Fetcher: a session outliving the requests currently
/// using it is fine, but the pool is the only strong owner.
pub struct UpstreamSession {
    pub identity_id: String,
    pub data_center_id: u32,
    credential: IdentityCredential,
    transport: Arc<dyn UpstreamTransport>,
    state: RwLock<SessionState>,
    /// Bounds outstanding chunk reads issued against this session; the pool
    /// round-robins callers through this permit.
    concurrency: Semaphore,
}

impl UpstreamSession {
    pub fn new(
        credential: IdentityCredential,
        data_center_id: u32,
        transport: Arc<dyn UpstreamTransport>,
        concurrency_cap: usize,
    ) -> Self {
        UpstreamSession {
            identity_id: credential.id.clone(),
            data_center_id,
            credential,
            transport,
            state: RwLock::new(SessionState::Connecting),
            concurrency: Semaphore::new(concurrency_cap),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_ready(&self) -> bool {
        matches!(self.state().await, SessionState::Ready)
    }

    #[instrument(skip(self))]
    pub async fn open(&self) -> anyhow::Result<()> {
        *self.state.write().await = SessionState::Connecting;

        self.transport
            .open_session(&self.credential, self.data_center_id)
            .await?;

        *self.state.write().await = SessionState::Ready;
        Ok(())
    }

    pub async fn close(&self) {
        *self.state.write().await = SessionState::Closed;
    }

    #[instrument(skip(self))]
    pub async fn fetch_metadata(&self, message_id: u64) -> Result<FileLocator, TransportError> {
        self.transport
            .fetch_metadata(&self.credential, message_id)
            .await
    }

    #[instrument(skip(self, locator))]
    pub async fn fetch_chunk(
        &self,
        locator: &FileLocator,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, TransportError> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("session concurrency semaphore closed");

        let result = self
            .transport
            .fetch_chunk(&self.credential, self.data_center_id, locator, offset, length)
            .await;

        if let Err(TransportError::AuthMigration {
            correct_data_center_id,
        }) = &result
        {
            *self.state.write().await = SessionState::ReauthNeeded {
                correct_data_center_id: *correct_data_center_id,
            };
        }

        result
    }
}
