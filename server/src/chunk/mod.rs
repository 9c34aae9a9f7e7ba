use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::Stream;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use common::config::IdentityCredential;

use crate::identity::ClientIdentity;
use crate::ledger::msg::LedgerMsg;
use crate::locator::FileLocator;
use crate::registry::StreamSession;
use crate::service::{ServiceRegistry, ServiceType};
use crate::session::{msg::SessionMsg, TransportError, UpstreamSession};

const MAX_TRANSIENT_RETRIES: u32 = 3;
const MAX_REOPEN_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_millis(2000);

#[derive(Debug, thiserror::Error)]
pub enum ChunkFetchError {
    #[error("upstream returned a short chunk mid-stream")]
    ShortChunk,

    #[error("upstream unavailable after retries")]
    UpstreamUnavailable,

    #[error("client cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Produces the lazy, finite sequence of byte slices whose concatenation
/// equals `file_bytes[start, start+length)`, chunk-aligned against the
/// upstream platform and trimmed at both ends to the requested interval.
///
/// `identity`/`credential` select which upstream session backs the fetch;
/// on an auth-migration error the loop invalidates the session and retries
/// against the data-center named in the error, up to
/// `max_session_reopen_retries` times before failing the stream with
/// `ChunkFetchError::UpstreamUnavailable`, matching the Upstream Session
/// Pool's contract in full rather than just opening once.
///
/// Cancellation is raced against the in-flight chunk fetch itself, not just
/// checked between chunks, so a cancelled stream can interrupt a read that's
/// still waiting on upstream rather than riding it out to completion.
#[allow(clippy::too_many_arguments)]
pub fn fetch_range(
    registry: ServiceRegistry,
    identity: Arc<ClientIdentity>,
    credential: IdentityCredential,
    locator: FileLocator,
    start: u64,
    length: u64,
    chunk_size: u64,
    max_session_reopen_retries: u32,
    stream: Arc<StreamSession>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, ChunkFetchError>> {
    try_stream! {
        if length == 0 {
            return;
        }

        let first_chunk_offset = start - (start % chunk_size);
        let first_trim = start - first_chunk_offset;

        let last_end = start + length;
        let last_chunk_end = last_end.div_ceil(chunk_size) * chunk_size;
        let last_trim = last_chunk_end - last_end;

        let mut offset = first_chunk_offset;
        let mut data_center_id = locator.data_center_id;
        let mut session = open_session(&registry, &credential, data_center_id).await?;
        let mut reopen_attempts = 0u32;

        while offset < last_chunk_end {
            if cancel.is_cancelled() {
                Err(ChunkFetchError::Cancelled)?;
            }

            let is_last = offset + chunk_size >= last_chunk_end;
            let want = chunk_size;

            let bytes = loop {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        Err(ChunkFetchError::Cancelled)?;
                        unreachable!()
                    }
                    outcome = fetch_one_chunk(&session, &locator, offset, want) => outcome,
                };

                match outcome {
                    Ok(bytes) => break bytes,
                    Err(FetchOutcome::Migrated { correct_data_center_id }) => {
                        reopen_attempts += 1;
                        if reopen_attempts > max_session_reopen_retries {
                            Err(ChunkFetchError::UpstreamUnavailable)?;
                            unreachable!()
                        }
                        invalidate(&registry, &credential.id, data_center_id).await?;
                        data_center_id = correct_data_center_id;
                        session = open_session(&registry, &credential, data_center_id).await?;
                        continue;
                    }
                    Err(FetchOutcome::RetriesExhausted) => {
                        Err(ChunkFetchError::UpstreamUnavailable)?;
                        unreachable!()
                    }
                }
            };

            if bytes.len() as u64 != want && !is_last {
                Err(ChunkFetchError::ShortChunk)?;
            }

            let trimmed = trim(bytes, offset == first_chunk_offset, is_last, first_trim, last_trim);

            stream.add_bytes_sent(trimmed.len() as u64);
            stream.touch();
            accrue_ledger(&registry, trimmed.len() as u64).await.ok();

            yield trimmed;

            offset += chunk_size;
        }
    }
}

enum FetchOutcome {
    Migrated { correct_data_center_id: u32 },
    RetriesExhausted,
}

async fn fetch_one_chunk(
    session: &Arc<UpstreamSession>,
    locator: &FileLocator,
    offset: u64,
    length: u64,
) -> Result<Bytes, FetchOutcome> {
    let mut attempt = 0u32;

    loop {
        match session.fetch_chunk(locator, offset, length).await {
            Ok(bytes) => return Ok(bytes),
            Err(TransportError::AuthMigration {
                correct_data_center_id,
            }) => {
                return Err(FetchOutcome::Migrated {
                    correct_data_center_id,
                })
            }
            Err(TransportError::Transient(reason)) => {
                attempt += 1;
                if attempt > MAX_TRANSIENT_RETRIES {
                    warn!(reason, "upstream transient error, retries exhausted");
                    return Err(FetchOutcome::RetriesExhausted);
                }

                let backoff = backoff_for(attempt);
                debug!(attempt, ?backoff, reason, "retrying chunk fetch after transient error");
                tokio::time::sleep(backoff).await;
            }
            Err(_) => return Err(FetchOutcome::RetriesExhausted),
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1 << attempt.min(4)).min(BACKOFF_CAP);
    let jitter_fraction = rand::rng().random_range(-0.25..=0.25);
    let millis = (exp.as_millis() as f64) * (1.0 + jitter_fraction);
    Duration::from_millis(millis.max(0.0) as u64)
}

fn trim(bytes: Bytes, is_first: bool, is_last: bool, first_trim: u64, last_trim: u64) -> Bytes {
    let mut bytes = bytes;
    if is_first && first_trim > 0 {
        bytes = bytes.slice((first_trim as usize).min(bytes.len())..);
    }
    if is_last && last_trim > 0 {
        let len = bytes.len();
        let keep = len.saturating_sub(last_trim as usize);
        bytes = bytes.slice(..keep);
    }
    bytes
}

async fn open_session(
    registry: &ServiceRegistry,
    credential: &IdentityCredential,
    data_center_id: u32,
) -> Result<Arc<UpstreamSession>, anyhow::Error> {
    let mut attempts = 0u32;
    loop {
        let sender = registry.get(&ServiceType::SessionPool)?;
        let (tx, rx) = tokio::sync::oneshot::channel();

        sender
            .send(
                SessionMsg::GetOrOpen {
                    resp: tx,
                    credential: credential.clone(),
                    data_center_id,
                }
                .into(),
            )
            .await?;

        match rx.await? {
            Ok(session) => return Ok(session),
            Err(err) => {
                attempts += 1;
                if attempts > MAX_REOPEN_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}

async fn invalidate(registry: &ServiceRegistry, identity_id: &str, data_center_id: u32) -> anyhow::Result<()> {
    let sender = registry.get(&ServiceType::SessionPool)?;
    let (tx, rx) = tokio::sync::oneshot::channel();

    sender
        .send(
            SessionMsg::Invalidate {
                resp: tx,
                identity_id: identity_id.to_string(),
                data_center_id,
            }
            .into(),
        )
        .await?;

    rx.await?
}

async fn accrue_ledger(registry: &ServiceRegistry, bytes: u64) -> anyhow::Result<()> {
    let sender = registry.get(&ServiceType::Ledger)?;
    let (tx, rx) = tokio::sync::oneshot::channel();

    sender.send(LedgerMsg::Accrue { resp: tx, bytes }.into()).await?;
    rx.await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BandwidthLedger, InMemoryLedgerBackend};
    use crate::session::SessionPool;
    use crate::session::transport::MockTransport;
    use crate::service::CoreMsg;
    use common::test_support::minimal_config;
    use futures_util::StreamExt;

    async fn spawn_session_pool(registry: &ServiceRegistry, file_size: u64) {
        let config = Arc::new(minimal_config());
        let (tx, mut rx) = tokio::sync::mpsc::channel::<CoreMsg>(64);
        registry.insert(ServiceType::SessionPool, tx).unwrap();

        let pool = Arc::new(SessionPool::new(config, registry.clone(), Arc::new(MockTransport::new(file_size))));
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                pool.message_handler(msg).await.unwrap();
            }
        });
    }

    async fn spawn_ledger(registry: &ServiceRegistry) {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<CoreMsg>(64);
        registry.insert(ServiceType::Ledger, tx).unwrap();

        let ledger = Arc::new(BandwidthLedger::new(registry.clone(), Arc::new(InMemoryLedgerBackend::new())));
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                ledger.message_handler(msg).await.unwrap();
            }
        });
    }

    fn test_identity() -> (Arc<ClientIdentity>, IdentityCredential) {
        let credential = IdentityCredential {
            id: "bot1".to_string(),
            auth_token: "t".to_string(),
            home_data_center_id: 1,
        };
        (Arc::new(ClientIdentity::new(&credential)), credential)
    }

    #[tokio::test]
    async fn concatenated_chunks_equal_requested_interval() {
        let registry = ServiceRegistry::new();
        let file_size = 1_048_576u64;
        spawn_session_pool(&registry, file_size).await;
        spawn_ledger(&registry).await;

        let (identity, credential) = test_identity();
        let locator = FileLocator {
            data_center_id: 1,
            volume_id: 1,
            local_id: 1,
            access_hash: 1,
            size: file_size,
            mime: "application/octet-stream".to_string(),
            filename: "f.bin".to_string(),
            message_timestamp: 0,
        };

        let stream_registry = crate::registry::StreamRegistry::new();
        let guard = identity.try_acquire(10).unwrap();
        let stream_session = stream_registry.register("s1".to_string(), &identity, 1, guard);

        let start = 1000u64;
        let length = 5000u64;

        let mut out = Vec::new();
        let mut chunks = Box::pin(fetch_range(
            registry,
            identity,
            credential,
            locator,
            start,
            length,
            1024 * 1024,
            3,
            stream_session.clone(),
            CancellationToken::new(),
        ));

        while let Some(chunk) = chunks.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(out.len() as u64, length);
        for (i, b) in out.iter().enumerate() {
            assert_eq!(*b, ((start as usize + i) % 256) as u8);
        }
        assert_eq!(stream_session.bytes_sent(), length);
    }

    #[tokio::test]
    async fn chunk_aligned_range_trims_nothing() {
        let registry = ServiceRegistry::new();
        let file_size = 2 * 1024 * 1024u64;
        spawn_session_pool(&registry, file_size).await;
        spawn_ledger(&registry).await;

        let (identity, credential) = test_identity();
        let locator = FileLocator {
            data_center_id: 1,
            volume_id: 1,
            local_id: 1,
            access_hash: 1,
            size: file_size,
            mime: "application/octet-stream".to_string(),
            filename: "f.bin".to_string(),
            message_timestamp: 0,
        };

        let stream_registry = crate::registry::StreamRegistry::new();
        let guard = identity.try_acquire(10).unwrap();
        let stream_session = stream_registry.register("s2".to_string(), &identity, 1, guard);

        let chunk_size = 1024 * 1024u64;
        let mut chunks = Box::pin(fetch_range(
            registry,
            identity,
            credential,
            locator,
            0,
            chunk_size,
            chunk_size,
            3,
            stream_session,
            CancellationToken::new(),
        ));

        let mut count = 0;
        while let Some(chunk) = chunks.next().await {
            count += 1;
            assert_eq!(chunk.unwrap().len() as u64, chunk_size);
        }
        assert_eq!(count, 1);
    }
}
