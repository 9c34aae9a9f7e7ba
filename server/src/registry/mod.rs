use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::identity::{ClientIdentity, WipGuard};

/// In-process record of one live HTTP response. `last_activity_at` is
/// stored as milliseconds since this handle's own epoch (its `started_at`
/// instant) so it can be bumped with a single atomic store from the hot
/// per-chunk path instead of taking a lock.
pub struct StreamSession {
    pub id: String,
    pub client_identity_id: String,
    pub file_reference_id: u64,
    started_at: Instant,
    last_activity_millis: AtomicU64,
    bytes_sent: AtomicU64,
    cancel: CancellationToken,
    // held for the life of the stream; dropping it (on deregister) restores
    // the identity's wip_counter on every exit path.
    _wip_guard: WipGuard,
}

impl StreamSession {
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::SeqCst);
    }

    pub fn touch(&self) {
        let millis = self.started_at.elapsed().as_millis() as u64;
        self.last_activity_millis.store(millis, Ordering::SeqCst);
    }

    pub fn last_activity_age(&self) -> Duration {
        let millis = self.last_activity_millis.load(Ordering::SeqCst);
        self.started_at.elapsed().saturating_sub(Duration::from_millis(millis))
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Process-wide concurrent mapping `stream_id -> StreamSession`. Backed by a
/// plain `DashMap` rather than a message-passing actor: registry
/// operations must be non-suspending, and these are simple enough
/// (insert/remove/iterate) that an actor indirection would only add an
/// await point for no benefit.
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<String, Arc<StreamSession>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        StreamRegistry::default()
    }

    /// Registers a new stream, taking ownership of the `WipGuard` the caller
    /// already acquired at selection time (`ClientDispatcher::select`) for
    /// the life of the returned handle. The guard is accepted rather than
    /// created here so the dispatcher's selection and the slot reservation
    /// it implies stay atomic, with no async gap between them for a
    /// concurrent request to slip through.
    pub fn register(
        &self,
        id: String,
        identity: &Arc<ClientIdentity>,
        file_reference_id: u64,
        wip_guard: WipGuard,
    ) -> Arc<StreamSession> {
        let session = Arc::new(StreamSession {
            id: id.clone(),
            client_identity_id: identity.id.clone(),
            file_reference_id,
            started_at: Instant::now(),
            last_activity_millis: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            _wip_guard: wip_guard,
        });

        self.streams.insert(id, session.clone());
        session
    }

    pub fn touch(&self, id: &str) {
        if let Some(session) = self.streams.get(id) {
            session.touch();
        }
    }

    /// Removes the entry. Dropping the held `Arc<StreamSession>` releases
    /// the wip guard once every other reference (e.g. a reaper iterating
    /// concurrently) is also dropped.
    pub fn deregister(&self, id: &str) {
        self.streams.remove(id);
    }

    pub fn snapshot_count(&self) -> usize {
        self.streams.len()
    }

    /// Cancels and deregisters every entry whose `last_activity_age`
    /// exceeds `max_age`. Idempotent: running it twice with no intervening
    /// traffic finds nothing stale the second time, since the first pass
    /// already removed the entries.
    #[instrument(skip(self))]
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let stale_ids: Vec<String> = self
            .streams
            .iter()
            .filter(|entry| entry.value().last_activity_age() > max_age)
            .map(|entry| entry.key().clone())
            .collect();

        for id in &stale_ids {
            if let Some((_, session)) = self.streams.remove(id) {
                warn!(stream_id = %id, "reaping stale stream");
                session.cancel_handle().cancel();
            }
        }

        if !stale_ids.is_empty() {
            info!(count = stale_ids.len(), "cleaned up stale streams");
        }

        stale_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::IdentityCredential;

    fn identity() -> Arc<ClientIdentity> {
        Arc::new(ClientIdentity::new(&IdentityCredential {
            id: "bot1".to_string(),
            auth_token: "t".to_string(),
            home_data_center_id: 1,
        }))
    }

    #[test]
    fn register_bumps_wip_and_deregister_restores_it() {
        let registry = StreamRegistry::new();
        let identity = identity();
        assert_eq!(identity.wip_counter(), 0);

        let guard = identity.try_acquire(10).unwrap();
        let _session = registry.register("s1".to_string(), &identity, 42, guard);
        assert_eq!(identity.wip_counter(), 1);
        assert_eq!(registry.snapshot_count(), 1);

        registry.deregister("s1");
        assert_eq!(registry.snapshot_count(), 0);
        assert_eq!(identity.wip_counter(), 0);
    }

    #[test]
    fn cleanup_stale_is_idempotent() {
        let registry = StreamRegistry::new();
        let identity = identity();
        let guard = identity.try_acquire(10).unwrap();
        let session = registry.register("s1".to_string(), &identity, 42, guard);
        session.touch();

        assert_eq!(registry.cleanup_stale(Duration::from_secs(10)), 0);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.cleanup_stale(Duration::from_millis(5)), 1);
        assert_eq!(registry.cleanup_stale(Duration::from_millis(5)), 0);
    }
}
