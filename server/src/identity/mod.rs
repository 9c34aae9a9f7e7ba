use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    Arc,
};

use tracing::{info, instrument};

use common::config::IdentityCredential;

/// A bot identity usable for fetching chunks from the upstream platform.
///
/// `wip_counter` and `primary_ready` are plain atomics rather than state
/// behind a message loop: dispatcher selection must be non-suspending, and
/// routing it through an actor's mpsc channel would add an await point
/// the selection path cannot afford.
#[derive(Debug)]
pub struct ClientIdentity {
    pub id: String,
    pub auth_token: String,
    pub home_data_center_id: u32,
    wip_counter: AtomicI64,
    primary_ready: AtomicBool,
}

impl ClientIdentity {
    pub fn new(credential: &IdentityCredential) -> Self {
        ClientIdentity {
            id: credential.id.clone(),
            auth_token: credential.auth_token.clone(),
            home_data_center_id: credential.home_data_center_id,
            wip_counter: AtomicI64::new(0),
            primary_ready: AtomicBool::new(false),
        }
    }

    pub fn credential(&self) -> IdentityCredential {
        IdentityCredential {
            id: self.id.clone(),
            auth_token: self.auth_token.clone(),
            home_data_center_id: self.home_data_center_id,
        }
    }

    pub fn wip_counter(&self) -> i64 {
        self.wip_counter.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.primary_ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.primary_ready.store(ready, Ordering::SeqCst);
    }

    /// Atomically bumps `wip_counter` only if it is still below `cap`,
    /// returning a guard that decrements it on drop. `None` means another
    /// caller filled the last slot between this identity being considered
    /// and this call running — the caller should move on to its next
    /// candidate rather than oversubscribing.
    pub fn try_acquire(self: &Arc<Self>, cap: i64) -> Option<WipGuard> {
        self.wip_counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current < cap { Some(current + 1) } else { None }
            })
            .ok()?;
        Some(WipGuard {
            identity: self.clone(),
        })
    }
}

/// Scoped acquisition of an identity's streaming slot. The invariant
/// `wip_counter >= 0` and convergence to 0 on drain both follow from this
/// type being the only way to increment the counter, and every path out of
/// the guarded section running `Drop`.
pub struct WipGuard {
    identity: Arc<ClientIdentity>,
}

impl Drop for WipGuard {
    fn drop(&mut self) {
        self.identity.wip_counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Selects one identity per request using a load metric, with re-selection
/// on failure. This is the "Client Dispatcher" component; it holds no async
/// state and performs no IO, so `select` never suspends.
#[derive(Debug)]
pub struct ClientDispatcher {
    identities: Vec<Arc<ClientIdentity>>,
    max_concurrent_streams_per_identity: i64,
}

impl ClientDispatcher {
    pub fn new(
        identities: Vec<Arc<ClientIdentity>>,
        max_concurrent_streams_per_identity: u32,
    ) -> Self {
        ClientDispatcher {
            identities,
            max_concurrent_streams_per_identity: max_concurrent_streams_per_identity as i64,
        }
    }

    pub fn identities(&self) -> &[Arc<ClientIdentity>] {
        &self.identities
    }

    /// Picks the ready candidate with the smallest `wip_counter`, excluding
    /// ids in `excluded`, and reserves its slot before returning so the
    /// selection itself is the reservation — nothing can observe a stale
    /// `wip_counter` and pick the same identity in the gap before the slot
    /// is actually claimed. Ties are broken by position in `identities` (the
    /// order identities were configured in); if the lowest-loaded candidate
    /// loses a race for its slot, the next-lowest is tried in turn.
    #[instrument(skip(self))]
    pub fn select(&self, excluded: &[String]) -> Option<(Arc<ClientIdentity>, WipGuard)> {
        let mut candidates: Vec<&Arc<ClientIdentity>> = self
            .identities
            .iter()
            .filter(|identity| !excluded.iter().any(|id| id == &identity.id))
            .filter(|identity| identity.is_ready())
            .collect();
        candidates.sort_by_key(|identity| identity.wip_counter());

        candidates.into_iter().find_map(|identity| {
            identity
                .try_acquire(self.max_concurrent_streams_per_identity)
                .map(|guard| (identity.clone(), guard))
        })
    }

    pub fn mark_failed(&self, id: &str) {
        if let Some(identity) = self.identities.iter().find(|identity| identity.id == id) {
            info!(identity = id, "marking identity unready after failure");
            identity.set_ready(false);
        }
    }

    pub fn mark_ready(&self, id: &str) {
        if let Some(identity) = self.identities.iter().find(|identity| identity.id == id) {
            identity.set_ready(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(id: &str) -> IdentityCredential {
        IdentityCredential {
            id: id.to_string(),
            auth_token: "t".to_string(),
            home_data_center_id: 1,
        }
    }

    #[test]
    fn selects_least_loaded_ready_identity() {
        let a = Arc::new(ClientIdentity::new(&cred("a")));
        let b = Arc::new(ClientIdentity::new(&cred("b")));
        a.set_ready(true);
        b.set_ready(true);

        let _guard = a.try_acquire(10).unwrap();

        let dispatcher = ClientDispatcher::new(vec![a.clone(), b.clone()], 10);
        let (selected, _guard) = dispatcher.select(&[]).unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn select_reserves_the_slot_it_returns() {
        let a = Arc::new(ClientIdentity::new(&cred("a")));
        a.set_ready(true);

        let dispatcher = ClientDispatcher::new(vec![a.clone()], 10);
        let (selected, _guard) = dispatcher.select(&[]).unwrap();
        assert_eq!(selected.wip_counter(), 1);
    }

    #[test]
    fn excludes_unready_and_excluded_identities() {
        let a = Arc::new(ClientIdentity::new(&cred("a")));
        let b = Arc::new(ClientIdentity::new(&cred("b")));
        a.set_ready(true);
        b.set_ready(false);

        let dispatcher = ClientDispatcher::new(vec![a.clone(), b.clone()], 10);
        assert_eq!(dispatcher.select(&[]).unwrap().0.id, "a");
        assert!(dispatcher.select(&["a".to_string()]).is_none());
    }

    #[test]
    fn rejects_identity_at_concurrency_cap() {
        let a = Arc::new(ClientIdentity::new(&cred("a")));
        a.set_ready(true);

        let dispatcher = ClientDispatcher::new(vec![a.clone()], 1);
        let guard = a.try_acquire(1).unwrap();
        assert!(dispatcher.select(&[]).is_none());
        drop(guard);
        assert!(dispatcher.select(&[]).is_some());
    }

    #[test]
    fn wip_counter_returns_to_zero_after_guard_drop() {
        let a = Arc::new(ClientIdentity::new(&cred("a")));
        {
            let _g1 = a.try_acquire(10).unwrap();
            let _g2 = a.try_acquire(10).unwrap();
            assert_eq!(a.wip_counter(), 2);
        }
        assert_eq!(a.wip_counter(), 0);
    }

    #[test]
    fn try_acquire_refuses_at_cap() {
        let a = Arc::new(ClientIdentity::new(&cred("a")));
        let _g1 = a.try_acquire(1).unwrap();
        assert!(a.try_acquire(1).is_none());
        assert_eq!(a.wip_counter(), 1);
    }
}
