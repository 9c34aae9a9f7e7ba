use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn, Level};

use common::config::{Config, IdentityCredential};

use crate::service::{CoreMsg, MsgReceiver, ServiceRegistry, ServiceType};
use crate::session::{msg::SessionMsg, TransportError};

use super::{msg::LocatorMsg, FileLocator};

enum CacheEntry {
    Positive(FileLocator),
    Negative(Instant),
}

/// Per-identity bounded LRU mapping `message_id -> FileLocator`, with a
/// short negative-cache entry recorded when the underlying reference turns
/// out to be gone, so repeated requests for a dead reference don't hammer
/// the upstream metadata call.
pub struct LocatorCacheService {
    config: Arc<Config>,
    receiver: Arc<Mutex<MsgReceiver>>,
    handle: tokio::sync::OnceCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

impl LocatorCacheService {
    pub fn create(config: Arc<Config>, registry: &ServiceRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CoreMsg>(1024);

        registry
            .insert(ServiceType::Locator, tx)
            .expect("failed to add locator cache sender to registry");

        LocatorCacheService {
            config,
            receiver: Arc::new(Mutex::new(rx)),
            handle: tokio::sync::OnceCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    pub async fn start(&self, registry: &ServiceRegistry) -> anyhow::Result<()> {
        let receiver = self.receiver.clone();
        let state = Arc::new(LocatorCache::new(self.config.clone(), registry.clone()));

        let serve = async move {
            let mut receiver = receiver.lock().await;

            while let Some(msg) = receiver.recv().await {
                let state = Arc::clone(&state);
                tokio::task::spawn(async move {
                    if let Err(err) = state.message_handler(msg).await {
                        error!(service = "locator_cache", error = %err, "failed to handle message");
                    }
                });
            }

            Err(anyhow::Error::msg("locator cache channel disconnected"))
        };

        let handle = tokio::task::spawn(serve);
        self.handle
            .set(handle)
            .map_err(|_| anyhow::Error::msg("locator cache already started"))?;

        debug!("finished startup for locator cache service");
        Ok(())
    }
}

pub struct LocatorCache {
    registry: ServiceRegistry,
    max_entries: NonZeroUsize,
    negative_ttl: Duration,
    per_identity: DashMap<String, Arc<Mutex<LruCache<u64, CacheEntry>>>>,
}

impl LocatorCache {
    pub fn new(config: Arc<Config>, registry: ServiceRegistry) -> Self {
        LocatorCache {
            registry,
            max_entries: NonZeroUsize::new(config.streaming.locator_cache_max_entries.max(1))
                .expect("locator_cache_max_entries must be nonzero"),
            negative_ttl: Duration::from_secs(config.streaming.locator_negative_cache_seconds),
            per_identity: DashMap::new(),
        }
    }

    pub fn registry(&self) -> ServiceRegistry {
        self.registry.clone()
    }

    pub async fn message_handler(&self, msg: CoreMsg) -> anyhow::Result<()> {
        match msg {
            CoreMsg::Locator(LocatorMsg::Lookup {
                resp,
                credential,
                message_id,
            }) => resp
                .send(self.lookup(credential, message_id).await)
                .map_err(|_| anyhow::Error::msg("failed to respond to Lookup")),
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }

    fn shard_for(&self, identity_id: &str) -> Arc<Mutex<LruCache<u64, CacheEntry>>> {
        self.per_identity
            .entry(identity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LruCache::new(self.max_entries))))
            .clone()
    }

    #[instrument(skip(self, credential))]
    pub async fn lookup(
        &self,
        credential: IdentityCredential,
        message_id: u64,
    ) -> anyhow::Result<FileLocator> {
        let shard = self.shard_for(&credential.id);

        {
            let mut cache = shard.lock().await;
            match cache.get(&message_id) {
                Some(CacheEntry::Positive(locator)) => return Ok(locator.clone()),
                Some(CacheEntry::Negative(recorded_at)) => {
                    if recorded_at.elapsed() < self.negative_ttl {
                        return Err(anyhow::Error::new(TransportError::NotFound));
                    }
                    cache.pop(&message_id);
                }
                None => {}
            }
        }

        let session_sender = self.registry.get(&ServiceType::SessionPool)?;
        let (tx, rx) = tokio::sync::oneshot::channel();

        session_sender
            .send(
                SessionMsg::GetOrOpen {
                    resp: tx,
                    credential: credential.clone(),
                    data_center_id: credential.home_data_center_id,
                }
                .into(),
            )
            .await?;

        let session = rx.await??;

        match session.fetch_metadata(message_id).await {
            Ok(locator) => {
                let mut cache = shard.lock().await;
                cache.put(message_id, CacheEntry::Positive(locator.clone()));
                Ok(locator)
            }
            Err(TransportError::NotFound) => {
                warn!(message_id, "reference not found upstream, recording negative cache entry");
                let mut cache = shard.lock().await;
                cache.put(message_id, CacheEntry::Negative(Instant::now()));
                Err(anyhow::Error::new(TransportError::NotFound))
            }
            Err(err) => Err(anyhow::Error::from(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::svc::SessionPool;
    use crate::session::transport::MockTransport;

    #[tokio::test]
    async fn caches_positive_lookup_and_avoids_second_fetch() {
        let registry = ServiceRegistry::new();
        let config = Arc::new(common::test_support::minimal_config());

        let (tx, mut rx) = tokio::sync::mpsc::channel::<CoreMsg>(16);
        registry.insert(ServiceType::SessionPool, tx).unwrap();

        let session_pool = Arc::new(SessionPool::new(
            config.clone(),
            registry.clone(),
            Arc::new(MockTransport::new(1024)),
        ));

        tokio::spawn({
            let session_pool = session_pool.clone();
            async move {
                while let Some(msg) = rx.recv().await {
                    session_pool.message_handler(msg).await.unwrap();
                }
            }
        });

        let cache = LocatorCache::new(config, registry);
        let credential = IdentityCredential {
            id: "bot1".to_string(),
            auth_token: "t".to_string(),
            home_data_center_id: 1,
        };

        let first = cache.lookup(credential.clone(), 42).await.unwrap();
        assert_eq!(first.size, 1024);

        let second = cache.lookup(credential, 42).await.unwrap();
        assert_eq!(second.local_id, first.local_id);
    }
}
