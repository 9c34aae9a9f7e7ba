use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, instrument, Level};

use common::{
    config::{Config, IdentityCredential},
    AwaitCache,
};

use crate::service::{CoreMsg, MsgReceiver, ServiceRegistry, ServiceType};

use super::{msg::SessionMsg, session::UpstreamSession, transport::UpstreamTransport};

/// Maintains one `UpstreamSession` per (identity, data-center). Opening a
/// session is potentially slow, so concurrent callers for the same key share
/// the same in-flight attempt via `AwaitCache` rather than racing duplicate
/// opens.
///
/// This service takes a runtime-supplied `UpstreamTransport` its
/// construction needs, so like the other services it uses its own
/// `create`/`start` pair rather than a generic constructor — it is wired
/// up explicitly in `main`.
pub struct SessionPoolService {
    config: Arc<Config>,
    receiver: Arc<Mutex<MsgReceiver>>,
    handle: OnceCell<tokio::task::JoinHandle<anyhow::Result<()>>>,
    transport: Arc<dyn UpstreamTransport>,
}

impl SessionPoolService {
    pub fn create(
        config: Arc<Config>,
        registry: &ServiceRegistry,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<CoreMsg>(1024);

        registry
            .insert(ServiceType::SessionPool, tx)
            .expect("failed to add session pool sender to registry");

        SessionPoolService {
            config,
            receiver: Arc::new(Mutex::new(rx)),
            handle: OnceCell::new(),
            transport,
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    pub async fn start(&self, registry: &ServiceRegistry) -> anyhow::Result<()> {
        let receiver = self.receiver.clone();
        let state = Arc::new(SessionPool::new(
            self.config.clone(),
            registry.clone(),
            self.transport.clone(),
        ));

        let serve = async move {
            let mut receiver = receiver.lock().await;

            while let Some(msg) = receiver.recv().await {
                let state = Arc::clone(&state);
                tokio::task::spawn(async move {
                    if let Err(err) = state.message_handler(msg).await {
                        error!(service = "session_pool", error = %err, "failed to handle message");
                    }
                });
            }

            Err(anyhow::Error::msg("session pool channel disconnected"))
        };

        let handle = tokio::task::spawn(serve);
        self.handle
            .set(handle)
            .map_err(|_| anyhow::Error::msg("session pool already started"))?;

        debug!("finished startup for session pool service");
        Ok(())
    }
}

pub struct SessionPool {
    registry: ServiceRegistry,
    transport: Arc<dyn UpstreamTransport>,
    session_concurrency_cap: usize,
    sessions: AwaitCache<(String, u32), Arc<UpstreamSession>>,
}

impl SessionPool {
    pub fn new(
        config: Arc<Config>,
        registry: ServiceRegistry,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Self {
        SessionPool {
            registry,
            transport,
            session_concurrency_cap: config.streaming.session_concurrency_cap as usize,
            sessions: AwaitCache::new(),
        }
    }

    #[instrument(skip(self, credential))]
    pub async fn get_or_open(
        &self,
        credential: IdentityCredential,
        data_center_id: u32,
    ) -> anyhow::Result<Arc<UpstreamSession>> {
        let key = (credential.id.clone(), data_center_id);
        let transport = self.transport.clone();
        let concurrency_cap = self.session_concurrency_cap;

        self.sessions
            .get_or_try_init(key, move || async move {
                let session = Arc::new(UpstreamSession::new(
                    credential,
                    data_center_id,
                    transport,
                    concurrency_cap,
                ));
                session.open().await?;
                info!(data_center_id, "opened upstream session");
                Ok(session)
            })
            .await
    }

    /// Removes the pooled entry and transitions the session itself to
    /// `Closed`, so a reference to it held elsewhere (e.g. a chunk fetch
    /// already in flight against it) observes the closure rather than just
    /// losing its spot in the pool silently.
    pub async fn invalidate(&self, identity_id: String, data_center_id: u32) -> anyhow::Result<()> {
        if let Some(session) = self.sessions.remove(&(identity_id, data_center_id)) {
            session.close().await;
        }
        Ok(())
    }

    pub fn registry(&self) -> ServiceRegistry {
        self.registry.clone()
    }

    pub async fn message_handler(&self, msg: CoreMsg) -> anyhow::Result<()> {
        match msg {
            CoreMsg::Session(message) => match message {
                SessionMsg::GetOrOpen {
                    resp,
                    credential,
                    data_center_id,
                } => {
                    resp.send(self.get_or_open(credential, data_center_id).await)
                        .map_err(|_| anyhow::Error::msg("failed to respond to GetOrOpen"))
                }
                SessionMsg::Invalidate {
                    resp,
                    identity_id,
                    data_center_id,
                } => resp
                    .send(self.invalidate(identity_id, data_center_id).await)
                    .map_err(|_| anyhow::Error::msg("failed to respond to Invalidate")),
            },
            _ => Err(anyhow::Error::msg("not implemented")),
        }
    }
}
