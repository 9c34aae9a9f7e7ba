use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::routing::get;
use axum::{Request, Router};
use regex::Regex;
use tokio::sync::oneshot;
use tower::Service;
use tracing::{error, info};

use api::info::BotInfo;
use common::config::Config;

use crate::identity::ClientDispatcher;
use crate::ledger::BandwidthLedger;
use crate::locator::msg::LocatorMsg;
use crate::locator::FileLocator;
use crate::policy::{BandwidthGate, CorsPolicy, RateLimiter};
use crate::registry::StreamRegistry;
use crate::service::{ServiceRegistry, ServiceType};

use super::api::info_handler;
use super::range::range_regex;
use super::stream::{download_handler, stream_handler, stream_preflight_handler};

/// Shared state behind every axum handler: message-channel handles to the
/// actor services plus the plain, non-suspending structures (dispatcher,
/// stream registry) that must stay off the actor model.
pub struct HttpEndpoint {
    pub(super) config: Arc<Config>,
    pub(super) registry: ServiceRegistry,
    pub(super) dispatcher: ClientDispatcher,
    pub(super) stream_registry: Arc<StreamRegistry>,
    pub(super) bandwidth_gate: BandwidthGate,
    pub(super) cors: CorsPolicy,
    pub(super) rate_limiter: RateLimiter,
    pub(super) range_regex: Regex,
    pub(super) bot_info: BotInfo,
    pub(super) started_at: Instant,
}

impl HttpEndpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        registry: ServiceRegistry,
        dispatcher: ClientDispatcher,
        stream_registry: Arc<StreamRegistry>,
        ledger: Arc<BandwidthLedger>,
        bot_info: BotInfo,
    ) -> Self {
        let ceiling = config.policy.monthly_bandwidth_ceiling_bytes;
        let rate_limit = config.policy.rate_limit_requests_per_minute;
        let origins = config.policy.cors_allowed_origins.clone();

        HttpEndpoint {
            config,
            registry,
            dispatcher,
            stream_registry,
            bandwidth_gate: BandwidthGate::new(ledger, ceiling),
            cors: CorsPolicy::new(origins),
            rate_limiter: RateLimiter::new(rate_limit),
            range_regex: range_regex(),
            bot_info,
            started_at: Instant::now(),
        }
    }

    pub(super) async fn locator_lookup(
        &self,
        credential: common::config::IdentityCredential,
        message_id: u64,
    ) -> anyhow::Result<FileLocator> {
        let sender = self.registry.get(&ServiceType::Locator)?;
        let (tx, rx) = oneshot::channel();

        sender
            .send(
                LocatorMsg::Lookup {
                    resp: tx,
                    credential,
                    message_id,
                }
                .into(),
            )
            .await
            .context("locator channel closed")?;

        rx.await.context("locator channel dropped response")?
    }
}

pub fn router(state: Arc<HttpEndpoint>) -> Router {
    Router::new()
        .route("/dl/{reference}", get(download_handler))
        .route(
            "/stream/{reference}",
            get(stream_handler).options(stream_preflight_handler),
        )
        .route("/api/info", get(info_handler))
        .with_state(state)
}

/// Bare hyper accept loop: axum's `Router` is wrapped in a `tower::Service`
/// and served over `hyper_util`'s auto (HTTP/1+2) builder, one task per
/// connection.
pub async fn serve_http(socket: SocketAddr, state: Arc<HttpEndpoint>) -> anyhow::Result<()> {
    let router = router(state);

    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {socket}"))?;

    info!(%socket, "http endpoint listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let mut router = router.clone();
        let io = hyper_util::rt::TokioIo::new(stream);

        tokio::task::spawn(async move {
            let service = hyper::service::service_fn(move |request: Request<hyper::body::Incoming>| {
                router.call(request)
            });

            if let Err(err) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(error = %err, "connection error");
            }
        });
    }
}
