use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{arg, command, Parser};
use tracing::{info, warn};

use api::info::BotInfo;
use common::config::read_config;

use server::http::{serve_http, HttpEndpoint};
use server::identity::{ClientDispatcher, ClientIdentity};
use server::ledger::{InMemoryLedgerBackend, LedgerService};
use server::locator::svc::LocatorCacheService;
use server::registry::StreamRegistry;
use server::service::ServiceRegistry;
use server::session::transport::MockTransport;
use server::session::SessionPoolService;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// config file
    #[arg(short, long, default_value = "/etc/streaming-bridge/config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    common::logging::init();

    let cli = Cli::parse();
    let config = Arc::new(read_config(&PathBuf::from(cli.config)).await?);

    let registry = ServiceRegistry::new();

    // A production deployment supplies a real `UpstreamTransport` backed by
    // the chat platform's client library; this binary ships the in-memory
    // mock so the crate is runnable standalone and in tests.
    let transport = Arc::new(MockTransport::new(0));

    let session_pool = SessionPoolService::create(config.clone(), &registry, transport);
    session_pool.start(&registry).await?;

    let locator_cache = LocatorCacheService::create(config.clone(), &registry);
    locator_cache.start(&registry).await?;

    let ledger_backend = Arc::new(InMemoryLedgerBackend::new());
    let ledger_service = LedgerService::create(config.clone(), &registry, ledger_backend);
    ledger_service.start(&registry).await?;

    let mut identities = vec![Arc::new(ClientIdentity::new(&config.identities.primary))];
    for credential in &config.identities.additional_client_identities {
        identities.push(Arc::new(ClientIdentity::new(credential)));
    }
    for identity in &identities {
        identity.set_ready(true);
    }

    let dispatcher = ClientDispatcher::new(identities, config.streaming.max_concurrent_streams_per_identity);

    let stream_registry = Arc::new(StreamRegistry::new());
    spawn_stale_stream_reaper(stream_registry.clone(), &config);

    let bot_info = BotInfo {
        id: config.identities.primary.id.clone(),
        username: config.identities.primary.id.clone(),
        first_name: config.identities.primary.id.clone(),
        mention: format!("@{}", config.identities.primary.id),
    };

    let endpoint = Arc::new(HttpEndpoint::new(
        config.clone(),
        registry,
        dispatcher,
        stream_registry,
        ledger_service.ledger(),
        bot_info,
    ));

    serve_http(config.http.socket.parse()?, endpoint).await
}

fn spawn_stale_stream_reaper(registry: Arc<StreamRegistry>, config: &common::config::Config) {
    let interval = Duration::from_secs(config.cleanup.stream_cleanup_interval_seconds.max(1));
    let max_age = Duration::from_secs(config.cleanup.stale_stream_max_age_seconds);

    tokio::task::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let reaped = registry.cleanup_stale(max_age);
            if reaped > 0 {
                info!(reaped, "stale stream reaper pass complete");
            }
        }
    });

    warn!("stale stream reaper scheduled; running with an in-memory mock upstream transport");
}
