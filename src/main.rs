use std::sync::Arc;

use anyhow::Context;

use unified_inbox::channels::ConfiguredSenders;
use unified_inbox::config::ServerConfig;
use unified_inbox::dispatch::{self, Dispatcher, Scheduler};
use unified_inbox::ingest::InboundPipeline;
use unified_inbox::realtime::{Fanout, LocalHub};
use unified_inbox::server::{self, AppState};
use unified_inbox::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env().context("Invalid configuration")?;

    eprintln!("📬 Unified Inbox v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   HTTP: http://0.0.0.0:{}", config.port);
    eprintln!("   Webhook: http://0.0.0.0:{}/api/webhooks/twilio", config.port);
    eprintln!("   Realtime WS: ws://0.0.0.0:{}/ws/realtime/{{topic}}", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Real-time ────────────────────────────────────────────────────────
    let fanout = Arc::new(Fanout::from_config(&config.realtime, LocalHub::new()));
    eprintln!("   Realtime: {}", fanout.mode());

    // ── Channels ─────────────────────────────────────────────────────────
    let configured = config.channels.configured();
    eprintln!(
        "   Channels: {}",
        if configured.is_empty() {
            "none".to_string()
        } else {
            configured.join(", ")
        }
    );
    let senders = Arc::new(ConfiguredSenders::new(config.channels.clone()));

    // ── Pipelines ────────────────────────────────────────────────────────
    let pipeline = Arc::new(InboundPipeline::new(Arc::clone(&db), Arc::clone(&fanout)));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&db),
        senders,
        Arc::clone(&fanout),
    ));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&db), Arc::clone(&dispatcher)));

    let _ticker = match config.scheduler.interval {
        Some(every) => {
            eprintln!("   Scheduler: in-process every {}s", every.as_secs());
            Some(dispatch::spawn_ticker(Arc::clone(&scheduler), every))
        }
        None => {
            eprintln!("   Scheduler: external trigger only");
            None
        }
    };
    if config.scheduler.cron_secret.is_none() {
        tracing::warn!("CRON_SECRET not set; scheduler trigger will reject every call");
    }

    let app = server::router(AppState {
        db,
        pipeline,
        dispatcher,
        scheduler,
        fanout,
        cron_secret: config.scheduler.cron_secret.clone(),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
