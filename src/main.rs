use std::sync::Arc;

use anyhow::Context;

use autoreply::api::{ApiState, operator_routes};
use autoreply::channels::{ChatClient, TelegramClient};
use autoreply::config::AutoreplyConfig;
use autoreply::responder::{MessageHandler, ResponseDispatcher};
use autoreply::session::SessionSignalLoop;
use autoreply::signals::{MemorySignalStore, RedisSignalStore, SignalStore};
use autoreply::store::{Database, LibSqlBackend};
use autoreply::worker::ReplyScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AutoreplyConfig::from_env().context("invalid configuration")?;

    eprintln!("🤖 Autoreply v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Session file: {}", config.session_file.display());
    eprintln!("   Operator API: http://0.0.0.0:{}/api/session", config.api_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // ── Signal store ─────────────────────────────────────────────────────
    let signals: Arc<dyn SignalStore> = match &config.redis_url {
        Some(url) => {
            eprintln!("   Signals: redis");
            Arc::new(
                RedisSignalStore::connect(url)
                    .await
                    .context("failed to connect to Redis signal store")?,
            )
        }
        None => {
            eprintln!("   Signals: in-process (operator API only)");
            Arc::new(MemorySignalStore::new())
        }
    };

    // ── Chat client + responder ──────────────────────────────────────────
    let client: Arc<dyn ChatClient> = Arc::new(TelegramClient::new(
        config.bot_token.clone(),
        config.owner_chat_id,
    ));
    let scheduler = Arc::new(ReplyScheduler::new(
        Arc::clone(&client),
        config.max_pending_replies,
    ));
    let dispatcher = ResponseDispatcher::new(Arc::clone(&client), scheduler.clone());
    let handler = Arc::new(MessageHandler::new(Arc::clone(&db), dispatcher));

    let session = Arc::new(SessionSignalLoop::new(
        Arc::clone(&signals),
        Arc::clone(&client),
        handler,
        config.session_file.clone(),
        config.poll_interval,
    ));

    if let Err(e) = client.connect().await {
        tracing::warn!("Initial connect failed, will retry on sign-in: {e}");
    }
    if let Err(e) = session.resume().await {
        tracing::error!("Failed to resume session: {e}");
    }
    let loop_handle = Arc::clone(&session).spawn();

    // ── Operator API ─────────────────────────────────────────────────────
    let app = operator_routes(ApiState {
        store: Arc::clone(&db),
        signals,
        session,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api_port))
        .await
        .with_context(|| format!("failed to bind operator API port {}", config.api_port))?;
    tracing::info!(port = config.api_port, "Operator API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
        })
        .await
        .context("operator API server failed")?;

    tracing::info!("Shutting down");
    loop_handle.abort();
    scheduler.stop_all().await;
    if let Err(e) = client.stop().await {
        tracing::warn!("Client stop failed: {e}");
    }

    Ok(())
}
