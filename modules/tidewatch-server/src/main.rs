use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tidewatch_common::{Config, Platform};
use tidewatch_store::{PgStore, TrackerStore};
use tidewatch_tracker::platforms::{BlueskyAdapter, TwitchAdapter};
use tidewatch_tracker::{DiscordSink, NoopSink, NotificationSink, PlatformAdapter, TrackerRuntime, TrackerService};

mod admin;
mod app;
mod webhooks;

use app::AppState;

fn build_adapters(config: &Config) -> Vec<Arc<dyn PlatformAdapter>> {
    let mut adapters: Vec<Arc<dyn PlatformAdapter>> = Vec::new();

    match config.twitch_credentials() {
        Some((client_id, client_secret)) => adapters.push(Arc::new(TwitchAdapter::new(
            client_id,
            client_secret,
            config.cooldown(Platform::Twitch),
        ))),
        None => info!("TWITCH_CLIENT_ID/TWITCH_CLIENT_SECRET not set, Twitch polling disabled"),
    }
    if config.bluesky_enabled {
        adapters.push(Arc::new(BlueskyAdapter::new(config.cooldown(Platform::Bluesky))));
    }

    adapters
}

fn build_sink(config: &Config) -> Arc<dyn NotificationSink> {
    match &config.discord_bot_token {
        Some(token) => Arc::new(DiscordSink::new(token.clone())),
        None => {
            warn!("DISCORD_BOT_TOKEN not set, running as dry run (notifications are only logged)");
            Arc::new(NoopSink::new())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tidewatch=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let pg = PgStore::connect(&config.database_url).await?;
    pg.migrate().await?;
    info!("Migrations applied");

    let store: Arc<dyn TrackerStore> = Arc::new(pg);
    let service = Arc::new(TrackerService::new(store, build_sink(&config)));

    let adapters = build_adapters(&config);
    if adapters.is_empty() {
        warn!("No platform adapters enabled, only webhook intake will run");
    }
    let runtime = TrackerRuntime::launch(service.clone(), adapters);

    let state = Arc::new(AppState {
        service,
        webhook_secret: config.webhook_secret.clone(),
        admin_token: config.admin_token.clone(),
    });
    let app = app::router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("Tidewatch starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runtime.shutdown().await;
    Ok(())
}
