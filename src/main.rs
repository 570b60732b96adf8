use anyhow::Context;
use clap::Parser;
use jamroom::api::{self, AppState};
use jamroom::config::Config;
use jamroom::events::EventBus;
use jamroom::gateway::HttpGateway;
use jamroom::resolver::TrackResolver;
use jamroom::session::{Reaper, SessionRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jamroom", about = "Ephemeral per-user media sessions")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "JAMROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen port
    #[arg(long, env = "JAMROOM_PORT")]
    port: Option<u16>,

    /// Override the concurrent session cap
    #[arg(long, env = "JAMROOM_MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// Override the platform gateway base URL
    #[arg(long, env = "JAMROOM_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Override the search provider URL
    #[arg(long, env = "JAMROOM_SEARCH_URL")]
    search_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).await.context("loading configuration")?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_sessions) = args.max_sessions {
        config.max_sessions = max_sessions;
    }
    if let Some(gateway_url) = args.gateway_url {
        config.gateway_url = gateway_url;
    }
    if let Some(search_url) = args.search_url {
        config.search_url = search_url;
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "jamroom starting (max_sessions {}, intake window {}s)",
        config.max_sessions, config.intake_window_secs
    );

    let events = EventBus::new(config.event_buffer);
    let gateway = Arc::new(HttpGateway::new(config.gateway_url.clone()));
    let resolver = Arc::new(TrackResolver::new(config.search_url.clone()));
    let registry = SessionRegistry::new(
        gateway,
        resolver,
        events.clone(),
        config.max_sessions,
        config.intake_window(),
    );
    let reaper = Arc::new(Reaper::new(Arc::clone(&registry)));

    let app = api::router(AppState {
        registry,
        reaper,
        events,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
