// ABOUTME: Entry point for the agentdeck binary.
// ABOUTME: Parses CLI arguments, initializes tracing, wires storage and engines, and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use agentdeck_agent::{
    EntityRegistry, HitlController, OfflineSearch, PerplexitySearch, WebSearch,
};
use agentdeck_server::{AppState, ServerConfig, create_router};
use agentdeck_store::{
    MemoryRunRegistry, MemorySessionStore, RunRegistry, SessionStore, SqliteStore,
};
use anyhow::Context;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Socket address to bind; overrides AGENTDECK_BIND.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// SQLite database path, or `:memory:`; overrides AGENTDECK_DATABASE.
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("agentdeck=debug,tower_http=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config = config.with_bind(bind)?;
    }
    if let Some(database) = cli.database.as_deref() {
        config = config.with_database(database);
    }

    let (runs, sessions) = match &config.database {
        Some(path) => {
            let store = Arc::new(
                SqliteStore::open(path)
                    .with_context(|| format!("opening database {}", path.display()))?,
            );
            tracing::info!(path = %path.display(), "using sqlite storage");
            let runs: Arc<dyn RunRegistry> = store.clone();
            let sessions: Arc<dyn SessionStore> = store;
            (runs, sessions)
        }
        None => {
            tracing::info!("using in-memory storage; runs are lost on restart");
            let runs: Arc<dyn RunRegistry> = Arc::new(MemoryRunRegistry::new());
            let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
            (runs, sessions)
        }
    };

    let search: Arc<dyn WebSearch> = match PerplexitySearch::from_env() {
        Some(search) => {
            tracing::info!("web search backed by perplexity");
            Arc::new(search)
        }
        None => {
            tracing::info!("PERPLEXITY_API_KEY not set; using offline search");
            Arc::new(OfflineSearch)
        }
    };

    let registry = Arc::new(EntityRegistry::builtin(search));
    tracing::info!(entities = registry.len(), "entity registry loaded");

    let controller = HitlController::new(registry, runs, sessions)
        .with_memory_token_limit(config.memory_token_limit);

    let bind = config.bind;
    if config.auth_token.is_some() {
        tracing::info!("bearer authentication enabled for /entities");
    }
    let app = create_router(AppState::shared(controller, config));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, "agentdeck listening");

    axum::serve(listener, app).await?;
    Ok(())
}
