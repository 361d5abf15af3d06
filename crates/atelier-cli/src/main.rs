mod config;

use atelier_agents::{ClaudeCli, HostToolchain};
use atelier_git::GitDriver;
use atelier_hub::{hub_routes, Hub};
use atelier_llm::LlmClient;
use atelier_orchestrator::{CycleDeps, Orchestrator, OrchestratorFactory, Scheduler};
use atelier_store::MemoryStore;
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use config::Config;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atelier", about = "Atelier — autonomous software studio")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and the realtime gateway
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port override (defaults to ATELIER_PORT or 8080)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve { host, port } => {
            let port = port.unwrap_or(config.port);

            let store = Arc::new(MemoryStore::new());
            let hub = Hub::new();
            let llm = Arc::new(
                LlmClient::new(config.api_key.clone())
                    .with_requests_per_minute(config.requests_per_minute),
            );
            let git = Arc::new(GitDriver::new(
                config.work_dir.clone(),
                config.host_token.clone(),
            )?);

            let factory: OrchestratorFactory = {
                let store = store.clone();
                let hub = hub.clone();
                Arc::new(move |project_id, user_id| {
                    Arc::new(Orchestrator::new(
                        project_id,
                        user_id,
                        CycleDeps {
                            completer: llm.clone(),
                            cli: Arc::new(ClaudeCli),
                            vcs: git.clone(),
                            tools: Arc::new(HostToolchain),
                            store: store.clone(),
                            hub: hub.clone(),
                            lens_picker: None,
                        },
                    ))
                })
            };

            let scheduler = Scheduler::new(store, hub.clone(), factory);
            scheduler.start().await?;

            let app = Router::new()
                .route("/health", get(health_handler))
                .merge(hub_routes(hub));

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(addr = %addr, "atelier listening");
            axum::serve(listener, app).await?;

            scheduler.stop().await;
        }
    }

    Ok(())
}

async fn health_handler() -> &'static str {
    "{\"status\":\"ok\",\"service\":\"atelier\"}"
}
