//! Pantry application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Build the shared embedder and index clients
//! 3. Run the requested command (`serve`, `ingest` or `search`)
//! 4. Close the clients, flushing the index snapshot

mod cli;

use clap::Parser;

use pantry_api::state::AppState;
use pantry_core::config::PantryConfig;
use pantry_vector::{Clients, IngestionPipeline, QueryEngine};

use cli::{CliArgs, Command};

/// Resolves once Ctrl-C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. A missing or unreadable file falls back to defaults.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match PantryConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (PantryConfig::default(), Some(e)),
    };

    // Tracing. RUST_LOG wins over every other source.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Pantry v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }
    config.general.log_level = log_level;

    let clients = Clients::from_config(&config)?;

    let outcome = run(&args, &mut config, &clients).await;

    // Always flush, even when the command failed part way.
    if let Err(e) = clients.close().await {
        tracing::error!(error = %e, "Failed to flush index on shutdown");
        outcome?;
        return Err(e.into());
    }
    outcome
}

async fn run(
    args: &CliArgs,
    config: &mut PantryConfig,
    clients: &Clients,
) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        Command::Serve { .. } => {
            let port = args.resolve_port(config.general.port);
            config.general.port = port;

            let state = AppState::new(config.clone(), clients.clone());
            tracing::info!(port, "Serving recipe search at http://127.0.0.1:{}/rag/search", port);
            pantry_api::start_server(port, state, shutdown_signal()).await?;
        }
        Command::Ingest { file } => {
            let pipeline = IngestionPipeline::with_config(clients.clone(), &config.ingest);
            let summary = pipeline.ingest_file(file).await?;
            for failure in &summary.errors {
                tracing::warn!(index = failure.index, reason = %failure.reason, "Record skipped");
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Search { query, k } => {
            let engine = QueryEngine::with_config(clients.clone(), &config.search);
            let k = k.unwrap_or(config.search.default_k as i64);
            let results = engine.search(query, k).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }
    Ok(())
}
