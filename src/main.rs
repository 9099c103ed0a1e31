use filegate::chat::SessionDeps;
use filegate::config::Config;
use filegate::gateway::{self, GatewaySettings};
use filegate::llm::AnthropicProvider;
use filegate::metrics::Metrics;
use filegate::tools::WorkspaceWriter;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "filegate",
    version,
    about = "Streaming LLM chat with human-approved file writes"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP + WebSocket server
    Start,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with layered subscriber (env filter + JSON lines)
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(filegate::logs::JsonLineLayer::stdout())
            .init();
    }

    let cli = Cli::parse();

    info!("bootstrap starting");
    let cfg = match Config::load(cli.config.as_deref()).await {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{e:#}"), "configuration invalid");
            return Err(e);
        }
    };
    let api_key = match cfg.api_key() {
        Ok(key) => key.to_string(),
        Err(e) => {
            error!("missing env ANTHROPIC_API_KEY");
            return Err(e);
        }
    };

    match cli.command {
        Some(Command::Start) | None => {}
        Some(Command::CheckConfig) => {
            println!("configuration ok: listening on {}", cfg.listen_addr());
            return Ok(());
        }
    }

    let provider = AnthropicProvider::with_config(
        api_key,
        cfg.anthropic.endpoint.clone(),
        cfg.anthropic.model.clone(),
        cfg.anthropic.max_tokens,
    )
    .context("failed to build Anthropic client")?;
    let writer = WorkspaceWriter::new(cfg.workspace.dir.clone())
        .with_chunking(cfg.workspace.chunk_size, cfg.workspace.chunk_delay());
    tokio::fs::create_dir_all(writer.root())
        .await
        .with_context(|| format!("failed to create workspace {}", writer.root().display()))?;

    let deps = SessionDeps {
        provider: Arc::new(provider),
        writer: Arc::new(writer),
        metrics: Arc::new(Metrics::new()),
    };

    let addr: SocketAddr = cfg
        .listen_addr()
        .parse()
        .with_context(|| format!("invalid listen address: {}", cfg.listen_addr()))?;

    // Create a shutdown cancellation token.
    let cancel = CancellationToken::new();
    let gw = gateway::start_gateway(
        addr,
        GatewaySettings {
            deps,
            allowed_origins: cfg.server.allowed_origins.clone(),
            shutdown: cancel.clone(),
        },
    )
    .await
    .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        addr = %gw.addr,
        model = %cfg.anthropic.model,
        workspace = %cfg.workspace.dir.display(),
        "http server listening"
    );

    // Wait for shutdown signal (Ctrl-C)
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");
    cancel.cancel();

    if tokio::time::timeout(std::time::Duration::from_secs(10), gw.handle)
        .await
        .is_err()
    {
        info!("gateway did not drain in time");
    }

    info!("shutdown complete");
    Ok(())
}
