use clap::Parser;
use copilot_bridge::{build_router, AppState, BridgeConfig, NodeBridge};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "copilot-bridge",
    about = "Anthropic- and OpenAI-compatible HTTP proxy over the GitHub Copilot completion bridge",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Node executable used to spawn the provider process (overrides config)
    #[arg(long)]
    node_path: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "copilot_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        println!("  1. copilot-bridge.toml (current directory)");
        if cfg!(target_os = "macos") {
            println!("  2. ~/Library/Application Support/copilot-bridge/config.toml");
        } else {
            println!("  2. $XDG_CONFIG_HOME/copilot-bridge/config.toml");
            println!("     ~/.config/copilot-bridge/config.toml");
        }
        println!("  3. ~/.copilot-bridge.toml");
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(node_path) = cli.node_path {
        config.provider.node_path = node_path;
    }

    info!("copilot-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Node:    {}", config.provider.node_path);
    match config.provider.module_path {
        Some(ref path) => info!("  Module:  {}", path.display()),
        None => info!("  Module:  (runtime resolution)"),
    }
    info!("  Port:    {}", config.port);
    info!(
        "  Aliases: {} anthropic, {} openai overrides",
        config.models.anthropic.len(),
        config.models.openai.len()
    );

    let provider = Arc::new(NodeBridge::new(&config.provider));
    let state = Arc::new(AppState::new(config.clone(), provider));

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  Anthropic dialect: POST http://localhost:{}/v1/messages", config.port);
    info!("  OpenAI dialect:    POST http://localhost:{}/v1/chat/completions", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
