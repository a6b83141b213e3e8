use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod demo;
mod http;
mod session;

/// Server-push fan-out gateway: clients attach at /events and receive
/// broadcast and per-identity messages over SSE.
#[derive(Debug, Parser)]
#[command(name = "pushgate-gateway", version)]
struct Cli {
    /// Path to pushgate.toml (overrides PUSHGATE_CONFIG and the default
    /// location).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pushgate_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // config precedence: --config > PUSHGATE_CONFIG env > ~/.pushgate/pushgate.toml
    let config_path = cli.config.or_else(|| std::env::var("PUSHGATE_CONFIG").ok());
    let config =
        pushgate_core::PushgateConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            pushgate_core::PushgateConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let broker = pushgate_broker::Broker::new(config.broker.shards);

    if config.demo.enabled {
        tokio::spawn(demo::run(broker.clone()));
        info!("demo traffic generator enabled");
    }

    let state = Arc::new(app::AppState {
        config,
        broker: broker.clone(),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("pushgate gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    broker.shutdown();
    Ok(())
}
