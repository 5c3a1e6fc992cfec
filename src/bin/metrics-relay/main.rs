mod cli;

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::Layer as _;

use metrics_relay::registry::EndpointRegistry;
use metrics_relay::{config, server};

fn init_tracing(log_level: &str, json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::parse_args(std::env::args().skip(1))?;
    init_tracing(&args.log_level, args.json_logs)?;

    let config = config::load(&args.config)?;
    let registry = EndpointRegistry::from_config(&config)?;
    let listen = server::parse_listen_url(&args.listen)?;
    let app = registry.router_with_prefix(&args.context_path);

    tracing::info!(
        listen = %args.listen,
        endpoints = registry.len(),
        "metrics-relay starting"
    );
    server::serve(app, listen).await?;
    Ok(())
}
