use tracing_subscriber::EnvFilter;

use selfheal::api;
use selfheal::{SelfHealConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = ServerConfig::from_env();
    let selfheal = SelfHealConfig::from_env();

    api::serve(server, selfheal).await
}
