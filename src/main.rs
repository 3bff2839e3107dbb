use infra_agent_core::status::{router, StatusState};
use infra_agent_core::{Agent, Config};
use std::env;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let data_dir = env::var("INFRA_DATA_DIR").unwrap_or_else(|_| "/var/db/infra-agent".to_string());
    let agent = Agent::new(&config, data_dir, env!("CARGO_PKG_VERSION"))?;

    let cloud = agent.cloud.clone();
    tokio::spawn(async move { cloud.run().await });

    let port: u16 = env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8003);
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("status surface listening on {}", addr);

    let status_app = router(StatusState::new(env!("CARGO_PKG_VERSION")));
    axum::serve(listener, status_app)
        .with_graceful_shutdown(shutdown_signal(agent.context.clone()))
        .await?;
    Ok(())
}

async fn shutdown_signal(context: std::sync::Arc<infra_agent_core::AgentContext>) {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
    context.terminate().await;
}
