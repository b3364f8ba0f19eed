use credit_risk_orchestrator::{
    api::{build_state, start_server},
    config::{AnalysisConfig, ServiceConfig},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let service = ServiceConfig::from_env()?;
    let analysis = AnalysisConfig::from_env()?;

    info!("Credit Risk Orchestrator - API Server");
    info!(port = service.port, "Configuration loaded");

    let state = build_state(&service, analysis).await?;
    info!("Components initialized");

    start_server(state, service.port).await?;

    Ok(())
}
