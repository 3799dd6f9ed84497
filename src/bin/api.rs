use stock_analyst_orchestrator::{
    api::{start_server, ApiState},
    build_supervisor,
    config::Settings,
    llm::build_language_model,
    retrieval::{ingest_directory, open_index},
    tools::{build_market_data, ToolRegistry},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    let settings = Settings::from_env()?;

    info!("Stock Analyst Orchestrator - API Server");
    info!(provider = ?settings.llm_provider, routing = ?settings.routing_policy, "Settings loaded");

    // Retrieval index: snapshot first, then whatever changed on disk
    let index = open_index(&settings).await?;
    match ingest_directory(&settings, &index).await {
        Ok(report) => info!(
            documents = report.documents,
            tickers = report.chunks_by_ticker.len(),
            "Document directory ingested"
        ),
        Err(e) => warn!(error = %e, "Ingestion failed, serving from snapshot only"),
    }

    // Create components
    let model = build_language_model(&settings)?;
    let tools = ToolRegistry::new(build_market_data(&settings)?);
    info!(model = model.name(), market_data = tools.source_name(), "Collaborators ready");

    let supervisor = build_supervisor(&settings, index.clone(), tools.clone(), model);
    info!(specialists = ?supervisor.registered(), "Supervisor initialized");

    // Start API server
    start_server(ApiState {
        supervisor: Arc::new(supervisor),
        index,
        tools,
        settings: Arc::new(settings),
    })
    .await?;

    Ok(())
}
