use std::sync::Arc;

use miette::IntoDiagnostic;
use tokio::net::TcpListener;

use tellerflow::banking::{banking_graph, BankingClient, RuleClassifier};
use tellerflow::config::EngineConfig;
use tellerflow::engine::{Engine, WorkflowService};
use tellerflow::server;
use tellerflow::store::Stores;
use tellerflow::telemetry;

#[tokio::main]
async fn main() -> miette::Result<()> {
    telemetry::init();
    let config = EngineConfig::from_env();
    tracing::info!(backend = ?config.storage_backend, "starting tellerflow");

    let stores = Stores::connect(&config).await?;
    let client = Arc::new(BankingClient::new(&config.downstream)?);
    let classifier = Arc::new(RuleClassifier::new());
    let graph = banking_graph(classifier, client, &stores, &config)?;

    let engine = Engine::new(Arc::new(graph), stores.clone());
    let bind_addr = config.bind_addr.clone();
    let service = Arc::new(WorkflowService::new(engine, stores, config));

    let listener = TcpListener::bind(&bind_addr).await.into_diagnostic()?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, server::router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .into_diagnostic()?;
    Ok(())
}
