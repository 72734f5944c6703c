use crate::{
    config::Config,
    ort_service::OrtClassifier,
    provisioning::ModelProvisioner,
    server::{AppState, HttpServer},
    telemetry::Metrics,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

/// Binds the HTTP server first, then provisions the model in a warmup task so
/// the healthcheck answers while a large artifact downloads. A provisioning
/// failure broadcasts shutdown and the process exits with an error.
pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let metrics = Arc::new(Metrics::new());
    let state: AppState<OrtClassifier> = AppState::new(metrics);

    let server = HttpServer::new(state.clone(), &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();
    let mut provisioning_failure_rx = shutdown_tx.subscribe();

    let provisioner = ModelProvisioner::new(config.model.clone());
    let model_slot = state.model.clone();
    let warmup_shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match provisioner.provision().await {
            Ok(classifier) => {
                tracing::info!("Model ready, accepting predictions");
                let _ = model_slot.set(Arc::new(classifier));
            }
            Err(e) => {
                tracing::error!("Failed to provision model: {:?}", e);
                let _ = warmup_shutdown_tx.send(());
            }
        }
    });

    let server_handle = server.run(server_shutdown_rx).await?;

    let outcome: Result<(), Box<dyn Error>> = tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
            Ok(())
        }
        _ = provisioning_failure_rx.recv() => {
            Err("model provisioning failed".into())
        }
    };

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    outcome
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
