use crate::{
    config::ServerConfig, model_service::ModelService, routes::api_routes, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{
    net::TcpListener,
    sync::{broadcast::Receiver, OnceCell},
    task::JoinHandle,
};

/// Shared request state. The model slot starts empty and is filled exactly
/// once by the warmup task; requests that arrive before that see the empty
/// slot and answer with a service-unavailable error.
pub struct AppState<M: ModelService> {
    pub model: Arc<OnceCell<Arc<M>>>,
    pub metrics: Arc<Metrics>,
}

impl<M: ModelService> AppState<M> {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            model: Arc::new(OnceCell::new()),
            metrics,
        }
    }
}

// Manual impl: deriving would put a `Clone` bound on `M`.
impl<M: ModelService> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        state: AppState<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = Router::new()
            .merge(api_routes::<M>())
            .layer(DefaultBodyLimit::max(config.body_limit))
            .with_state(state)
            .layer(metrics_layer);

        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", &self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            let server = axum::serve(listener, router);
            server
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}
