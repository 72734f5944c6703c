use crate::{
    model_service::{ClassifyError, ModelService, Prediction},
    server::AppState,
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("malformed multipart payload: {0}")]
    Multipart(String),
    #[error("missing `file` field in multipart payload")]
    MissingFile,
    #[error("model is not loaded yet, try again later")]
    ModelUnavailable,
    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

impl PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Multipart(_) => StatusCode::BAD_REQUEST,
            PredictError::MissingFile => StatusCode::BAD_REQUEST,
            PredictError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            PredictError::Classify(ClassifyError::ImageDecode(_)) => StatusCode::BAD_REQUEST,
            PredictError::Classify(ClassifyError::Inference(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict<M: ModelService>(
    State(state): State<AppState<M>>,
    mut multipart: Multipart,
) -> Result<Json<Prediction>, PredictError> {
    let mut image_data: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PredictError::Multipart(e.to_string()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PredictError::Multipart(e.to_string()))?;
            image_data = Some(bytes);
            break;
        }
    }

    let image_data = image_data.ok_or(PredictError::MissingFile)?;
    run_prediction(&state, image_data).await
}

async fn run_prediction<M: ModelService>(
    state: &AppState<M>,
    image_data: Bytes,
) -> Result<Json<Prediction>, PredictError> {
    state.metrics.record_request("/predict");
    let started = Instant::now();

    let model = state
        .model
        .get()
        .cloned()
        .ok_or(PredictError::ModelUnavailable)?;

    let prediction = model.classify(image_data).await?;

    state
        .metrics
        .record_inference_duration(started.elapsed().as_millis() as u64, "/predict");
    tracing::debug!(
        "Prediction: {} ({:.2}%)",
        prediction.prediction,
        prediction.confidence
    );

    Ok(Json(prediction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Metrics;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct MockModelService {
        result: fn(Bytes) -> Result<Prediction, ClassifyError>,
    }

    #[async_trait]
    impl ModelService for MockModelService {
        async fn classify(&self, image_data: Bytes) -> Result<Prediction, ClassifyError> {
            (self.result)(image_data)
        }
    }

    fn state_with(
        result: fn(Bytes) -> Result<Prediction, ClassifyError>,
    ) -> AppState<MockModelService> {
        let state = AppState::new(Arc::new(Metrics::new()));
        state
            .model
            .set(Arc::new(MockModelService { result }))
            .ok()
            .unwrap();
        state
    }

    #[tokio::test]
    async fn run_prediction_returns_the_model_output() {
        let state = state_with(|_| {
            Ok(Prediction {
                prediction: "ai_generated".to_string(),
                confidence: 99.12,
            })
        });

        let response = run_prediction(&state, Bytes::from_static(b"fake image"))
            .await
            .unwrap();

        assert_eq!(response.0.prediction, "ai_generated");
        assert_eq!(response.0.confidence, 99.12);
    }

    #[tokio::test]
    async fn run_prediction_reports_unavailable_before_warmup() {
        let state: AppState<MockModelService> = AppState::new(Arc::new(Metrics::new()));

        let err = run_prediction(&state, Bytes::from_static(b"fake image"))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictError::ModelUnavailable));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn decode_failures_map_to_bad_request() {
        let state =
            state_with(|_| Err(ClassifyError::ImageDecode("not an image".to_string())));

        let err = run_prediction(&state, Bytes::from_static(b"garbage"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn inference_failures_map_to_internal_error() {
        let state = state_with(|_| Err(ClassifyError::Inference("session exploded".to_string())));

        let err = run_prediction(&state, Bytes::from_static(b"garbage"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn missing_file_is_a_client_error() {
        assert_eq!(PredictError::MissingFile.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            PredictError::Multipart("boundary".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
