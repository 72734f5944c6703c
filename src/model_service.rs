use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Top-1 classification result as returned to the client. Confidence is a
/// percentage in [0, 100], rounded to two decimal places.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub prediction: String,
    pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("failed to decode image: {0}")]
    ImageDecode(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    async fn classify(&self, image_data: Bytes) -> Result<Prediction, ClassifyError>;
}
