use crate::{
    artifact::{ArtifactError, ClassifierConfig, PreprocessorConfig, MODEL_FILE},
    model_service::{ClassifyError, ModelService, Prediction},
};
use async_trait::async_trait;
use bytes::Bytes;
use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::path::Path;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierLoadError {
    #[error("onnx runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Decode an uploaded image and turn it into the `[1, 3, H, W]` tensor the
/// model expects: RGB, resized to the preprocessor's input size, rescaled to
/// [0, 1] and normalized per channel.
fn transform_image(
    image_data: &[u8],
    preprocessor: &PreprocessorConfig,
) -> Result<Array<f32, Ix4>, String> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| format!("Error reading image: {}", e))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| format!("Error decoding image: {}", e))?;

    let width = preprocessor.size.width();
    let height = preprocessor.size.height();
    let img = original_img.resize_exact(width, height, FilterType::CatmullRom);

    let mean = preprocessor.image_mean;
    let std = preprocessor.image_std;

    let mut input = Array::zeros((1, 3, height as usize, width as usize));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = ((r as f32) / 255. - mean[0]) / std[0];
        input[[0, 1, y, x]] = ((g as f32) / 255. - mean[1]) / std[1];
        input[[0, 2, y, x]] = ((b as f32) / 255. - mean[2]) / std[2];
    }

    Ok(input)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn round_percent(probability: f32) -> f32 {
    (probability * 10_000.).round() / 100.
}

#[derive(Clone)]
pub struct OrtClassifier {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    preprocessor: PreprocessorConfig,
    labels: ClassifierConfig,
}

impl OrtClassifier {
    pub fn new(artifact_dir: &Path, num_instances: usize) -> Result<Self, ClassifierLoadError> {
        let labels = ClassifierConfig::load(artifact_dir)?;
        let preprocessor = PreprocessorConfig::load(artifact_dir)?;

        ort::init().commit()?;
        let model_path = artifact_dir.join(MODEL_FILE);
        let sessions = (0..num_instances.max(1))
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions for {} labels",
            sessions.len(),
            labels.id2label.len()
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            preprocessor,
            labels,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ClassifyError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ClassifyError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ClassifyError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| ClassifyError::Inference(format!("inference failed: {}", e)))?;

        let (_, logits) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifyError::Inference(format!("failed to extract logits: {}", e)))?;

        Ok(logits.to_vec())
    }
}

#[async_trait]
impl ModelService for OrtClassifier {
    async fn classify(&self, image_data: Bytes) -> Result<Prediction, ClassifyError> {
        let input =
            transform_image(&image_data, &self.preprocessor).map_err(ClassifyError::ImageDecode)?;

        let logits = self.run_inference(&input)?;
        let probabilities = softmax(&logits);

        let (class_id, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
            .ok_or_else(|| ClassifyError::Inference("model produced no logits".to_string()))?;

        let label = match self.labels.label_for(class_id) {
            Some(label) => label.to_string(),
            None => format!("Unknown class {}", class_id),
        };

        tracing::debug!(
            "Top prediction: class_id={}, label={}, probability={:.4}",
            class_id,
            label,
            probability
        );

        Ok(Prediction {
            prediction: label,
            confidence: round_percent(probability),
        })
    }
}
