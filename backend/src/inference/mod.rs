#[cfg_attr(not(feature = "torch"), allow(dead_code))]
pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch_model;

use ndarray::Array2;
use std::path::Path;
use std::sync::Arc;

use crate::config::ModelConfig;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),
    #[error("Model error: {0}")]
    Model(String),
    #[cfg_attr(not(feature = "torch"), allow(dead_code))]
    #[error("Model lock poisoned")]
    LockPoisoned,
    #[cfg_attr(feature = "torch", allow(dead_code))]
    #[error("No inference backend available: {0}")]
    Unavailable(String),
}

impl From<image::ImageError> for InferenceError {
    fn from(err: image::ImageError) -> Self {
        InferenceError::Preprocessing(err.to_string())
    }
}

#[cfg(feature = "torch")]
impl From<tch::TchError> for InferenceError {
    fn from(err: tch::TchError) -> Self {
        InferenceError::Model(err.to_string())
    }
}

/// Output of a single forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class_index: usize,
    pub confidence: f32,
    pub probabilities: Vec<f32>,
}

impl Classification {
    /// Builds a classification from a probability vector, picking the argmax.
    pub fn from_probabilities(probabilities: Vec<f32>) -> Result<Self, InferenceError> {
        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| InferenceError::Model("model produced no finite outputs".into()))?;
        Ok(Self {
            class_index,
            confidence,
            probabilities,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SaliencyMap {
    /// Row-major heat map aligned with the source image.
    pub heatmap: Array2<f32>,
    pub target_class: usize,
}

pub trait Classifier: Send + Sync {
    fn classify(&self, image_path: &Path) -> Result<Classification, InferenceError>;
}

pub trait SaliencyGenerator: Send + Sync {
    fn saliency(&self, image_path: &Path) -> Result<SaliencyMap, InferenceError>;
}

/// Loads the configured model once and hands it out as both collaborators.
#[cfg(feature = "torch")]
pub fn load_backend(
    config: &ModelConfig,
) -> Result<(Arc<dyn Classifier>, Arc<dyn SaliencyGenerator>), InferenceError> {
    let model = Arc::new(torch_model::TorchModel::load(config)?);
    let classifier: Arc<dyn Classifier> = model.clone();
    let saliency: Arc<dyn SaliencyGenerator> = model;
    Ok((classifier, saliency))
}

#[cfg(not(feature = "torch"))]
pub fn load_backend(
    config: &ModelConfig,
) -> Result<(Arc<dyn Classifier>, Arc<dyn SaliencyGenerator>), InferenceError> {
    Err(InferenceError::Unavailable(format!(
        "cannot load {}: built without the `torch` feature (rebuild with `cargo run --features torch`)",
        config.path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_highest_probability() {
        let c = Classification::from_probabilities(vec![0.1, 0.6, 0.2, 0.1]).unwrap();
        assert_eq!(c.class_index, 1);
        assert_eq!(c.confidence, 0.6);
    }

    #[cfg(not(feature = "torch"))]
    #[test]
    fn backend_without_torch_explains_how_to_enable_it() {
        let err = match load_backend(&ModelConfig::default()) {
            Err(e) => e,
            Ok(_) => panic!("backend must be unavailable without the torch feature"),
        };
        assert!(matches!(err, InferenceError::Unavailable(_)));
        assert!(err.to_string().contains("--features torch"));
    }

    #[test]
    fn non_finite_outputs_are_skipped() {
        let c = Classification::from_probabilities(vec![f32::NAN, 0.3, 0.7]).unwrap();
        assert_eq!(c.class_index, 2);
        assert!(Classification::from_probabilities(vec![]).is_err());
        assert!(Classification::from_probabilities(vec![f32::NAN]).is_err());
    }
}
