use shared::{PredictionResponse, PredictionResult, TumorClass};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::{EnumCount, IntoEnumIterator};

use crate::config::GradcamConfig;
use crate::gradcam::render::{self, RenderError};
use crate::inference::{Classification, Classifier, InferenceError, SaliencyGenerator};
use crate::storage::static_store::{StaticStore, StorageError, StoredFile};

/// An accepted upload, already checked to carry an image content type.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("Predicted class index {0} is outside the label set")]
    UnknownClass(usize),
    #[error("Expected {expected} class probabilities, got {actual}")]
    ProbabilityCount { expected: usize, actual: usize },
    #[error("Probability for {0} is not a finite number")]
    NonFinite(String),
}

#[derive(Debug, thiserror::Error)]
enum GradcamError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Clone)]
pub struct PredictionService {
    classifier: Arc<dyn Classifier>,
    saliency: Arc<dyn SaliencyGenerator>,
    store: StaticStore,
    gradcam: GradcamConfig,
}

impl PredictionService {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        saliency: Arc<dyn SaliencyGenerator>,
        store: StaticStore,
        gradcam: GradcamConfig,
    ) -> Self {
        Self {
            classifier,
            saliency,
            store,
            gradcam,
        }
    }

    pub fn store(&self) -> &StaticStore {
        &self.store
    }

    /// Stores the upload, classifies it and attaches a Grad-CAM overlay when
    /// one can be produced. Overlay failures only drop the overlay.
    pub fn predict(&self, upload: &UploadedImage) -> Result<PredictionResponse, PredictError> {
        let extension =
            StaticStore::choose_extension(upload.filename.as_deref(), &upload.content_type);
        let stored = self.store.save_upload(&upload.bytes, &extension)?;
        log::info!(
            "Stored upload {} ({} bytes, {})",
            stored.name,
            upload.bytes.len(),
            upload.content_type
        );

        let classification = self.classifier.classify(&stored.path)?;
        let (class, class_probabilities) = label_probabilities(&classification)?;
        let confidence = class_probabilities
            .get(&class.label())
            .copied()
            .unwrap_or(classification.confidence);
        if (confidence - classification.confidence).abs() > 1e-4 {
            log::debug!(
                "Classifier confidence {} differs from its probability {} for {}",
                classification.confidence,
                confidence,
                class
            );
        }
        log::info!("Predicted {} ({:.4}) for {}", class, confidence, stored.name);

        let gradcam_url = match self.render_gradcam(&stored) {
            Ok(overlay) => Some(overlay.url),
            Err(e) => {
                log::warn!("Grad-CAM generation failed for {}: {}", stored.name, e);
                None
            }
        };

        Ok(PredictionResponse::success(
            PredictionResult {
                class_name: class.label(),
                confidence,
            },
            class_probabilities,
            gradcam_url,
        ))
    }

    fn render_gradcam(&self, upload: &StoredFile) -> Result<StoredFile, GradcamError> {
        let saliency = self.saliency.saliency(&upload.path)?;
        log::debug!(
            "Grad-CAM for {} targets class index {}",
            upload.name,
            saliency.target_class
        );
        let slot = self.store.gradcam_slot(upload)?;
        render::save_heatmap(
            &saliency.heatmap,
            self.gradcam.colormap,
            self.gradcam.alpha,
            &slot.path,
        )?;
        Ok(slot)
    }
}

/// Maps the classifier output onto the fixed label set.
pub fn label_probabilities(
    classification: &Classification,
) -> Result<(TumorClass, BTreeMap<String, f32>), PredictError> {
    let class = TumorClass::from_index(classification.class_index)
        .ok_or(PredictError::UnknownClass(classification.class_index))?;
    if classification.probabilities.len() != TumorClass::COUNT {
        return Err(PredictError::ProbabilityCount {
            expected: TumorClass::COUNT,
            actual: classification.probabilities.len(),
        });
    }

    let mut probabilities = BTreeMap::new();
    for (label, p) in TumorClass::iter().zip(&classification.probabilities) {
        if !p.is_finite() {
            return Err(PredictError::NonFinite(label.label()));
        }
        probabilities.insert(label.label(), *p);
    }
    Ok((class, probabilities))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gradcam::colormap::Colormap;
    use crate::inference::SaliencyMap;
    use ndarray::Array2;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct FixedClassifier {
        pub probabilities: Vec<f32>,
        pub calls: AtomicUsize,
    }

    impl FixedClassifier {
        pub fn new(probabilities: Vec<f32>) -> Self {
            Self {
                probabilities,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Classifier for FixedClassifier {
        fn classify(&self, image_path: &Path) -> Result<Classification, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(image_path.exists(), "classifier got a missing file");
            Classification::from_probabilities(self.probabilities.clone())
        }
    }

    pub struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn classify(&self, _: &Path) -> Result<Classification, InferenceError> {
            Err(InferenceError::Model("forward pass exploded".into()))
        }
    }

    pub struct GradientSaliency;

    impl SaliencyGenerator for GradientSaliency {
        fn saliency(&self, _: &Path) -> Result<SaliencyMap, InferenceError> {
            Ok(SaliencyMap {
                heatmap: Array2::from_shape_fn((4, 6), |(r, c)| (r * 6 + c) as f32),
                target_class: 0,
            })
        }
    }

    pub struct FailingSaliency;

    impl SaliencyGenerator for FailingSaliency {
        fn saliency(&self, _: &Path) -> Result<SaliencyMap, InferenceError> {
            Err(InferenceError::Model("no gradient".into()))
        }
    }

    pub fn service(
        root: &Path,
        classifier: Arc<dyn Classifier>,
        saliency: Arc<dyn SaliencyGenerator>,
    ) -> PredictionService {
        let store = StaticStore::new(root);
        store.ensure_layout().unwrap();
        let gradcam = GradcamConfig {
            colormap: Colormap::Jet,
            alpha: 0.5,
        };
        PredictionService::new(classifier, saliency, store, gradcam)
    }

    fn upload() -> UploadedImage {
        UploadedImage {
            bytes: b"fake image bytes".to_vec(),
            content_type: "image/png".into(),
            filename: Some("scan.png".into()),
        }
    }

    #[test]
    fn successful_prediction_is_self_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(
            dir.path(),
            Arc::new(FixedClassifier::new(vec![0.05, 0.1, 0.8, 0.05])),
            Arc::new(GradientSaliency),
        );
        let response = svc.predict(&upload()).unwrap();

        assert!(response.success);
        assert!(response.error.is_none());
        let prediction = response.prediction.unwrap();
        assert_eq!(prediction.class_name, "No Tumor");
        assert_eq!(
            response.class_probabilities[&prediction.class_name],
            prediction.confidence
        );
        let labels: Vec<_> = response.class_probabilities.keys().cloned().collect();
        assert_eq!(labels, ["Glioma", "Meningioma", "No Tumor", "Pituitary"]);

        let url = response.gradcam_url.unwrap();
        assert!(url.starts_with("/static/results/gradcam_"));
        let name = url.rsplit('/').next().unwrap();
        let overlay = image::open(svc.store().results_dir().join(name)).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (6, 4));
    }

    #[test]
    fn saliency_failure_keeps_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(
            dir.path(),
            Arc::new(FixedClassifier::new(vec![0.7, 0.1, 0.1, 0.1])),
            Arc::new(FailingSaliency),
        );
        let response = svc.predict(&upload()).unwrap();
        assert!(response.success);
        assert!(response.gradcam_url.is_none());
        assert_eq!(response.prediction.unwrap().class_name, "Glioma");
        assert_eq!(std::fs::read_dir(svc.store().results_dir()).unwrap().count(), 0);
    }

    #[test]
    fn classifier_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(FailingClassifier), Arc::new(GradientSaliency));
        assert!(matches!(
            svc.predict(&upload()),
            Err(PredictError::Inference(_))
        ));
    }

    #[test]
    fn wrong_probability_count_is_rejected() {
        let c = Classification::from_probabilities(vec![0.5, 0.5]).unwrap();
        assert!(matches!(
            label_probabilities(&c),
            Err(PredictError::ProbabilityCount { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let c = Classification {
            class_index: 7,
            confidence: 0.9,
            probabilities: vec![0.25; 4],
        };
        assert!(matches!(
            label_probabilities(&c),
            Err(PredictError::UnknownClass(7))
        ));
    }

    #[test]
    fn non_finite_probability_is_rejected() {
        let c = Classification {
            class_index: 0,
            confidence: 0.9,
            probabilities: vec![0.9, f32::INFINITY, 0.05, 0.05],
        };
        assert!(matches!(
            label_probabilities(&c),
            Err(PredictError::NonFinite(label)) if label == "Meningioma"
        ));
    }
}
