use ndarray::Array2;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tch::{CModule, Device, Kind, Tensor};

use super::preprocess::Preprocessor;
use super::{Classification, Classifier, InferenceError, SaliencyGenerator, SaliencyMap};
use crate::config::ModelConfig;

/// TorchScript classifier that also exposes its feature extractor and head,
/// so the same module serves both classification and Grad-CAM.
#[derive(Clone)]
pub struct TorchModel {
    model: Arc<Mutex<CModule>>,
    device: Device,
    preprocessor: Preprocessor,
    feature_method: String,
    head_method: String,
}

impl TorchModel {
    pub fn load(config: &ModelConfig) -> Result<Self, InferenceError> {
        let device = if config.use_cuda {
            Device::cuda_if_available()
        } else {
            Device::Cpu
        };
        log::info!(
            "Loading TorchScript model from {} on {:?}",
            config.path.display(),
            device
        );
        let mut module = CModule::load_on_device(&config.path, device)?;
        module.set_eval();
        Ok(Self {
            model: Arc::new(Mutex::new(module)),
            device,
            preprocessor: Preprocessor::new(config.input_size, &config.mean, &config.std)?,
            feature_method: config.feature_method.clone(),
            head_method: config.head_method.clone(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, CModule>, InferenceError> {
        self.model.lock().map_err(|_| InferenceError::LockPoisoned)
    }

    fn input_tensor(&self, image_path: &Path) -> Result<(Tensor, (u32, u32)), InferenceError> {
        let (batch, original) = self.preprocessor.load(image_path)?;
        let shape: Vec<i64> = batch.shape().iter().map(|d| *d as i64).collect();
        let data = batch
            .as_slice()
            .ok_or_else(|| InferenceError::Preprocessing("non-contiguous input".into()))?;
        let tensor = Tensor::from_slice(data).view(shape.as_slice()).to_device(self.device);
        Ok((tensor, original))
    }
}

impl Classifier for TorchModel {
    fn classify(&self, image_path: &Path) -> Result<Classification, InferenceError> {
        let (input, _) = self.input_tensor(image_path)?;
        let _guard = tch::no_grad_guard();
        let logits = self.lock()?.forward_ts(&[input])?;
        let probabilities = logits.f_softmax(-1, Kind::Float)?.f_view([-1])?;
        let probabilities = Vec::<f32>::try_from(&probabilities)?;
        Classification::from_probabilities(probabilities)
    }
}

impl SaliencyGenerator for TorchModel {
    fn saliency(&self, image_path: &Path) -> Result<SaliencyMap, InferenceError> {
        let (input, original) = self.input_tensor(image_path)?;
        let module = self.lock()?;
        let features = module.method_ts(&self.feature_method, &[input])?;
        grad_cam(
            features,
            |features| Ok(module.method_ts(&self.head_method, &[features])?),
            original,
        )
    }
}

/// Grad-CAM over `features` for the top class of `head(features)`, upsampled
/// to `(width, height)` and min-max normalised. Only `features` receives a
/// gradient; the head's parameters are left untouched.
fn grad_cam<F>(
    features: Tensor,
    head: F,
    (width, height): (u32, u32),
) -> Result<SaliencyMap, InferenceError>
where
    F: FnOnce(&Tensor) -> Result<Tensor, InferenceError>,
{
    let features = features.detach().set_requires_grad(true);
    let logits = head(&features)?;

    let target_class = logits.f_argmax(-1, false)?.f_int64_value(&[0])?;
    let score = logits.f_get(0)?.f_get(target_class)?;
    let grads = Tensor::f_run_backward(&[&score], &[&features], false, false)?
        .pop()
        .filter(Tensor::defined)
        .ok_or_else(|| InferenceError::Model("feature maps received no gradient".into()))?;

    let _guard = tch::no_grad_guard();
    let weights = grads.f_mean_dim([2i64, 3].as_slice(), true, Kind::Float)?;
    let cam = (&weights * &features)
        .f_sum_dim_intlist([1i64].as_slice(), true, Kind::Float)?
        .f_relu()?
        .f_upsample_bilinear2d(
            [height as i64, width as i64],
            false,
            None::<f64>,
            None::<f64>,
        )?
        .f_squeeze()?
        .f_to_kind(Kind::Float)?
        .f_to_device(Device::Cpu)?;
    let (min, max) = (cam.f_min()?, cam.f_max()?);
    let cam = (&cam - &min) / ((&max - &min) + 1e-8);

    let values = Vec::<f32>::try_from(&cam.f_flatten(0, -1)?)?;
    let heatmap = Array2::from_shape_vec((height as usize, width as usize), values)
        .map_err(|e| InferenceError::Model(e.to_string()))?;
    Ok(SaliencyMap {
        heatmap,
        target_class: target_class as usize,
    })
}
