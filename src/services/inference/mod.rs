// Inference Backend
// Model traits used by the detectors and the hub-backed loader behind the `ml-models` feature

use std::path::PathBuf;
use std::str::FromStr;

use super::error::DetectorError;
use super::model_cache::{LoadedModel, ModelKey, ModelLoader};

#[cfg(feature = "ml-models")]
mod gpt2;
#[cfg(feature = "ml-models")]
mod hub;
#[cfg(feature = "ml-models")]
mod roberta;

/// Whether this build carries a real model backend.
pub const BACKEND_COMPILED: bool = cfg!(feature = "ml-models");

/// Sequence classifier scoring a text as machine-generated.
pub trait TextClassifier: Send + Sync {
    /// Probability in [0, 1] of the AI-generated class, input truncated to `max_tokens`.
    fn ai_probability(&self, text: &str, max_tokens: usize) -> Result<f64, DetectorError>;
}

/// Autoregressive language model scored on its own next-token predictions.
pub trait CausalLanguageModel: Send + Sync {
    /// Mean per-token cross-entropy of the text under the model.
    fn mean_token_loss(&self, text: &str, max_tokens: usize) -> Result<f64, DetectorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    Cpu,
    Cuda,
    Metal,
    #[default]
    Auto,
}

impl FromStr for DevicePreference {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            "auto" | "" => Ok(DevicePreference::Auto),
            other => Err(DetectorError::Config(format!("unknown device '{}'", other))),
        }
    }
}

/// Downloads models from the Hugging Face hub into `cache_dir` and places them on a device.
#[derive(Debug, Clone)]
pub struct HubModelLoader {
    cache_dir: PathBuf,
    device: DevicePreference,
}

impl HubModelLoader {
    pub fn new(cache_dir: impl Into<PathBuf>, device: DevicePreference) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            device,
        }
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    pub fn device(&self) -> DevicePreference {
        self.device
    }
}

impl ModelLoader for HubModelLoader {
    #[cfg(feature = "ml-models")]
    fn load(&self, key: &ModelKey) -> Result<LoadedModel, DetectorError> {
        hub::load(&self.cache_dir, self.device, key)
    }

    #[cfg(not(feature = "ml-models"))]
    fn load(&self, key: &ModelKey) -> Result<LoadedModel, DetectorError> {
        tracing::debug!(
            "[MODEL_CACHE] {} requested from {:?} without a model backend",
            key,
            self.cache_dir
        );
        Err(DetectorError::BackendUnavailable(
            "built without the ml-models feature".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parse() {
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("mps".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert_eq!("".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[cfg(not(feature = "ml-models"))]
    #[test]
    fn test_loader_without_backend() {
        let loader = HubModelLoader::new("/tmp/hf", DevicePreference::Cpu);
        assert_eq!(loader.device(), DevicePreference::Cpu);
        let err = loader.load(&ModelKey::causal_lm("gpt2")).unwrap_err();
        assert!(matches!(err, DetectorError::BackendUnavailable(_)));
    }
}
