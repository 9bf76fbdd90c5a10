// Test doubles shared by the detection tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Detector, DetectorOutcome};
use crate::models::DetectionResult;
use crate::services::error::DetectorError;
use crate::services::inference::{CausalLanguageModel, TextClassifier};
use crate::services::model_cache::{LoadedModel, ModelCache, ModelKey, ModelKind, ModelLoader};

/// Returns the scripted probabilities in order, cycling.
pub struct ScriptedClassifier {
    probs: Vec<f64>,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(probs: Vec<f64>) -> Self {
        Self {
            probs,
            calls: AtomicUsize::new(0),
        }
    }
}

impl TextClassifier for ScriptedClassifier {
    fn ai_probability(&self, _text: &str, _max_tokens: usize) -> Result<f64, DetectorError> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.probs[i % self.probs.len()])
    }
}

pub struct FixedLossLm(pub f64);

impl CausalLanguageModel for FixedLossLm {
    fn mean_token_loss(&self, _text: &str, _max_tokens: usize) -> Result<f64, DetectorError> {
        Ok(self.0)
    }
}

pub struct BrokenLm;

impl CausalLanguageModel for BrokenLm {
    fn mean_token_loss(&self, _text: &str, _max_tokens: usize) -> Result<f64, DetectorError> {
        Err(DetectorError::Inference("shape mismatch".to_string()))
    }
}

/// Serves models from a closure keyed on the requested model.
pub struct FnLoader<F>(pub F);

impl<F> ModelLoader for FnLoader<F>
where
    F: Fn(&ModelKey) -> Result<ModelKind, DetectorError> + Send + Sync,
{
    fn load(&self, key: &ModelKey) -> Result<LoadedModel, DetectorError> {
        Ok(LoadedModel {
            device: "cpu".to_string(),
            model: (self.0)(key)?,
        })
    }
}

pub fn cache_with<F>(f: F) -> Arc<ModelCache>
where
    F: Fn(&ModelKey) -> Result<ModelKind, DetectorError> + Send + Sync + 'static,
{
    Arc::new(ModelCache::new(Arc::new(FnLoader(f))))
}

pub fn offline_cache() -> Arc<ModelCache> {
    cache_with(|key| {
        Err(DetectorError::ModelLoad {
            key: key.cache_key(),
            message: "offline".to_string(),
        })
    })
}

/// Detector with a canned outcome and optional latency.
pub struct ScriptedDetector {
    pub outcome: DetectorOutcome,
    pub delay: Duration,
    pub honors_cancel: bool,
}

impl ScriptedDetector {
    pub fn success(score: f64, model: &str) -> Arc<dyn Detector> {
        Arc::new(Self {
            outcome: DetectorOutcome::Success(DetectionResult::new(
                score,
                0.9,
                vec![format!("{} indicator", model)],
                model,
                "scripted",
            )),
            delay: Duration::ZERO,
            honors_cancel: true,
        })
    }

    pub fn failure(reason: &str) -> Arc<dyn Detector> {
        Arc::new(Self {
            outcome: DetectorOutcome::unavailable(reason),
            delay: Duration::ZERO,
            honors_cancel: true,
        })
    }

    pub fn slow(score: f64, model: &str, delay: Duration) -> Arc<dyn Detector> {
        Arc::new(Self {
            outcome: DetectorOutcome::Success(DetectionResult::new(score, 0.9, vec![], model, "scripted")),
            delay,
            honors_cancel: true,
        })
    }

    /// Blocks for `delay` no matter what, like a model call stuck inside the backend.
    pub fn stalled(delay: Duration) -> Arc<dyn Detector> {
        Arc::new(Self {
            outcome: DetectorOutcome::unavailable("stalled"),
            delay,
            honors_cancel: false,
        })
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, _text: &str, cancel: &CancellationToken) -> DetectorOutcome {
        // Sleep in slices so a cancelled task returns promptly
        let mut remaining = self.delay;
        while !remaining.is_zero() {
            if self.honors_cancel && cancel.is_cancelled() {
                return DetectorOutcome::unavailable("cancelled");
            }
            let step = remaining.min(Duration::from_millis(10));
            std::thread::sleep(step);
            remaining -= step;
        }
        self.outcome.clone()
    }
}

pub fn long_text(words: usize) -> String {
    (0..words).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ")
}
