// Model Cache
// Process-wide registry of loaded model handles, populated lazily and never evicted

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::error::DetectorError;
use super::inference::{CausalLanguageModel, TextClassifier};

const CLASSIFIER_PREFIX: &str = "classifier:";

/// Which head a model is loaded with. Decides the cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    Classifier,
    CausalLm,
}

/// A model id plus the role it is loaded for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub model_id: String,
    pub role: ModelRole,
}

impl ModelKey {
    pub fn classifier(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            role: ModelRole::Classifier,
        }
    }

    pub fn causal_lm(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            role: ModelRole::CausalLm,
        }
    }

    /// Cache key; classifier loads live under their own prefix.
    pub fn cache_key(&self) -> String {
        match self.role {
            ModelRole::Classifier => format!("{}{}", CLASSIFIER_PREFIX, self.model_id),
            ModelRole::CausalLm => self.model_id.clone(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

#[derive(Clone)]
pub enum ModelKind {
    Classifier(Arc<dyn TextClassifier>),
    CausalLm(Arc<dyn CausalLanguageModel>),
}

impl fmt::Debug for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Classifier(_) => f.write_str("Classifier"),
            ModelKind::CausalLm(_) => f.write_str("CausalLm"),
        }
    }
}

/// What a loader hands back: the runnable model and where it was placed.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub device: String,
    pub model: ModelKind,
}

/// Immutable, device-resident model. One per cache key for the process lifetime.
#[derive(Debug)]
pub struct ModelHandle {
    key: String,
    device: String,
    model: ModelKind,
}

impl ModelHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn classifier(&self) -> Result<Arc<dyn TextClassifier>, DetectorError> {
        match &self.model {
            ModelKind::Classifier(model) => Ok(Arc::clone(model)),
            ModelKind::CausalLm(_) => Err(DetectorError::WrongModelKind {
                key: self.key.clone(),
                expected: "sequence classifier",
            }),
        }
    }

    pub fn causal_lm(&self) -> Result<Arc<dyn CausalLanguageModel>, DetectorError> {
        match &self.model {
            ModelKind::CausalLm(model) => Ok(Arc::clone(model)),
            ModelKind::Classifier(_) => Err(DetectorError::WrongModelKind {
                key: self.key.clone(),
                expected: "causal language model",
            }),
        }
    }
}

/// Fetches and places a model. Blocking; called from worker threads.
pub trait ModelLoader: Send + Sync {
    fn load(&self, key: &ModelKey) -> Result<LoadedModel, DetectorError>;
}

/// Aggregate outcome of an eager warm-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreloadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub cached: usize,
}

impl PreloadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

type Slot = Arc<Mutex<Option<Arc<ModelHandle>>>>;

/// Load-once cache keyed by [`ModelKey::cache_key`].
///
/// Each key owns a slot with its own lock, so two first-time callers for the
/// same key serialize on that slot and the second one sees the first one's
/// handle. Loads of different keys proceed in parallel. A failed load leaves
/// the slot empty and the next caller retries.
pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Causal-LM handle for `model_id`.
    pub fn get_or_load(&self, model_id: &str) -> Result<Arc<ModelHandle>, DetectorError> {
        self.get_or_load_key(&ModelKey::causal_lm(model_id))
    }

    /// Classifier handle for `model_id`, cached under the classifier namespace.
    pub fn get_or_load_classifier(&self, model_id: &str) -> Result<Arc<ModelHandle>, DetectorError> {
        self.get_or_load_key(&ModelKey::classifier(model_id))
    }

    pub fn get_or_load_key(&self, key: &ModelKey) -> Result<Arc<ModelHandle>, DetectorError> {
        let cache_key = key.cache_key();
        let slot = self.slot(&cache_key);
        let mut guard = lock(&slot);

        if let Some(handle) = guard.as_ref() {
            return Ok(Arc::clone(handle));
        }

        info!("[MODEL_CACHE] Loading {}", cache_key);
        let start = Instant::now();
        let loaded = self.loader.load(key).map_err(|e| {
            warn!("[MODEL_CACHE] Load failed for {}: {}", cache_key, e);
            match e {
                DetectorError::ModelLoad { .. } => e,
                other => DetectorError::ModelLoad {
                    key: cache_key.clone(),
                    message: other.to_string(),
                },
            }
        })?;

        let handle = Arc::new(ModelHandle {
            key: cache_key.clone(),
            device: loaded.device,
            model: loaded.model,
        });
        info!(
            "[MODEL_CACHE] Loaded {} on {} in {}ms",
            cache_key,
            handle.device,
            start.elapsed().as_millis()
        );
        *guard = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Eagerly load every key; failures are reported, never raised.
    pub fn preload(&self, keys: &[ModelKey]) -> PreloadReport {
        let mut report = PreloadReport::default();
        for key in keys {
            match self.get_or_load_key(key) {
                Ok(handle) => report.loaded.push(handle.key().to_string()),
                Err(e) => report.failed.push((key.cache_key(), e.to_string())),
            }
        }
        report.cached = self.len();
        info!(
            "[MODEL_CACHE] Preload finished: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    /// Number of keys holding a loaded handle.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        let slot = lock(&self.slots).get(&key.cache_key()).cloned();
        slot.map(|s| lock(&s).is_some()).unwrap_or(false)
    }

    fn slot(&self, cache_key: &str) -> Slot {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(cache_key.to_string()).or_default())
    }
}

// A panic inside a loader must not wedge the cache for every later caller.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) struct FixedClassifier(pub f64);

    impl TextClassifier for FixedClassifier {
        fn ai_probability(&self, _text: &str, _max_tokens: usize) -> Result<f64, DetectorError> {
            Ok(self.0)
        }
    }

    pub(crate) struct FixedLm(pub f64);

    impl CausalLanguageModel for FixedLm {
        fn mean_token_loss(&self, _text: &str, _max_tokens: usize) -> Result<f64, DetectorError> {
            Ok(self.0)
        }
    }

    /// Counts loads; fails the first `fail_first` attempts.
    pub(crate) struct CountingLoader {
        pub loads: AtomicUsize,
        pub fail_first: usize,
        pub delay: Duration,
    }

    impl CountingLoader {
        pub(crate) fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_first: 0,
                delay: Duration::from_millis(0),
            }
        }

        pub(crate) fn count(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, key: &ModelKey) -> Result<LoadedModel, DetectorError> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if attempt < self.fail_first {
                return Err(DetectorError::BackendUnavailable("offline".to_string()));
            }
            let model = match key.role {
                ModelRole::Classifier => ModelKind::Classifier(Arc::new(FixedClassifier(0.5))),
                ModelRole::CausalLm => ModelKind::CausalLm(Arc::new(FixedLm(3.0))),
            };
            Ok(LoadedModel {
                device: "cpu".to_string(),
                model,
            })
        }
    }

    #[test]
    fn test_cache_key_namespaces() {
        assert_eq!(ModelKey::classifier("roberta").cache_key(), "classifier:roberta");
        assert_eq!(ModelKey::causal_lm("gpt2").cache_key(), "gpt2");
    }

    #[test]
    fn test_hit_returns_same_handle_without_reload() {
        let loader = Arc::new(CountingLoader::new());
        let cache = ModelCache::new(loader.clone());

        let first = cache.get_or_load("gpt2").unwrap();
        let second = cache.get_or_load("gpt2").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.count(), 1);
        assert_eq!(first.device(), "cpu");
    }

    #[test]
    fn test_same_model_id_different_roles_are_distinct() {
        let loader = Arc::new(CountingLoader::new());
        let cache = ModelCache::new(loader.clone());

        let lm = cache.get_or_load("roberta-base").unwrap();
        let clf = cache.get_or_load_classifier("roberta-base").unwrap();

        assert_eq!(loader.count(), 2);
        assert_eq!(cache.len(), 2);
        assert!(lm.causal_lm().is_ok());
        assert!(clf.classifier().is_ok());
        assert!(matches!(
            lm.classifier(),
            Err(DetectorError::WrongModelKind { .. })
        ));
    }

    #[test]
    fn test_concurrent_first_access_loads_once() {
        let loader = Arc::new(CountingLoader {
            delay: Duration::from_millis(50),
            ..CountingLoader::new()
        });
        let cache = ModelCache::new(loader.clone());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    cache.get_or_load_classifier("roberta").unwrap();
                });
            }
        });

        assert_eq!(loader.count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let loader = Arc::new(CountingLoader {
            fail_first: 1,
            ..CountingLoader::new()
        });
        let cache = ModelCache::new(loader.clone());

        let err = cache.get_or_load("gpt2").unwrap_err();
        assert!(matches!(err, DetectorError::ModelLoad { ref key, .. } if key == "gpt2"));
        assert!(!cache.contains(&ModelKey::causal_lm("gpt2")));

        assert!(cache.get_or_load("gpt2").is_ok());
        assert_eq!(loader.count(), 2);
        assert!(cache.contains(&ModelKey::causal_lm("gpt2")));
    }

    #[test]
    fn test_preload_reports_without_raising() {
        let loader = Arc::new(CountingLoader {
            fail_first: 1,
            ..CountingLoader::new()
        });
        let cache = ModelCache::new(loader);

        let report = cache.preload(&[
            ModelKey::classifier("roberta"),
            ModelKey::causal_lm("distilgpt2"),
            ModelKey::causal_lm("gpt2"),
        ]);

        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "classifier:roberta");
        assert_eq!(report.loaded, vec!["distilgpt2".to_string(), "gpt2".to_string()]);
        assert_eq!(report.cached, 2);

        // Idempotent once everything is in
        let again = cache.preload(&[ModelKey::causal_lm("gpt2")]);
        assert!(again.is_success());
        assert_eq!(again.cached, 2);
    }
}
