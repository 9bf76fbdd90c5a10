// Text Analyzer
// Orchestrating entry point: length gate, heuristic signal, optional ensemble, payload merge

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use super::classifier::ClassifierDetector;
use super::ensemble::{Ensemble, EnsembleOutcome, EnsembleSettings};
use super::heuristic::HeuristicFallback;
use super::perplexity::PerplexityComparator;
use crate::models::{AnalysisPath, DebugInfo, DetectionPayload};
use crate::services::config_store::DetectionSettings;
use crate::services::inference::{HubModelLoader, BACKEND_COMPILED};
use crate::services::model_cache::{ModelCache, ModelKey};
use crate::services::text_processor::{char_len, normalize_text};

/// Inputs shorter than this (in characters, after normalization) are not analyzed.
pub const MIN_TEXT_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub allow_advanced: bool,
    pub cache_dir: String,
    pub cache_dir_writable: bool,
}

impl From<&DetectionSettings> for AnalyzerSettings {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            allow_advanced: settings.allow_advanced,
            cache_dir: settings.cache_dir.display().to_string(),
            cache_dir_writable: settings.cache_dir_writable,
        }
    }
}

pub struct TextAnalyzer {
    ensemble: Ensemble,
    heuristic: HeuristicFallback,
    settings: AnalyzerSettings,
}

impl TextAnalyzer {
    pub fn new(ensemble: Ensemble, settings: AnalyzerSettings) -> Self {
        Self {
            ensemble,
            heuristic: HeuristicFallback::new(),
            settings,
        }
    }

    /// Wire the hub loader, the shared cache and both model detectors.
    pub fn from_settings(settings: &DetectionSettings) -> (Self, Arc<ModelCache>) {
        let cache = build_model_cache(settings);
        let classifier = Arc::new(ClassifierDetector::new(Arc::clone(&cache), settings.classifier.clone()));
        let perplexity = Arc::new(PerplexityComparator::new(Arc::clone(&cache), settings.perplexity.clone()));
        let ensemble = Ensemble::new(
            classifier,
            perplexity,
            EnsembleSettings {
                task_timeout: settings.task_timeout,
                ..EnsembleSettings::default()
            },
        );
        (Self::new(ensemble, AnalyzerSettings::from(settings)), cache)
    }

    /// Analyze raw text. Always returns a well-formed payload.
    pub async fn analyze(&self, text: &str) -> DetectionPayload {
        let start = Instant::now();
        let mut diagnostics = DebugInfo {
            request_id: Uuid::new_v4().to_string(),
            cache_dir: self.settings.cache_dir.clone(),
            cache_dir_writable: self.settings.cache_dir_writable,
            model_backend: BACKEND_COMPILED,
            allow_advanced: self.settings.allow_advanced,
            path: AnalysisPath::InsufficientInput,
            why_failed: None,
            advanced_result_model: None,
            advanced_success: false,
            detectors: BTreeMap::new(),
            elapsed_ms: 0,
        };

        let text = normalize_text(text);
        let length = char_len(&text);
        if length < MIN_TEXT_CHARS {
            info!("[ANALYZER] {} chars is below the {} char minimum", length, MIN_TEXT_CHARS);
            diagnostics.why_failed = Some("text_too_short".to_string());
            diagnostics.elapsed_ms = elapsed_ms(start);
            return DetectionPayload::insufficient_input(diagnostics);
        }

        info!("[ANALYZER] Request {} ({} chars)", diagnostics.request_id, length);
        let heuristic = self.heuristic.detect(&text);

        if !self.settings.allow_advanced {
            info!("[ANALYZER] Advanced detection disabled, heuristics only");
            diagnostics.path = AnalysisPath::HeuristicOnly;
            diagnostics.why_failed = Some("advanced_detection_disabled".to_string());
            diagnostics.elapsed_ms = elapsed_ms(start);
            return DetectionPayload::heuristic_only(heuristic, diagnostics);
        }

        let run = self.ensemble.detect(&text).await;
        diagnostics.detectors = run.statuses;
        diagnostics.advanced_result_model = Some(run.outcome.result().model.clone());

        match run.outcome {
            EnsembleOutcome::Fallback(_) => {
                warn!("[ANALYZER] Advanced detection resolved to the heuristic tier");
                diagnostics.path = AnalysisPath::HeuristicOnly;
                diagnostics.why_failed = Some("advanced_detection_returned_heuristics".to_string());
                diagnostics.elapsed_ms = elapsed_ms(start);
                DetectionPayload::heuristic_only(heuristic, diagnostics)
            }
            EnsembleOutcome::Combined(primary) | EnsembleOutcome::Single { result: primary, .. } => {
                info!(
                    "[ANALYZER] Advanced result {} at {:.1}% (heuristic {:.1}%)",
                    primary.model, primary.ai_likelihood, heuristic.ai_likelihood
                );
                diagnostics.path = AnalysisPath::Advanced;
                diagnostics.advanced_success = true;
                diagnostics.elapsed_ms = elapsed_ms(start);
                DetectionPayload::from_primary(primary, &heuristic, diagnostics)
            }
        }
    }
}

/// The shared model cache over the hub loader.
pub fn build_model_cache(settings: &DetectionSettings) -> Arc<ModelCache> {
    let loader = HubModelLoader::new(settings.hub_cache_dir(), settings.device);
    Arc::new(ModelCache::new(Arc::new(loader)))
}

/// Every model key the detectors will ask for.
pub fn known_model_keys(settings: &DetectionSettings) -> Vec<ModelKey> {
    vec![
        ModelKey::classifier(settings.classifier.model_id.clone()),
        ModelKey::causal_lm(settings.perplexity.baseline_model.clone()),
        ModelKey::causal_lm(settings.perplexity.comparison_model.clone()),
    ]
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
