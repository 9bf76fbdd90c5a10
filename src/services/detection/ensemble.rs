// Ensemble Detection
// Runs the classifier and the perplexity comparator in parallel and fuses their results
// - Both succeed: weighted combination (classifier 0.6 + perplexity 0.4)
// - One succeeds: passed through unchanged
// - Neither: heuristic fallback

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::aggregation::weighted_combination;
use super::heuristic::HeuristicFallback;
use super::{Detector, DetectorOutcome};
use crate::models::{DetectionResult, IndividualResults};
use crate::services::error::DetectorError;

/// Weight for the classifier in fusion
const CLASSIFIER_WEIGHT: f64 = 0.6;
/// Weight for the perplexity comparator in fusion
const PERPLEXITY_WEIGHT: f64 = 0.4;
const COMBINED_CONFIDENCE: f64 = 0.92;
const COMBINED_MODEL: &str = "combined:roberta+binoculars";
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorLabel {
    Classifier,
    Perplexity,
}

impl DetectorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorLabel::Classifier => "roberta",
            DetectorLabel::Perplexity => "binoculars",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSettings {
    pub classifier_weight: f64,
    pub perplexity_weight: f64,
    pub combined_confidence: f64,
    /// Deadline for each detector task, including the wait for a worker
    pub task_timeout: Duration,
    pub workers: usize,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            classifier_weight: CLASSIFIER_WEIGHT,
            perplexity_weight: PERPLEXITY_WEIGHT,
            combined_confidence: COMBINED_CONFIDENCE,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            workers: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnsembleOutcome {
    Combined(DetectionResult),
    Single {
        detector: DetectorLabel,
        result: DetectionResult,
    },
    Fallback(DetectionResult),
}

impl EnsembleOutcome {
    pub fn result(&self) -> &DetectionResult {
        match self {
            EnsembleOutcome::Combined(result) => result,
            EnsembleOutcome::Single { result, .. } => result,
            EnsembleOutcome::Fallback(result) => result,
        }
    }

    pub fn into_result(self) -> DetectionResult {
        match self {
            EnsembleOutcome::Combined(result) => result,
            EnsembleOutcome::Single { result, .. } => result,
            EnsembleOutcome::Fallback(result) => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, EnsembleOutcome::Fallback(_))
    }
}

/// Outcome plus per-detector status, for diagnostics.
#[derive(Debug, Clone)]
pub struct EnsembleRun {
    pub outcome: EnsembleOutcome,
    pub statuses: BTreeMap<String, String>,
    pub elapsed: Duration,
}

pub struct Ensemble {
    classifier: Arc<dyn Detector>,
    perplexity: Arc<dyn Detector>,
    fallback: HeuristicFallback,
    pool: Arc<Semaphore>,
    settings: EnsembleSettings,
}

impl Ensemble {
    pub fn new(classifier: Arc<dyn Detector>, perplexity: Arc<dyn Detector>, settings: EnsembleSettings) -> Self {
        Self {
            classifier,
            perplexity,
            fallback: HeuristicFallback::new(),
            pool: Arc::new(Semaphore::new(settings.workers.max(1))),
            settings,
        }
    }

    /// Run both detectors concurrently, wait for both to settle, then decide.
    pub async fn detect(&self, text: &str) -> EnsembleRun {
        let start = Instant::now();
        let text: Arc<str> = Arc::from(text);
        info!("[ENSEMBLE] Starting parallel detection ({} chars)", text.chars().count());

        // Results are identified by position, never by their content
        let (classifier_outcome, perplexity_outcome) = tokio::join!(
            self.run_task(DetectorLabel::Classifier, Arc::clone(&self.classifier), Arc::clone(&text)),
            self.run_task(DetectorLabel::Perplexity, Arc::clone(&self.perplexity), Arc::clone(&text)),
        );

        let mut statuses = BTreeMap::new();
        statuses.insert(DetectorLabel::Classifier.as_str().to_string(), classifier_outcome.status());
        statuses.insert(DetectorLabel::Perplexity.as_str().to_string(), perplexity_outcome.status());

        let outcome = match (classifier_outcome, perplexity_outcome) {
            (DetectorOutcome::Success(roberta), DetectorOutcome::Success(binoculars)) => {
                info!(
                    "[ENSEMBLE] Both detectors succeeded: classifier={:.1}% perplexity={:.1}%",
                    roberta.ai_likelihood, binoculars.ai_likelihood
                );
                EnsembleOutcome::Combined(self.combine(roberta, binoculars))
            }
            (DetectorOutcome::Success(result), DetectorOutcome::Unavailable { .. }) => {
                info!("[ENSEMBLE] Only the classifier succeeded: {:.1}%", result.ai_likelihood);
                EnsembleOutcome::Single {
                    detector: DetectorLabel::Classifier,
                    result,
                }
            }
            (DetectorOutcome::Unavailable { .. }, DetectorOutcome::Success(result)) => {
                info!("[ENSEMBLE] Only the perplexity comparator succeeded: {:.1}%", result.ai_likelihood);
                EnsembleOutcome::Single {
                    detector: DetectorLabel::Perplexity,
                    result,
                }
            }
            (DetectorOutcome::Unavailable { .. }, DetectorOutcome::Unavailable { .. }) => {
                warn!("[ENSEMBLE] Both detectors unavailable, using heuristic fallback");
                EnsembleOutcome::Fallback(self.fallback.detect(&text))
            }
        };

        let elapsed = start.elapsed();
        info!("[ENSEMBLE] Completed in {}ms", elapsed.as_millis());
        EnsembleRun {
            outcome,
            statuses,
            elapsed,
        }
    }

    /// Run one detector on the worker pool under a deadline.
    async fn run_task(&self, label: DetectorLabel, detector: Arc<dyn Detector>, text: Arc<str>) -> DetectorOutcome {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let pool = Arc::clone(&self.pool);

        let work = async move {
            let permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return DetectorOutcome::unavailable("worker pool closed"),
            };
            let handle = tokio::task::spawn_blocking(move || {
                // The worker slot stays taken until inference actually returns
                let _permit = permit;
                detector.detect(&text, &task_cancel)
            });
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("[ENSEMBLE] {} task failed: {}", label.as_str(), e);
                    DetectorOutcome::unavailable(format!("task failed: {}", e))
                }
            }
        };

        match tokio::time::timeout(self.settings.task_timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                let err = DetectorError::Timeout(self.settings.task_timeout);
                warn!("[ENSEMBLE] {} {}", label.as_str(), err);
                DetectorOutcome::unavailable(err.to_string())
            }
        }
    }

    fn combine(&self, roberta: DetectionResult, binoculars: DetectionResult) -> DetectionResult {
        let score = weighted_combination(
            roberta.ai_likelihood,
            self.settings.classifier_weight,
            binoculars.ai_likelihood,
            self.settings.perplexity_weight,
        );

        let mut indicators = roberta.indicators.clone();
        indicators.extend(binoculars.indicators.iter().cloned());

        let note = format!(
            "Combined RoBERTa ({:.0}%) and Binoculars ({:.0}%) detection",
            self.settings.classifier_weight * 100.0,
            self.settings.perplexity_weight * 100.0
        );

        let mut combined = DetectionResult::new(
            score,
            self.settings.combined_confidence,
            indicators,
            COMBINED_MODEL,
            note,
        );
        combined.roberta_score = Some(roberta.ai_likelihood);
        combined.binoculars_score = Some(binoculars.ai_likelihood);
        combined.individual_results = Some(IndividualResults {
            roberta: Box::new(roberta),
            binoculars: Box::new(binoculars),
        });
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::detection::heuristic::HEURISTIC_MODEL;
    use crate::services::detection::test_support::ScriptedDetector;

    const TEXT: &str = "The committee reviewed the proposal carefully. The proposal outlined several \
        improvements to the process. The improvements were considered practical and affordable.";

    fn ensemble(classifier: Arc<dyn Detector>, perplexity: Arc<dyn Detector>) -> Ensemble {
        Ensemble::new(classifier, perplexity, EnsembleSettings::default())
    }

    #[tokio::test]
    async fn test_both_succeed_weighted_combination() {
        let run = ensemble(
            ScriptedDetector::success(80.0, "roberta-model"),
            ScriptedDetector::success(50.0, "binoculars:a|b"),
        )
        .detect(TEXT)
        .await;

        let EnsembleOutcome::Combined(result) = run.outcome else {
            panic!("expected combined outcome");
        };
        assert_eq!(result.ai_likelihood, 68.0);
        assert_eq!(result.confidence, 0.92);
        assert_eq!(result.model, "combined:roberta+binoculars");
        assert_eq!(result.note, "Combined RoBERTa (60%) and Binoculars (40%) detection");
        assert_eq!(result.roberta_score, Some(80.0));
        assert_eq!(result.binoculars_score, Some(50.0));
        assert_eq!(
            result.indicators,
            vec!["roberta-model indicator".to_string(), "binoculars:a|b indicator".to_string()]
        );
        let individual = result.individual_results.unwrap();
        assert_eq!(individual.roberta.model, "roberta-model");
        assert_eq!(individual.binoculars.model, "binoculars:a|b");
    }

    #[tokio::test]
    async fn test_results_assigned_by_position_not_name() {
        // Swapped-looking names must not confuse the assignment
        let run = ensemble(
            ScriptedDetector::success(90.0, "binoculars-lookalike"),
            ScriptedDetector::success(10.0, "roberta-lookalike"),
        )
        .detect(TEXT)
        .await;

        let result = run.outcome.into_result();
        assert_eq!(result.roberta_score, Some(90.0));
        assert_eq!(result.binoculars_score, Some(10.0));
        assert_eq!(result.ai_likelihood, 58.0);
    }

    #[tokio::test]
    async fn test_single_success_passes_through_unchanged() {
        let classifier_only = ensemble(ScriptedDetector::success(73.5, "roberta"), ScriptedDetector::failure("load failed"))
            .detect(TEXT)
            .await;
        match &classifier_only.outcome {
            EnsembleOutcome::Single { detector, result } => {
                assert_eq!(*detector, DetectorLabel::Classifier);
                assert_eq!(result.ai_likelihood, 73.5);
                assert_eq!(result.confidence, 0.9);
                assert!(result.roberta_score.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(classifier_only.statuses["binoculars"].contains("load failed"));

        let perplexity_only = ensemble(ScriptedDetector::failure("oom"), ScriptedDetector::success(41.0, "binoculars"))
            .detect(TEXT)
            .await;
        assert!(matches!(
            perplexity_only.outcome,
            EnsembleOutcome::Single { detector: DetectorLabel::Perplexity, .. }
        ));
    }

    #[tokio::test]
    async fn test_both_fail_uses_heuristic() {
        let run = ensemble(ScriptedDetector::failure("a"), ScriptedDetector::failure("b"))
            .detect(TEXT)
            .await;
        assert!(run.outcome.is_fallback());
        let result = run.outcome.result();
        assert_eq!(result.model, HEURISTIC_MODEL);
        assert_eq!(result.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_timeout_marks_detector_unavailable() {
        let settings = EnsembleSettings {
            task_timeout: Duration::from_millis(100),
            ..EnsembleSettings::default()
        };
        let ensemble = Ensemble::new(
            ScriptedDetector::slow(80.0, "roberta", Duration::from_secs(5)),
            ScriptedDetector::success(40.0, "binoculars"),
            settings,
        );

        let start = Instant::now();
        let run = ensemble.detect(TEXT).await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(matches!(
            run.outcome,
            EnsembleOutcome::Single { detector: DetectorLabel::Perplexity, .. }
        ));
        assert!(run.statuses["roberta"].contains("timed out"));
    }

    #[tokio::test]
    async fn test_detectors_run_concurrently() {
        let delay = Duration::from_millis(300);
        let ensemble = ensemble(
            ScriptedDetector::slow(60.0, "roberta", delay),
            ScriptedDetector::slow(30.0, "binoculars", delay),
        );

        let start = Instant::now();
        let run = ensemble.detect(TEXT).await;

        assert!(start.elapsed() < Duration::from_millis(550));
        assert_eq!(run.outcome.result().ai_likelihood, 48.0);
    }

    #[tokio::test]
    async fn test_single_worker_runs_detectors_in_turn() {
        let delay = Duration::from_millis(200);
        let ensemble = Ensemble::new(
            ScriptedDetector::slow(60.0, "roberta", delay),
            ScriptedDetector::slow(30.0, "binoculars", delay),
            EnsembleSettings {
                workers: 1,
                ..EnsembleSettings::default()
            },
        );

        let start = Instant::now();
        let run = ensemble.detect(TEXT).await;

        assert!(start.elapsed() >= delay * 2, "finished after {:?}", start.elapsed());
        assert_eq!(run.outcome.result().ai_likelihood, 48.0);
    }
}
