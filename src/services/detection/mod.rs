// Detection Module
// AI text detection core logic organized into specialized submodules:
// - aggregation: Cross-chunk statistics and confidence tiers
// - classifier: Chunk-wise sequence-classifier detector
// - perplexity: Dual-model loss comparison detector
// - heuristic: Model-free statistical fallback
// - ensemble: Runs both model detectors concurrently and combines them
// - analyzer: Entry point gating input and merging the final payload

pub mod aggregation;
pub mod analyzer;
pub mod classifier;
pub mod ensemble;
pub mod heuristic;
pub mod perplexity;

#[cfg(test)]
pub(crate) mod test_support;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::models::DetectionResult;
use crate::services::error::DetectorError;

pub use aggregation::{ConfidenceScale, DispersionTier, CLASSIFIER_SCALE, PERPLEXITY_SCALE};
pub use analyzer::{AnalyzerSettings, TextAnalyzer, MIN_TEXT_CHARS};
pub use classifier::{ClassifierDetector, ClassifierSettings};
pub use ensemble::{Ensemble, EnsembleOutcome, EnsembleSettings};
pub use heuristic::{detect_quick, HeuristicFallback};
pub use perplexity::{PerplexityComparator, PerplexitySettings};

/// Result at a detector boundary. Faults never cross it.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorOutcome {
    Success(DetectionResult),
    Unavailable { reason: String },
}

impl DetectorOutcome {
    /// Downgrade a fault to `Unavailable`, logging it under the detector's tag.
    pub fn from_result(tag: &str, result: Result<DetectionResult, DetectorError>) -> Self {
        match result {
            Ok(result) => DetectorOutcome::Success(result),
            Err(e) => {
                warn!("[{}] Detector unavailable: {}", tag, e);
                DetectorOutcome::Unavailable { reason: e.to_string() }
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        DetectorOutcome::Unavailable { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DetectorOutcome::Success(_))
    }

    /// Short status for the diagnostics record.
    pub fn status(&self) -> String {
        match self {
            DetectorOutcome::Success(result) => format!("ok ({})", result.model),
            DetectorOutcome::Unavailable { reason } => format!("unavailable: {}", reason),
        }
    }
}

/// A model-backed detector. Blocking; the ensemble runs it on a worker thread.
pub trait Detector: Send + Sync {
    fn detect(&self, text: &str, cancel: &CancellationToken) -> DetectorOutcome;
}

/// Bail out between chunks once the task is cancelled.
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), DetectorError> {
    if cancel.is_cancelled() {
        Err(DetectorError::Cancelled)
    } else {
        Ok(())
    }
}
