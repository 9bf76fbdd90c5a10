// Aggregation Logic
// Cross-chunk statistics and dispersion-based confidence tiers

use crate::models::{round2, AggregateStats, ChunkAnalysis, ChunkScore};

/// Standard deviation (in score points) below which chunks count as consistent.
const CONSISTENT_STD: f64 = 10.0;
/// Standard deviation below which chunks count as moderately varied.
const MODERATE_STD: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispersionTier {
    Consistent,
    Moderate,
    Variable,
}

impl DispersionTier {
    pub fn from_std_dev(std_dev: f64) -> Self {
        if std_dev < CONSISTENT_STD {
            DispersionTier::Consistent
        } else if std_dev < MODERATE_STD {
            DispersionTier::Moderate
        } else {
            DispersionTier::Variable
        }
    }
}

/// Confidence assigned to each dispersion tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScale {
    pub consistent: f64,
    pub moderate: f64,
    pub variable: f64,
}

pub const CLASSIFIER_SCALE: ConfidenceScale = ConfidenceScale {
    consistent: 0.92,
    moderate: 0.85,
    variable: 0.78,
};

pub const PERPLEXITY_SCALE: ConfidenceScale = ConfidenceScale {
    consistent: 0.93,
    moderate: 0.87,
    variable: 0.80,
};

impl ConfidenceScale {
    pub fn confidence(&self, tier: DispersionTier) -> f64 {
        match tier {
            DispersionTier::Consistent => self.consistent,
            DispersionTier::Moderate => self.moderate,
            DispersionTier::Variable => self.variable,
        }
    }
}

impl AggregateStats {
    /// Mean, min, max and population standard deviation. `None` for an empty slice.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }

        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // Summation error must not push the mean outside [min, max]
        let mean = mean(scores).clamp(min, max);

        Some(Self {
            mean,
            min,
            max,
            std_dev: std_dev(scores, mean),
        })
    }

    pub fn tier(&self) -> DispersionTier {
        DispersionTier::from_std_dev(self.std_dev)
    }
}

/// Arithmetic mean; every chunk weighs the same regardless of its length.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Summary lines shared by the model-backed detectors.
pub fn spread_indicators(num_chunks: usize, stats: &AggregateStats) -> (String, String, String) {
    (
        format!("Average across {} chunks: {:.1}%", num_chunks, stats.mean),
        format!("Score range: {:.1}% to {:.1}%", stats.min, stats.max),
        format!("Standard deviation: {:.1}%", stats.std_dev),
    )
}

/// Assemble the reported chunk analysis; statistics rounded, chunk scores kept raw.
pub fn build_chunk_analysis(chunks: Vec<ChunkScore>, stats: &AggregateStats) -> ChunkAnalysis {
    ChunkAnalysis {
        num_chunks: chunks.len(),
        stats: stats.rounded(),
        avg_loss_a: None,
        avg_loss_b: None,
        chunks,
    }
}

/// Fixed-weight blend of two scores, rounded for reporting.
pub fn weighted_combination(first: f64, first_weight: f64, second: f64, second_weight: f64) -> f64 {
    round2(first * first_weight + second * second_weight)
}
