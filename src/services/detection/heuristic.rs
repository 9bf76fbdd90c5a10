// Heuristic Fallback
// Model-free statistical scorer; always produces a usable result

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::models::DetectionResult;
use crate::services::error::DetectorError;
use crate::services::text_processor::{split_on_periods, word_count};

pub const HEURISTIC_MODEL: &str = "statistical_heuristics";
pub const QUICK_MODEL: &str = "statistical_heuristics_quick";
const QUICK_ERROR_MODEL: &str = "statistical_heuristics_quick_error";
const FALLBACK_MODEL: &str = "fallback";

const HEURISTIC_CONFIDENCE: f64 = 0.7;
const FAULT_SCORE: f64 = 50.0;
const FAULT_CONFIDENCE: f64 = 0.3;

const PRONOUNS: [&str; 7] = ["i", "me", "my", "mine", "we", "us", "our"];
const QUICK_PRONOUNS: [&str; 10] = ["i", "me", "my", "mine", "myself", "we", "us", "our", "ours", "ourselves"];

const TRANSITIONS: [&str; 9] = [
    "furthermore",
    "moreover",
    "additionally",
    "consequently",
    "therefore",
    "thus",
    "hence",
    "accordingly",
    "nonetheless",
];
const QUICK_TRANSITIONS: [&str; 17] = [
    "furthermore",
    "moreover",
    "additionally",
    "consequently",
    "therefore",
    "thus",
    "hence",
    "accordingly",
    "nonetheless",
    "nevertheless",
    "subsequently",
    "specifically",
    "particularly",
    "essentially",
    "fundamentally",
    "significantly",
    "notably",
];

const CONTRACTIONS: [&str; 6] = ["n't", "'ll", "'ve", "'re", "'m", "'s"];
const QUICK_CONTRACTIONS: [&str; 7] = ["n't", "'ll", "'ve", "'re", "'m", "'d", "'s"];

/// Pure statistical scorer used when no model-backed result is available,
/// and always computed as a supplementary signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicFallback;

impl HeuristicFallback {
    pub fn new() -> Self {
        Self
    }

    /// Never fails: an internal fault becomes a neutral 50 / 0.3 result.
    pub fn detect(&self, text: &str) -> DetectionResult {
        match score_heuristics(text) {
            Ok(result) => result,
            Err(e) => {
                warn!("[HEURISTIC] Analysis failed: {}", e);
                DetectionResult::new(
                    FAULT_SCORE,
                    FAULT_CONFIDENCE,
                    vec!["Error during analysis".to_string()],
                    FALLBACK_MODEL,
                    e.to_string(),
                )
            }
        }
    }
}

fn score_heuristics(text: &str) -> Result<DetectionResult, DetectorError> {
    let words = lowercase_words(text);
    if words.is_empty() {
        return Err(DetectorError::EmptyInput);
    }

    let mut score = 0.0;
    let mut indicators = Vec::new();

    let segments = split_on_periods(text);
    let sentences = non_empty_sentences(&segments);

    if segments.len() > 3 {
        if let Some(cv) = length_variation(&sentences) {
            if cv < 0.3 {
                score += 30.0;
                indicators.push("Low sentence length variance".to_string());
            }
        }
    }

    if let Some(ratio) = unique_starter_ratio(&sentences) {
        if ratio < 0.5 {
            score += 25.0;
            indicators.push("Repetitive sentence starters".to_string());
        }
    }

    if ratio_of(&words, &PRONOUNS) < 0.01 {
        score += 20.0;
        indicators.push("Lack of personal pronouns".to_string());
    }

    if ratio_of(&words, &TRANSITIONS) > 0.02 {
        score += 15.0;
        indicators.push("High transitional phrase density".to_string());
    }

    if !contains_any(text, &CONTRACTIONS) && words.len() > 50 {
        score += 10.0;
        indicators.push("Lack of contractions".to_string());
    }

    debug!("[HEURISTIC] score={} indicators={}", score, indicators.len());

    Ok(DetectionResult::new(
        f64::min(score, 100.0),
        HEURISTIC_CONFIDENCE,
        indicators,
        HEURISTIC_MODEL,
        "Statistical pattern analysis without model inference",
    ))
}

/// Fast graded variant of the fallback for the quick CLI.
pub fn detect_quick(text: &str) -> DetectionResult {
    guarded_quick(text, score_quick)
}

/// A panicking scorer becomes a neutral 50 / 0.3 result instead of killing the CLI.
fn guarded_quick(text: &str, scorer: fn(&str) -> DetectionResult) -> DetectionResult {
    match panic::catch_unwind(AssertUnwindSafe(|| scorer(text))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown fault".to_string());
            warn!("[HEURISTIC] Quick analysis failed: {}", message);
            DetectionResult::new(
                FAULT_SCORE,
                FAULT_CONFIDENCE,
                vec![format!("Analysis error: {}", message)],
                QUICK_ERROR_MODEL,
                "Quick statistical analysis failed",
            )
        }
    }
}

fn score_quick(text: &str) -> DetectionResult {
    let text = text.trim();
    let words = lowercase_words(text);

    if words.len() < 50 {
        return DetectionResult::new(
            FAULT_SCORE,
            FAULT_CONFIDENCE,
            vec!["Insufficient text for analysis".to_string()],
            QUICK_MODEL,
            "At least 50 words are required for quick analysis",
        );
    }

    let segments = split_on_periods(text);
    let sentences = non_empty_sentences(&segments);
    let mut score = 0.0;
    let mut indicators: Vec<String> = Vec::new();

    if sentences.len() > 3 {
        if let Some(cv) = length_variation(&sentences) {
            if cv < 0.3 {
                score += 30.0;
                indicators.push("Uniform sentence lengths".to_string());
            } else if cv < 0.4 {
                score += 15.0;
                indicators.push("Somewhat uniform sentence lengths".to_string());
            }
        }

        if let Some(ratio) = unique_starter_ratio(&sentences) {
            if ratio < 0.5 {
                score += 25.0;
                indicators.push("Repetitive sentence starters".to_string());
            } else if ratio < 0.6 {
                score += 12.0;
                indicators.push("Some repetitive starters".to_string());
            }
        }
    }

    let pronoun_ratio = ratio_of(&words, &QUICK_PRONOUNS);
    if pronoun_ratio < 0.005 {
        score += 20.0;
        indicators.push("No personal pronouns".to_string());
    } else if pronoun_ratio < 0.01 {
        score += 10.0;
        indicators.push("Few personal pronouns".to_string());
    }

    let transition_ratio = ratio_of(&words, &QUICK_TRANSITIONS);
    if transition_ratio > 0.02 {
        score += 15.0;
        indicators.push("High transitional phrase density".to_string());
    } else if transition_ratio > 0.01 {
        score += 8.0;
        indicators.push("Elevated transitional phrases".to_string());
    }

    if !contains_any(text, &QUICK_CONTRACTIONS) && words.len() > 100 {
        score += 10.0;
        indicators.push("No contractions used".to_string());
    }

    let unique: HashSet<&str> = words.iter().map(String::as_str).collect();
    let ttr = unique.len() as f64 / words.len() as f64;
    if words.len() > 200 && ttr < 0.4 {
        score += 10.0;
        indicators.push("Low vocabulary diversity".to_string());
    }

    let length_bonus = f64::min(0.2, words.len() as f64 / 1000.0);
    let indicator_bonus = f64::min(0.2, indicators.len() as f64 * 0.05);
    let confidence = f64::min(0.9, 0.5 + length_bonus + indicator_bonus);

    if indicators.is_empty() {
        indicators.push("No strong AI indicators detected".to_string());
    }

    DetectionResult::new(
        f64::min(score, 100.0),
        crate::models::round2(confidence),
        indicators,
        QUICK_MODEL,
        "Quick statistical analysis",
    )
}

// ============ Signals ============

/// Lowercased whitespace tokens, one per token.
fn lowercase_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(normalize_word).collect()
}

/// Surrounding punctuation trimmed, inner apostrophes kept.
/// A token made only of punctuation is kept as is.
fn normalize_word(token: &str) -> String {
    let trimmed = token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .trim_matches('\'');
    if trimmed.is_empty() {
        token.to_lowercase()
    } else {
        trimmed.to_lowercase()
    }
}

fn non_empty_sentences<'a>(segments: &[&'a str]) -> Vec<&'a str> {
    segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Coefficient of variation of sentence word counts (sample standard deviation).
/// `None` with fewer than two sentences.
fn length_variation(sentences: &[&str]) -> Option<f64> {
    if sentences.len() < 2 {
        return None;
    }
    let lengths: Vec<f64> = sentences.iter().map(|s| word_count(s) as f64).collect();
    let n = lengths.len() as f64;
    let mean = lengths.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return Some(0.0);
    }
    let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() / mean)
}

/// Distinct first words over sentence count.
fn unique_starter_ratio(sentences: &[&str]) -> Option<f64> {
    let starts: Vec<String> = sentences
        .iter()
        .filter_map(|s| s.split_whitespace().next())
        .map(normalize_word)
        .collect();
    if starts.is_empty() {
        return None;
    }
    let unique: HashSet<&String> = starts.iter().collect();
    Some(unique.len() as f64 / starts.len() as f64)
}

fn ratio_of(words: &[String], vocabulary: &[&str]) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| vocabulary.contains(&w.as_str())).count();
    hits as f64 / words.len() as f64
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIFORM_AI_TEXT: &str = "The system processes data efficiently. The system stores results securely. \
        The system reports metrics accurately. The system handles errors gracefully. \
        The system logs events reliably. \
        Furthermore the system scales horizontally. Moreover the system remains available.";

    fn human_text() -> String {
        "I went out yesterday and honestly it wasn't great. We got lost twice, my phone died, \
         and by the time we'd found the place it had closed. Still, I'm glad we tried. \
         Next week? Probably the beach, if the weather holds up and nobody's sick again. \
         My sister says she'll drive, which is a relief because I can't stand the traffic."
            .to_string()
    }

    #[test]
    fn test_uniform_formal_text_scores_high() {
        let result = HeuristicFallback::new().detect(UNIFORM_AI_TEXT);
        assert_eq!(result.model, HEURISTIC_MODEL);
        assert_eq!(result.confidence, 0.7);
        assert!(result.indicators.contains(&"Low sentence length variance".to_string()));
        assert!(result.indicators.contains(&"Repetitive sentence starters".to_string()));
        assert!(result.indicators.contains(&"Lack of personal pronouns".to_string()));
        assert!(result.indicators.contains(&"High transitional phrase density".to_string()));
        assert_eq!(result.ai_likelihood, 90.0);
    }

    #[test]
    fn test_personal_text_scores_low() {
        let result = HeuristicFallback::new().detect(&human_text());
        assert!(!result.indicators.contains(&"Lack of personal pronouns".to_string()));
        assert!(!result.indicators.contains(&"Lack of contractions".to_string()));
        assert!(result.ai_likelihood <= 30.0);
    }

    #[test]
    fn test_contractions_only_counted_over_fifty_words() {
        let short = "This is a plain statement without any shortened forms at all";
        let result = HeuristicFallback::new().detect(short);
        assert!(!result.indicators.contains(&"Lack of contractions".to_string()));

        let long = vec!["Results remain stable across repeated trials"; 10].join(" ");
        let result = HeuristicFallback::new().detect(&long);
        assert!(result.indicators.contains(&"Lack of contractions".to_string()));
    }

    #[test]
    fn test_single_sentence_skips_uniformity() {
        let text = "One long sentence. ";
        let result = HeuristicFallback::new().detect(text);
        assert!(!result.indicators.contains(&"Low sentence length variance".to_string()));
    }

    #[test]
    fn test_fault_returns_neutral_result() {
        let result = HeuristicFallback::new().detect("  \n\t  ");
        assert_eq!(result.ai_likelihood, 50.0);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.model, "fallback");
        assert_eq!(result.indicators, vec!["Error during analysis".to_string()]);
    }

    #[test]
    fn test_score_is_capped_and_in_range() {
        for text in [UNIFORM_AI_TEXT.to_string(), human_text(), "x".repeat(500)] {
            let result = HeuristicFallback::new().detect(&text);
            assert!((0.0..=100.0).contains(&result.ai_likelihood));
            assert!((0.0..=1.0).contains(&result.confidence));
        }
    }

    #[test]
    fn test_punctuation_does_not_hide_keywords() {
        let words = lowercase_words("Furthermore, I think (we) 'agree'.");
        assert_eq!(words, vec!["furthermore", "i", "think", "we", "agree"]);
    }

    #[test]
    fn test_punctuation_only_text_is_scored() {
        let text = "!? ".repeat(25);
        let result = HeuristicFallback::new().detect(&text);
        assert_eq!(result.model, HEURISTIC_MODEL);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.ai_likelihood, 20.0);
        assert_eq!(result.indicators, vec!["Lack of personal pronouns".to_string()]);
    }

    #[test]
    fn test_starters_ignore_trailing_punctuation() {
        let sentences = ["However, it rained", "However it cleared", "Then it rained"];
        let ratio = unique_starter_ratio(&sentences).unwrap();
        assert!((ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_quick_requires_fifty_words() {
        let result = detect_quick("Too short to judge.");
        assert_eq!(result.ai_likelihood, 50.0);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.indicators, vec!["Insufficient text for analysis".to_string()]);
        assert_eq!(result.model, QUICK_MODEL);
    }

    #[test]
    fn test_quick_grades_and_confidence() {
        let text = vec![UNIFORM_AI_TEXT; 3].join(" ");
        let result = detect_quick(&text);
        assert_eq!(result.model, QUICK_MODEL);
        assert!(result.indicators.contains(&"Uniform sentence lengths".to_string()));
        assert!(result.indicators.contains(&"No personal pronouns".to_string()));
        assert!(result.confidence <= 0.9);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn test_quick_no_indicators_message() {
        let text = "I can't believe it. We drove for hours through the rain and my brother kept singing \
            the same song over and over until everyone in the car begged him to stop. Honestly? Fine. \
            Our dog slept the whole way, snoring like an old man, and I'm pretty sure she dreamed about \
            the beach we'd promised her last summer but never visited because the weather turned. \
            Tomorrow we leave again.";
        let result = detect_quick(text);
        assert_eq!(result.model, QUICK_MODEL);
        assert_eq!(result.ai_likelihood, 0.0);
        assert_eq!(result.indicators, vec!["No strong AI indicators detected".to_string()]);
        assert_eq!(result.confidence, 0.57);
    }

    #[test]
    fn test_quick_scores_repeated_personal_text() {
        let text = format!("{} {}", human_text(), human_text());
        let result = detect_quick(&text);
        assert!(result.ai_likelihood < 50.0);
        assert!(!result.indicators.contains(&"No personal pronouns".to_string()));
    }

    #[test]
    fn test_quick_fault_is_contained() {
        fn broken(_: &str) -> DetectionResult {
            panic!("sentence table corrupted")
        }
        let result = guarded_quick("any text", broken);
        assert_eq!(result.ai_likelihood, 50.0);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.model, QUICK_ERROR_MODEL);
        assert_eq!(result.indicators, vec!["Analysis error: sentence table corrupted".to_string()]);
    }
}
