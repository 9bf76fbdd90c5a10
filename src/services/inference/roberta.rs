// RoBERTa Sequence Classifier
// Binary human/AI classifier head over a RoBERTa encoder

use std::collections::HashMap;

use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as RobertaConfig, XLMRobertaForSequenceClassification};
use serde::Deserialize;
use tokenizers::{Encoding, PostProcessor, Tokenizer, TruncationDirection};

use super::TextClassifier;
use crate::services::error::DetectorError;

/// Label fragments that mark the machine-generated class.
const AI_LABEL_HINTS: [&str; 4] = ["chatgpt", "ai", "fake", "machine"];

#[derive(Debug, Default, Deserialize)]
struct LabelConfig {
    #[serde(default)]
    id2label: HashMap<String, String>,
}

pub struct RobertaClassifier {
    tokenizer: Tokenizer,
    model: XLMRobertaForSequenceClassification,
    device: Device,
    ai_index: usize,
}

impl RobertaClassifier {
    pub fn new(config_json: &str, tokenizer: Tokenizer, vb: VarBuilder, device: Device) -> Result<Self, DetectorError> {
        let config: RobertaConfig = serde_json::from_str(config_json)
            .map_err(|e| DetectorError::Inference(format!("invalid classifier config: {}", e)))?;
        let labels: LabelConfig = serde_json::from_str(config_json).unwrap_or_default();

        let num_labels = labels.id2label.len().max(2);
        let ai_index = resolve_ai_index(&labels.id2label);
        let model = XLMRobertaForSequenceClassification::new(num_labels, &config, vb)?;

        Ok(Self {
            tokenizer,
            model,
            device,
            ai_index,
        })
    }
}

impl TextClassifier for RobertaClassifier {
    fn ai_probability(&self, text: &str, max_tokens: usize) -> Result<f64, DetectorError> {
        let encoding = encode_truncated(&self.tokenizer, text, max_tokens)?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let logits = self.model.forward(&input_ids, &attention_mask, &token_type_ids)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let ai_prob = probs.i((0, self.ai_index))?.to_scalar::<f32>()?;
        Ok(ai_prob as f64)
    }
}

/// Encode at most `max_tokens` ids, special tokens included.
/// Content is cut before post-processing so `<s>` and `</s>` always survive.
fn encode_truncated(tokenizer: &Tokenizer, text: &str, max_tokens: usize) -> Result<Encoding, DetectorError> {
    let special = tokenizer
        .get_post_processor()
        .map(|p| p.added_tokens(false))
        .unwrap_or(0);
    let mut encoding = tokenizer
        .encode(text, false)
        .map_err(|e| DetectorError::Tokenizer(e.to_string()))?;
    encoding.truncate(max_tokens.saturating_sub(special).max(1), 0, TruncationDirection::Right);
    tokenizer
        .post_process(encoding, None, true)
        .map_err(|e| DetectorError::Tokenizer(e.to_string()))
}

/// Index of the machine-generated class; index 1 when labels are absent or generic.
fn resolve_ai_index(id2label: &HashMap<String, String>) -> usize {
    id2label
        .iter()
        .filter_map(|(id, label)| {
            let label = label.to_ascii_lowercase();
            let is_ai = AI_LABEL_HINTS
                .iter()
                .any(|hint| label.split(|c: char| !c.is_ascii_alphanumeric()).any(|part| part == *hint));
            if is_ai {
                id.parse::<usize>().ok()
            } else {
                None
            }
        })
        .min()
        .unwrap_or(1)
}
