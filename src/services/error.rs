// Detection Errors
// Faults raised inside the pipeline; converted to "detector unavailable" at each detector boundary

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("Failed to load model {key}: {message}")]
    ModelLoad { key: String, message: String },
    #[error("Model {key} is not a {expected}")]
    WrongModelKind { key: String, expected: &'static str },
    #[error("Tokenization failed: {0}")]
    Tokenizer(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Detector timed out after {0:?}")]
    Timeout(Duration),
    #[error("Detector cancelled")]
    Cancelled,
    #[error("No words to analyze")]
    EmptyInput,
    #[error("Model backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for DetectorError {
    fn from(e: std::io::Error) -> Self {
        DetectorError::Io(e.to_string())
    }
}

#[cfg(feature = "ml-models")]
impl From<candle_core::Error> for DetectorError {
    fn from(e: candle_core::Error) -> Self {
        DetectorError::Inference(e.to_string())
    }
}
