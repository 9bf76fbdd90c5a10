// AI Detector Core Services

pub mod config_store;
pub mod detection;
pub mod error;
pub mod inference;
pub mod model_cache;
pub mod text_processor;

pub use config_store::*;
pub use error::DetectorError;
pub use model_cache::{ModelCache, ModelHandle, ModelKey, ModelLoader, ModelRole, PreloadReport};
pub use text_processor::{normalize_text, word_count, Chunker};

pub use detection::{
    detect_quick,
    Detector,
    DetectorOutcome,
    Ensemble,
    EnsembleOutcome,
    HeuristicFallback,
    TextAnalyzer,
};
