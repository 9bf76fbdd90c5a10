// Hub Loader
// Fetches config, tokenizer and weights from the Hugging Face hub and builds the runnable model

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::processors::roberta::RobertaProcessing;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::gpt2::Gpt2LanguageModel;
use super::roberta::RobertaClassifier;
use super::DevicePreference;
use crate::services::error::DetectorError;
use crate::services::model_cache::{LoadedModel, ModelKey, ModelKind, ModelRole};

pub(super) fn load(
    cache_dir: &Path,
    preference: DevicePreference,
    key: &ModelKey,
) -> Result<LoadedModel, DetectorError> {
    let load_err = |message: String| DetectorError::ModelLoad {
        key: key.cache_key(),
        message,
    };

    let api = ApiBuilder::new()
        .with_cache_dir(cache_dir.to_path_buf())
        .build()
        .map_err(|e| load_err(format!("failed to create hub client: {}", e)))?;
    let repo = api.model(key.model_id.clone());

    let files = fetch_files(&repo).map_err(load_err)?;
    let device = select_device(preference);
    let classifier = key.role == ModelRole::Classifier;
    let tokenizer = load_tokenizer(&files, classifier).map_err(load_err)?;
    let config_json = std::fs::read_to_string(&files.config)
        .map_err(|e| load_err(format!("failed to read config.json: {}", e)))?;
    let vb = load_var_builder(&files.weights, &device).map_err(load_err)?;

    let model = match key.role {
        ModelRole::Classifier => ModelKind::Classifier(Arc::new(
            RobertaClassifier::new(&config_json, tokenizer, vb, device.clone()).map_err(|e| load_err(e.to_string()))?,
        )),
        ModelRole::CausalLm => ModelKind::CausalLm(Arc::new(
            Gpt2LanguageModel::new(&config_json, tokenizer, vb, device.clone()).map_err(|e| load_err(e.to_string()))?,
        )),
    };

    Ok(LoadedModel {
        device: device_label(&device).to_string(),
        model,
    })
}

struct ModelFiles {
    config: PathBuf,
    weights: PathBuf,
    tokenizer: Option<PathBuf>,
    vocab: Option<PathBuf>,
    merges: Option<PathBuf>,
}

fn fetch_files(repo: &ApiRepo) -> Result<ModelFiles, String> {
    let config = repo
        .get("config.json")
        .map_err(|e| format!("failed to download config.json: {}", e))?;

    let weights = match repo.get("model.safetensors") {
        Ok(path) => path,
        Err(e) => {
            debug!("[MODEL_CACHE] model.safetensors unavailable ({}), trying pytorch_model.bin", e);
            repo.get("pytorch_model.bin")
                .map_err(|e| format!("no loadable weights: {}", e))?
        }
    };

    let tokenizer = repo.get("tokenizer.json").ok();
    let (vocab, merges) = if tokenizer.is_some() {
        (None, None)
    } else {
        (repo.get("vocab.json").ok(), repo.get("merges.txt").ok())
    };

    Ok(ModelFiles {
        config,
        weights,
        tokenizer,
        vocab,
        merges,
    })
}

fn load_tokenizer(files: &ModelFiles, classifier: bool) -> Result<Tokenizer, String> {
    if let Some(path) = &files.tokenizer {
        return Tokenizer::from_file(path).map_err(|e| format!("failed to load tokenizer.json: {}", e));
    }

    // Byte-level BPE from the legacy vocab/merges pair
    let (vocab, merges) = match (&files.vocab, &files.merges) {
        (Some(vocab), Some(merges)) => (vocab, merges),
        _ => return Err("no tokenizer.json and no vocab.json/merges.txt pair".to_string()),
    };
    let bpe = BPE::from_file(&vocab.to_string_lossy(), &merges.to_string_lossy())
        .build()
        .map_err(|e| format!("failed to build BPE tokenizer: {}", e))?;

    let mut tokenizer = Tokenizer::new(bpe);
    tokenizer.with_pre_tokenizer(Some(ByteLevel::default()));
    tokenizer.with_decoder(Some(ByteLevel::default()));
    if classifier {
        let bos = tokenizer.token_to_id("<s>").unwrap_or(0);
        let eos = tokenizer.token_to_id("</s>").unwrap_or(2);
        tokenizer.with_post_processor(Some(RobertaProcessing::new(
            ("</s>".to_string(), eos),
            ("<s>".to_string(), bos),
        )));
    }
    Ok(tokenizer)
}

fn load_var_builder(weights: &Path, device: &Device) -> Result<VarBuilder<'static>, String> {
    let is_safetensors = weights
        .extension()
        .map(|ext| ext == "safetensors")
        .unwrap_or(false);

    if is_safetensors {
        // Safety: the mapped file lives in the hub cache and is not modified while loaded.
        unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights.to_path_buf()], DType::F32, device)
                .map_err(|e| format!("failed to load weights: {}", e))
        }
    } else {
        VarBuilder::from_pth(weights, DType::F32, device).map_err(|e| format!("failed to load weights: {}", e))
    }
}

/// Resolve the preferred device, falling back towards CPU.
fn select_device(preference: DevicePreference) -> Device {
    let try_cuda = matches!(preference, DevicePreference::Cuda | DevicePreference::Auto);
    let try_metal = matches!(preference, DevicePreference::Metal | DevicePreference::Auto);

    if try_cuda {
        match Device::new_cuda(0) {
            Ok(device) => {
                info!("[MODEL_CACHE] Using CUDA device 0");
                return device;
            }
            Err(e) => debug!("[MODEL_CACHE] CUDA not available: {}", e),
        }
    }
    if try_metal {
        match Device::new_metal(0) {
            Ok(device) => {
                info!("[MODEL_CACHE] Using Metal device");
                return device;
            }
            Err(e) => debug!("[MODEL_CACHE] Metal not available: {}", e),
        }
    }
    Device::Cpu
}

fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
