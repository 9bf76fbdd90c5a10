// Configuration Storage Service
// Reads the optional config file and resolves runtime settings with environment overrides

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::detection::classifier::{ClassifierSettings, DEFAULT_CLASSIFIER_MODEL};
use super::detection::perplexity::{PerplexitySettings, DEFAULT_BASELINE_MODEL, DEFAULT_COMPARISON_MODEL};
use super::error::DetectorError;
use super::inference::DevicePreference;

/// Deployment root whose presence marks a production host.
pub const PRODUCTION_ROOT: &str = "/var/app/current";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionConfig {
    #[serde(default = "default_true")]
    pub allow_advanced: bool,
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
    #[serde(default = "default_baseline_model")]
    pub baseline_model: String,
    #[serde(default = "default_comparison_model")]
    pub comparison_model: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_timeout_secs")]
    pub detector_timeout_secs: u64,
    #[serde(default)]
    pub cache_dir: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            allow_advanced: true,
            classifier_model: default_classifier_model(),
            baseline_model: default_baseline_model(),
            comparison_model: default_comparison_model(),
            device: default_device(),
            detector_timeout_secs: default_timeout_secs(),
            cache_dir: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_classifier_model() -> String { DEFAULT_CLASSIFIER_MODEL.to_string() }
fn default_baseline_model() -> String { DEFAULT_BASELINE_MODEL.to_string() }
fn default_comparison_model() -> String { DEFAULT_COMPARISON_MODEL.to_string() }
fn default_device() -> String { "auto".to_string() }
fn default_timeout_secs() -> u64 { 120 }

pub struct ConfigStore {
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_file }
    }

    /// Store located by `AI_DETECTOR_CONFIG_DIR`, else the platform config dir.
    pub fn from_env<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        env("AI_DETECTOR_CONFIG_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .or_else(Self::default_config_dir)
            .map(Self::new)
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ai-detector"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Load configuration from file
    pub fn load(&self) -> Result<AppConfig, DetectorError> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file)
            .map_err(|e| DetectorError::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| DetectorError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Like [`load`](Self::load), but a broken file only costs a warning.
    pub fn load_or_default(&self) -> AppConfig {
        self.load().unwrap_or_else(|e| {
            warn!("[CONFIG] {} ({}), using defaults", e, self.config_file.display());
            AppConfig::default()
        })
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub production: bool,
    pub allow_advanced: bool,
    pub cache_dir: PathBuf,
    pub cache_dir_writable: bool,
    pub device: DevicePreference,
    pub task_timeout: Duration,
    pub classifier: ClassifierSettings,
    pub perplexity: PerplexitySettings,
}

impl DetectionSettings {
    /// Settings for this process: config file plus real environment.
    pub fn from_process_env() -> Self {
        let env = |key: &str| std::env::var(key).ok();
        let config = ConfigStore::from_env(env)
            .map(|store| store.load_or_default())
            .unwrap_or_default();
        Self::resolve(&config.detection, env)
    }

    /// Environment values win over the file.
    pub fn resolve<F>(config: &DetectionConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let production = is_production(&env);

        let allow_advanced = match env("ALLOW_ADVANCED") {
            Some(flag) => flag.trim() == "1",
            None => config.allow_advanced,
        };

        let preferred_cache = env("AI_DETECTOR_CACHE_DIR")
            .or_else(|| env("HF_HOME"))
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| config.cache_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| default_cache_dir(production));
        let (cache_dir, cache_dir_writable) = prepare_cache_dir(preferred_cache);

        let device_name = env("AI_DETECTOR_DEVICE").unwrap_or_else(|| config.device.clone());
        let device = device_name.parse().unwrap_or_else(|e| {
            warn!("[CONFIG] {}, using auto", e);
            DevicePreference::Auto
        });

        let timeout_secs = env("AI_DETECTOR_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(config.detector_timeout_secs)
            .max(1);

        let classifier = ClassifierSettings {
            model_id: env("AI_DETECTOR_CLASSIFIER_MODEL").unwrap_or_else(|| config.classifier_model.clone()),
            ..ClassifierSettings::default()
        };
        let perplexity = PerplexitySettings {
            baseline_model: env("AI_DETECTOR_BASELINE_MODEL").unwrap_or_else(|| config.baseline_model.clone()),
            comparison_model: env("AI_DETECTOR_COMPARISON_MODEL")
                .unwrap_or_else(|| config.comparison_model.clone()),
            ..PerplexitySettings::default()
        };

        info!(
            "[CONFIG] production={} allow_advanced={} cache_dir={} writable={}",
            production,
            allow_advanced,
            cache_dir.display(),
            cache_dir_writable
        );

        Self {
            production,
            allow_advanced,
            cache_dir,
            cache_dir_writable,
            device,
            task_timeout: Duration::from_secs(timeout_secs),
            classifier,
            perplexity,
        }
    }

    /// Where the hub client keeps downloaded snapshots.
    pub fn hub_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("hub")
    }
}

/// `NODE_ENV=production` or a deployment root on disk.
pub fn is_production<F>(env: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    env("NODE_ENV").map(|v| v == "production").unwrap_or(false) || Path::new(PRODUCTION_ROOT).exists()
}

fn default_cache_dir(production: bool) -> PathBuf {
    if production {
        return Path::new(PRODUCTION_ROOT).join(".cache").join("huggingface");
    }
    dirs::home_dir()
        .map(|home| home.join(".cache").join("huggingface"))
        .unwrap_or_else(fallback_cache_dir)
}

fn fallback_cache_dir() -> PathBuf {
    std::env::temp_dir().join("huggingface")
}

/// Use `preferred` when it can be created and written, else the temp fallback.
fn prepare_cache_dir(preferred: PathBuf) -> (PathBuf, bool) {
    if is_writable(&preferred) {
        return (preferred, true);
    }
    let fallback = fallback_cache_dir();
    warn!(
        "[CONFIG] Cache dir {} not writable, falling back to {}",
        preferred.display(),
        fallback.display()
    );
    let writable = is_writable(&fallback);
    (fallback, writable)
}

fn is_writable(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let marker = dir.join(format!(".write_marker_{}", std::process::id()));
    match fs::write(&marker, b"ok") {
        Ok(()) => {
            let _ = fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}
