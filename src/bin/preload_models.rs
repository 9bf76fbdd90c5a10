use ai_detector_lib::services::config_store::DetectionSettings;
use ai_detector_lib::services::detection::analyzer::{build_model_cache, known_model_keys};
use anyhow::{bail, Context, Result};
use std::time::Instant;
use tracing::{error, info};

fn main() -> Result<()> {
    ai_detector_lib::init_logging();
    let result = preload();
    if let Err(e) = &result {
        error!("[MODEL_CACHE] Preload failed: {:#}", e);
    }
    ai_detector_lib::flush_logs();
    result
}

fn preload() -> Result<()> {
    let start = Instant::now();

    let settings = DetectionSettings::from_process_env();
    let keys = known_model_keys(&settings);
    info!(
        "[MODEL_CACHE] Preloading {} models into {}",
        keys.len(),
        settings.hub_cache_dir().display()
    );

    let cache = build_model_cache(&settings);
    let report = cache.preload(&keys);
    let summary = serde_json::to_string_pretty(&report).context("failed to serialize preload report")?;
    eprintln!("{}", summary);

    if !report.is_success() {
        for (key, reason) in &report.failed {
            error!("[MODEL_CACHE] {} failed: {}", key, reason);
        }
        bail!("{} of {} models failed to load", report.failed.len(), keys.len());
    }

    info!(
        "[MODEL_CACHE] All {} models ready in {}ms",
        report.loaded.len(),
        start.elapsed().as_millis()
    );
    Ok(())
}
