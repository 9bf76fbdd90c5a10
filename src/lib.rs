pub mod models;
pub mod services;

use models::{DetectionPayload, InputErrorPayload};
use services::config_store::{is_production, DetectionSettings};
use services::detection::TextAnalyzer;
use services::error::DetectorError;

use serde::Serialize;
use std::fs;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

const LOG_FILE_PREFIX: &str = "ai-detector_";
const LOG_FILES_KEPT: usize = 30;

/// Initialize logging. Stdout carries the JSON result, so every layer writes elsewhere.
pub fn init_logging() {
    let env = |key: &str| std::env::var(key).ok();
    let default_level = if is_production(env) { "warn" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let logs_dir = match std::env::var("AI_DETECTOR_LOG_DIR") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => {
            init_console_only_logging(env_filter);
            return;
        }
    };

    if let Err(e) = fs::create_dir_all(&logs_dir) {
        init_console_only_logging(env_filter);
        error!("Failed to create logs directory {}: {}", logs_dir.display(), e);
        return;
    }

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let log_filename = format!("{}{}_{}.log", LOG_FILE_PREFIX, timestamp, std::process::id());

    let file_appender = rolling::never(&logs_dir, &log_filename);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    if let Ok(mut slot) = LOG_GUARD.lock() {
        if slot.is_none() {
            *slot = Some(file_guard);
        }
    }

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    info!("Log file: {}/{}", logs_dir.display(), log_filename);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Best-effort cleanup off the request path
    std::thread::spawn(move || {
        cleanup_old_logs(&logs_dir, LOG_FILES_KEPT);
    });
}

/// Flush the file layer. Call before `process::exit`, which skips destructors.
pub fn flush_logs() {
    if let Ok(mut slot) = LOG_GUARD.lock() {
        slot.take();
    }
}

fn init_console_only_logging(env_filter: EnvFilter) {
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}

fn cleanup_old_logs(logs_dir: &Path, keep: usize) {
    let mut entries: Vec<_> = match fs::read_dir(logs_dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).collect(),
        Err(_) => return,
    };

    entries.retain(|e| {
        let name = e.file_name().to_string_lossy().to_string();
        name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log")
    });

    if entries.len() <= keep {
        return;
    }

    entries.sort_by_key(|e| {
        e.metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    let remove_count = entries.len().saturating_sub(keep);
    for entry in entries.into_iter().take(remove_count) {
        let _ = fs::remove_file(entry.path());
    }
}

/// Where the text to analyze comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    Argument(String),
}

impl InputSource {
    /// `--stdin` (or no argument) reads stdin; anything else is the text itself.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        if args.is_empty() || args.iter().any(|a| a == "--stdin") {
            return InputSource::Stdin;
        }
        InputSource::Argument(args.join(" "))
    }

    pub fn read(self) -> Result<String, DetectorError> {
        match self {
            InputSource::Argument(text) => Ok(text),
            InputSource::Stdin => read_utf8(std::io::stdin().lock()),
        }
    }
}

/// Drain a reader, rejecting anything that is not UTF-8.
pub fn read_utf8<R: Read>(mut reader: R) -> Result<String, DetectorError> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    String::from_utf8(buf).map_err(|e| DetectorError::Io(format!("Input is not valid UTF-8: {}", e)))
}

/// Serialize one payload as a single line. Falls back to a minimal error object.
pub fn to_json_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        error!("Failed to serialize result: {}", e);
        r#"{"error":"serialization failed","ai_likelihood":50,"confidence":0.3,"indicators":["Input error"]}"#
            .to_string()
    })
}

/// Drive `future` on a fresh runtime, then drop the runtime without joining blocking work.
///
/// A detector past its deadline may still be stuck in a model call; the answer
/// is already decided by then and the process must not wait on that thread.
pub fn run_detached<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

/// Full pipeline over the current process configuration.
pub async fn analyze_text(text: &str) -> DetectionPayload {
    let settings = DetectionSettings::from_process_env();
    let (analyzer, _cache) = TextAnalyzer::from_settings(&settings);
    analyzer.analyze(text).await
}

/// Main CLI: returns the JSON line to print and the process exit code.
pub async fn run_cli<I>(args: I) -> (String, i32)
where
    I: IntoIterator<Item = String>,
{
    let start = Instant::now();
    let text = match InputSource::from_args(args).read() {
        Ok(text) => text,
        Err(e) => {
            error!("[ANALYZER] {}", e);
            return (to_json_line(&InputErrorPayload::new(e.to_string())), 1);
        }
    };

    let payload = analyze_text(&text).await;
    info!(
        "[ANALYZER] Done: {:.1}% via {} in {}ms",
        payload.ai_likelihood,
        payload.model,
        start.elapsed().as_millis()
    );
    (to_json_line(&payload), 0)
}
