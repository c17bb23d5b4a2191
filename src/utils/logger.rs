use crate::utils::error::{EtlError, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    /// JSON lines instead of the compact console format
    pub json: bool,
    /// Additionally write plain-text logs to this file
    pub file: Option<PathBuf>,
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "staged_etl=debug,info"
    } else {
        "staged_etl=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// `{dir}/{run_name}.log.{timestamp}`
pub fn log_file_path(dir: &Path, run_name: &str, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}.log.{}", run_name, now.format("%Y%m%d%H%M%S")))
}

pub fn init_logger(options: &LogOptions) -> Result<()> {
    let file = match &options.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Some(Arc::new(File::create(path)?))
        }
        None => None,
    };

    let compact = (!options.json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });
    // 給排程器收集用
    let json = options.json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .json()
    });
    let file_layer = file.map(|writer| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(env_filter(options.verbose))
        .with(compact)
        .with(json)
        .with(file_layer)
        .try_init()
        .map_err(|e| EtlError::config(format!("logger already initialised: {}", e)))
}
