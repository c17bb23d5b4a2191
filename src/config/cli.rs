use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_path, Validate};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "staged-etl")]
#[command(about = "Extract, stage, bulk-load and merge tables into the warehouse")]
pub struct CliConfig {
    /// Pipeline definition (TOML)
    #[arg(long, short, default_value = "configs/aiq.toml")]
    pub config: PathBuf,

    /// JSON credential file; `ETL_*` environment variables are used when absent
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Run request to execute (repeatable)
    #[arg(long = "run", value_name = "NAME")]
    pub runs: Vec<String>,

    /// Execute every run request in dependency order
    #[arg(long, conflicts_with = "runs")]
    pub all: bool,

    /// Print the SQL each table would execute and exit
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log as JSON lines")]
    pub json_logs: bool,

    /// Also write a log file per invocation into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,

    /// Stage into this directory instead of S3
    #[arg(long)]
    pub local_storage: Option<PathBuf>,

    /// S3-compatible endpoint (MinIO, LocalStack)
    #[arg(long)]
    pub s3_endpoint: Option<String>,
}

impl CliConfig {
    /// `None` means every run.
    pub fn selected_runs(&self) -> Option<&[String]> {
        if self.all {
            None
        } else {
            Some(&self.runs)
        }
    }

    /// Name used for the log file: the single selected run, else `pipeline`.
    pub fn log_name<'a>(&'a self, pipeline: &'a str) -> &'a str {
        match self.runs.as_slice() {
            [only] if !self.all => only.as_str(),
            _ => pipeline,
        }
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("config", &self.config.to_string_lossy())?;
        if !self.all && self.runs.is_empty() {
            return Err(EtlError::MissingConfigError {
                field: "--run NAME or --all".to_string(),
            });
        }
        if let Some(dir) = &self.log_dir {
            validate_path("log_dir", &dir.to_string_lossy())?;
        }
        if let Some(endpoint) = &self.s3_endpoint {
            crate::utils::validation::validate_url("s3_endpoint", endpoint)?;
        }
        Ok(())
    }
}
