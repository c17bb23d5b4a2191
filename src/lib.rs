pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{EnvCredentialProvider, FileCredentialProvider, PipelineFile, StaticCredentials};

pub use core::{MergeScript, PipelineRunner, RunPlan, ScheduleReport};
pub use domain::outcome::{RunOutcome, RunStatus};
pub use domain::table::TableSpec;
pub use utils::error::{EtlError, Result};
