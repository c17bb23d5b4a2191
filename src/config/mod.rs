#[cfg(feature = "cli")]
pub mod cli;
pub mod credentials;
pub mod pipeline_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use credentials::{EnvCredentialProvider, FileCredentialProvider, StaticCredentials};
pub use pipeline_config::{LoadSection, PipelineFile, PipelineSection};
