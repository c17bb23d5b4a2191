pub mod extract;
pub mod load;
pub mod merge;
pub mod plan;
pub mod runner;
pub mod sql;
pub mod stage;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::domain::model::{Dataset, Record};
pub use crate::domain::ports::{CredentialProvider, Extractor, ObjectStore, SqlExecutor};
pub use crate::utils::error::Result;
pub use load::{LoadOptions, Loader, RejectPolicy};
pub use merge::Merger;
pub use plan::RunPlan;
pub use runner::{PipelineRunner, RequestReport, RequestStatus, ScheduleReport, StagingLocks};
pub use sql::{MergeScript, Query, Statement};
pub use stage::Stager;
