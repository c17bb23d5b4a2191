use crate::utils::error::{ErrorKind, EtlError, FailureClass};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// PipelineRunner 的狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Extracting,
    Staging,
    Loading,
    Merging,
    Committed,
    Failed,
}

impl RunState {
    /// Legal transitions of a single run. `Extracting -> Idle` is the empty
    /// short-circuit.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Extracting)
                | (Extracting, Idle)
                | (Extracting, Staging)
                | (Staging, Loading)
                | (Loading, Merging)
                | (Merging, Committed)
                | (Extracting | Staging | Loading | Merging, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Committed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Extracting => "extracting",
            RunState::Staging => "staging",
            RunState::Loading => "loading",
            RunState::Merging => "merging",
            RunState::Committed => "committed",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Skipped,
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    /// Stage that was active when the run failed.
    pub stage: RunState,
    pub kind: ErrorKind,
    pub class: FailureClass,
    pub message: String,
}

impl RunFailure {
    pub fn from_error(stage: RunState, err: &EtlError) -> Self {
        Self {
            stage,
            kind: err.kind(),
            class: err.class(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub rows_loaded: u64,
    pub rows_rejected: u64,
}

/// 單次 pipeline 執行的結果
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub table: String,
    pub rows_processed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub load: Option<LoadReport>,
    pub merged_rows: Option<u64>,
    pub error: Option<RunFailure>,
}

impl RunOutcome {
    pub fn is_committed(&self) -> bool {
        self.status == RunStatus::Committed
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// True only for failures the scheduler may retry.
    pub fn is_retryable(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.class == FailureClass::Transient)
            .unwrap_or(false)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// `Started: …, Rows: …, Completed: …`
    pub fn summary(&self) -> String {
        format!(
            "Started: {}, Rows: {} , Completed: {}",
            self.started_at, self.rows_processed, self.completed_at
        )
    }
}
