use crate::core::extract::extractor_for;
use crate::core::load::{LoadOptions, Loader};
use crate::core::merge::Merger;
use crate::core::plan::RunPlan;
use crate::core::stage::Stager;
use crate::domain::context::RunContext;
use crate::domain::credentials::CredentialSet;
use crate::domain::model::Dataset;
use crate::domain::outcome::{LoadReport, RunFailure, RunOutcome, RunState, RunStatus};
use crate::domain::ports::{CredentialProvider, Extractor, ObjectStore, SqlExecutor};
use crate::domain::table::{RelationName, RunRequest, TableSpec};
use crate::utils::error::{ErrorKind, EtlError, FailureClass, Result};
use crate::utils::monitor::SystemMonitor;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;

/// One async mutex per staging relation. A run holds its relation's lock from
/// the staged write through the merge commit, so two runs of the same table
/// never interleave truncate/copy/merge on a shared staging relation.
#[derive(Debug, Default)]
pub struct StagingLocks {
    locks: Mutex<HashMap<RelationName, Arc<tokio::sync::Mutex<()>>>>,
}

impl StagingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, relation: &RelationName) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(relation.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// 追蹤單次執行的狀態轉換
struct RunTracker<'a> {
    table: &'a str,
    state: RunState,
    phase_started: Instant,
}

impl<'a> RunTracker<'a> {
    fn new(table: &'a str) -> Self {
        Self {
            table,
            state: RunState::Idle,
            phase_started: Instant::now(),
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(
            "{}: {} -> {} ({:?} in {})",
            self.table,
            self.state,
            next,
            self.phase_started.elapsed(),
            self.state
        );
        self.state = next;
        self.phase_started = Instant::now();
    }
}

/// Drives Extract → Stage → Load → Merge for one table at a time.
///
/// The runner never returns an error: every failure ends up in the
/// `RunOutcome` with its kind and whether it is retryable. It does not retry
/// and does not clean up beyond what the merge transaction already rolls back.
pub struct PipelineRunner<S: ObjectStore, X: SqlExecutor> {
    stager: Stager<S>,
    loader: Loader<S, X>,
    merger: Merger<X>,
    credentials: Arc<dyn CredentialProvider>,
    locks: Arc<StagingLocks>,
    client: Client,
    concurrency: usize,
    monitor: SystemMonitor,
}

impl<S: ObjectStore, X: SqlExecutor> PipelineRunner<S, X> {
    pub fn new(
        store: Arc<S>,
        executor: Arc<X>,
        credentials: Arc<dyn CredentialProvider>,
        options: LoadOptions,
    ) -> Self {
        Self {
            stager: Stager::new(store.clone()),
            loader: Loader::new(store, executor.clone(), options),
            merger: Merger::new(executor),
            credentials,
            locks: Arc::new(StagingLocks::new()),
            client: Client::new(),
            concurrency: 5,
            monitor: SystemMonitor::new(false),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Upper bound on in-flight HTTP lookups of one extractor.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Share staging locks with other runners in the same process.
    pub fn with_locks(mut self, locks: Arc<StagingLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_monitor(mut self, monitor: SystemMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn locks(&self) -> Arc<StagingLocks> {
        self.locks.clone()
    }

    /// Runs one table with the extractor its source declares.
    pub async fn run(&self, table: &TableSpec, context: &mut RunContext) -> RunOutcome {
        match extractor_for(table, &self.client, self.concurrency) {
            Ok(extractor) => self.run_with(table, extractor.as_ref(), context).await,
            Err(e) => {
                let started_at = Utc::now();
                log_failure(&table.name, RunState::Extracting, &e);
                failed_outcome(table, started_at, 0, RunState::Extracting, &e)
            }
        }
    }

    pub async fn run_with(
        &self,
        table: &TableSpec,
        extractor: &dyn Extractor,
        context: &mut RunContext,
    ) -> RunOutcome {
        let started_at = Utc::now();
        let mut tracker = RunTracker::new(&table.name);
        tracing::info!("🚀 Running {} from {}", table.name, extractor.source_name());

        tracker.advance(RunState::Extracting);
        let dataset = match extractor.extract(context).await {
            Ok(dataset) => dataset,
            Err(e) => {
                tracker.advance(RunState::Failed);
                log_failure(&table.name, RunState::Extracting, &e);
                return failed_outcome(table, started_at, 0, RunState::Extracting, &e);
            }
        };
        self.monitor.log_stats(&format!("{} extract", table.name));

        if dataset.is_empty() {
            tracker.advance(RunState::Idle);
            tracing::info!("⏭️ No rows extracted for {}, skipping", table.name);
            context.add_dataset(dataset);
            let outcome = RunOutcome {
                table: table.name.clone(),
                rows_processed: 0,
                started_at,
                completed_at: Utc::now(),
                status: RunStatus::Skipped,
                load: None,
                merged_rows: None,
                error: None,
            };
            tracing::info!("{}", outcome.summary());
            return outcome;
        }

        let (dataset, dropped) = dataset.dedup_last_wins();
        if dropped > 0 {
            tracing::warn!(
                "⚠️ {} rows of {} shared a merge key with a later row and were dropped",
                dropped,
                table.name
            );
        }
        tracing::debug!("Sample of {}:\n{}", table.name, dataset.sample(5));
        let rows = dataset.len();

        let result = self
            .commit(&mut tracker, table, &dataset, &context.credentials)
            .await;
        context.add_dataset(dataset);

        let outcome = match result {
            Ok((load, merged)) => RunOutcome {
                table: table.name.clone(),
                rows_processed: rows,
                started_at,
                completed_at: Utc::now(),
                status: RunStatus::Committed,
                load: Some(load),
                merged_rows: Some(merged),
                error: None,
            },
            Err(e) => {
                let stage = tracker.state;
                tracker.advance(RunState::Failed);
                log_failure(&table.name, stage, &e);
                failed_outcome(table, started_at, rows, stage, &e)
            }
        };
        tracing::info!("{}", outcome.summary());
        outcome
    }

    async fn commit(
        &self,
        tracker: &mut RunTracker<'_>,
        table: &TableSpec,
        dataset: &Dataset,
        credentials: &CredentialSet,
    ) -> Result<(LoadReport, u64)> {
        let _guard = self.locks.acquire(&table.staging).await;

        tracker.advance(RunState::Staging);
        let location = table.object_location(&credentials.storage());
        let staged = self.stager.stage(dataset, &location).await?;
        self.monitor.log_stats(&format!("{} stage", table.name));

        tracker.advance(RunState::Loading);
        let report = self
            .loader
            .load(&staged, &table.staging, &credentials.redshift_iam_role)
            .await?;
        self.monitor.log_stats(&format!("{} load", table.name));

        tracker.advance(RunState::Merging);
        let merged = self
            .merger
            .merge(&table.staging, &table.target, &table.merge_key)
            .await?;
        tracker.advance(RunState::Committed);
        self.monitor.log_stats(&format!("{} merge", table.name));

        tracing::info!("✅ {} committed ({} rows)", table.name, merged);
        Ok((report, merged))
    }

    /// Runs the tables of one request in order, sharing one context. The
    /// first table that is skipped or fails stops the rest of the group.
    pub async fn run_request(&self, request: &RunRequest, tables: &[&TableSpec]) -> RequestReport {
        let run_id = format!("{}-{}", request.name, Utc::now().format("%Y%m%d%H%M%S"));
        tracing::info!("📋 Starting run {} ({} tables)", request.name, tables.len());

        let credentials = match self.credentials.credentials().await {
            Ok(creds) => Arc::new(creds),
            Err(e) => {
                tracing::error!("❌ Could not resolve credentials for {}: {}", request.name, e);
                tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
                let outcomes = tables
                    .first()
                    .map(|t| vec![failed_outcome(t, Utc::now(), 0, RunState::Idle, &e)])
                    .unwrap_or_default();
                return RequestReport {
                    name: request.name.clone(),
                    status: RequestStatus::Failed,
                    outcomes,
                    blocked_by: None,
                };
            }
        };

        let mut context = RunContext::new(run_id, credentials);
        let mut outcomes = Vec::with_capacity(tables.len());
        for table in tables {
            let outcome = self.run(table, &mut context).await;
            let stop = outcome.status != RunStatus::Committed;
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        if outcomes.len() < tables.len() {
            let remaining: Vec<&str> = tables[outcomes.len()..].iter().map(|t| t.name.as_str()).collect();
            tracing::info!("⏹️ Run {} stopped early, not run: {}", request.name, remaining.join(", "));
        }

        let status = if outcomes.iter().any(|o| o.is_failed()) {
            RequestStatus::Failed
        } else {
            RequestStatus::Completed
        };
        self.monitor.log_final_stats();
        RequestReport {
            name: request.name.clone(),
            status,
            outcomes,
            blocked_by: None,
        }
    }

    /// Runs every request of the plan (or only `selected`) in dependency
    /// order. Once a request fails, the requests after it are reported as not
    /// started.
    pub async fn run_schedule(&self, plan: &RunPlan, selected: Option<&[String]>) -> ScheduleReport {
        let wanted: Option<HashSet<&str>> = selected.map(|names| names.iter().map(|n| n.as_str()).collect());
        let mut reports = Vec::new();
        let mut failed: Option<String> = None;

        for request in plan.ordered() {
            if let Some(wanted) = &wanted {
                if !wanted.contains(request.name.as_str()) {
                    continue;
                }
            }
            if let Some(blocker) = &failed {
                tracing::warn!("⏸️ Run {} not started, {} failed", request.name, blocker);
                reports.push(RequestReport {
                    name: request.name.clone(),
                    status: RequestStatus::NotStarted,
                    outcomes: Vec::new(),
                    blocked_by: Some(blocker.clone()),
                });
                continue;
            }

            let report = self.run_request(request, &plan.tables_for(request)).await;
            if report.status == RequestStatus::Failed {
                failed = Some(report.name.clone());
            }
            reports.push(report);
        }

        ScheduleReport { requests: reports }
    }
}

fn log_failure(table: &str, stage: RunState, err: &EtlError) {
    tracing::error!(
        "❌ {} failed while {}: {} (kind: {}, class: {})",
        table,
        stage,
        err,
        err.kind(),
        err.class()
    );
    tracing::error!("💡 Suggestion: {}", err.recovery_suggestion());
}

fn failed_outcome(
    table: &TableSpec,
    started_at: chrono::DateTime<Utc>,
    rows: usize,
    stage: RunState,
    err: &EtlError,
) -> RunOutcome {
    RunOutcome {
        table: table.name.clone(),
        rows_processed: rows,
        started_at,
        completed_at: Utc::now(),
        status: RunStatus::Failed,
        load: None,
        merged_rows: None,
        error: Some(RunFailure::from_error(stage, err)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Completed,
    Failed,
    NotStarted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub name: String,
    pub status: RequestStatus,
    pub outcomes: Vec<RunOutcome>,
    /// Set for requests that were not started because an earlier one failed.
    pub blocked_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReport {
    pub requests: Vec<RequestReport>,
}

impl ScheduleReport {
    pub fn outcomes(&self) -> impl Iterator<Item = &RunOutcome> {
        self.requests.iter().flat_map(|r| r.outcomes.iter())
    }

    pub fn has_failures(&self) -> bool {
        self.requests.iter().any(|r| r.status != RequestStatus::Completed)
    }

    /// 0 ok or skipped, 78 configuration error, 1 fatal, 75 transient.
    pub fn exit_code(&self) -> i32 {
        let failures: Vec<&RunFailure> = self.outcomes().filter_map(|o| o.error.as_ref()).collect();
        if failures.iter().any(|f| f.kind == ErrorKind::Config) {
            78
        } else if failures.iter().any(|f| f.class == FailureClass::Fatal) {
            1
        } else if !failures.is_empty() {
            75
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryObjectStore, MemoryWarehouse};
    use crate::core::sql::StatementKind;
    use crate::core::testing;
    use crate::domain::model::{Column, ColumnType, Record};
    use crate::domain::table::{ObjectLocation, SourceSpec};
    use crate::utils::error::BackendError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedCredentials;

    #[async_trait::async_trait]
    impl CredentialProvider for FixedCredentials {
        async fn credentials(&self) -> Result<CredentialSet> {
            Ok(testing::credentials())
        }
    }

    struct MissingCredentials;

    #[async_trait::async_trait]
    impl CredentialProvider for MissingCredentials {
        async fn credentials(&self) -> Result<CredentialSet> {
            Err(EtlError::MissingConfigError {
                field: "credentials.db".into(),
            })
        }
    }

    /// Returns a fixed dataset, or an error, and counts calls.
    struct FixedExtractor {
        rows: Vec<Record>,
        fail: Option<FailureClass>,
        calls: AtomicUsize,
    }

    impl FixedExtractor {
        fn rows(rows: Vec<Record>) -> Self {
            Self {
                rows,
                fail: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(class: FailureClass) -> Self {
            Self {
                rows: Vec::new(),
                fail: Some(class),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Extractor for FixedExtractor {
        async fn extract(&self, _context: &RunContext) -> Result<Dataset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail {
                Some(FailureClass::Transient) => Err(EtlError::ExtractionError {
                    source_name: "fixed".into(),
                    message: "upstream timed out".into(),
                    class: FailureClass::Transient,
                }),
                Some(FailureClass::Fatal) => Err(EtlError::extraction("fixed", "unparseable payload")),
                None => Dataset::new("sales_order", columns(), vec!["order_id".into()], self.rows.clone()),
            }
        }

        fn source_name(&self) -> &str {
            "fixed"
        }
    }

    fn columns() -> Vec<Column> {
        vec![
            Column::new("order_id", ColumnType::Integer),
            Column::new("price", ColumnType::Float),
        ]
    }

    fn order(id: i64, price: f64) -> Record {
        Record::from([("order_id", json!(id)), ("price", json!(price))])
    }

    fn table() -> TableSpec {
        TableSpec {
            name: "sales_order".into(),
            target: "aiq_data.sales_order".parse().unwrap(),
            staging: "aiq_data_staging.sales_order".parse().unwrap(),
            merge_key: vec!["order_id".into()],
            columns: columns(),
            object_file: "data/sales_data.csv".into(),
            source: SourceSpec::File {
                path: "sales_data.csv".into(),
                delimiter: None,
                window: None,
            },
        }
    }

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        warehouse: Arc<MemoryWarehouse>,
        runner: PipelineRunner<MemoryObjectStore, MemoryWarehouse>,
        table: TableSpec,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new(store.clone()));
        let table = table();
        warehouse.create_table(&table.staging, columns());
        warehouse.create_table(&table.target, columns());
        let options = LoadOptions {
            readiness_delay: Duration::from_millis(1),
            ..LoadOptions::default()
        };
        let runner = PipelineRunner::new(store.clone(), warehouse.clone(), Arc::new(FixedCredentials), options);
        Fixture {
            store,
            warehouse,
            runner,
            table,
        }
    }

    fn context() -> RunContext {
        RunContext::new("test", Arc::new(testing::credentials()))
    }

    #[tokio::test]
    async fn test_empty_extraction_is_skipped_without_io() {
        let f = fixture();
        f.warehouse.insert_rows(&f.table.target, vec![vec![json!(1), json!(9.5)]]);

        let outcome = f
            .runner
            .run_with(&f.table, &FixedExtractor::rows(vec![]), &mut context())
            .await;

        assert_eq!(outcome.status, RunStatus::Skipped);
        assert_eq!(outcome.rows_processed, 0);
        assert!(outcome.error.is_none());
        assert_eq!(f.store.put_count(), 0);
        assert!(f.warehouse.executed().is_empty());
        assert_eq!(f.warehouse.rows(&f.table.target), vec![vec![json!(1), json!(9.5)]]);
    }

    #[tokio::test]
    async fn test_committed_run_upserts_target() {
        let f = fixture();
        f.warehouse.insert_rows(
            &f.table.target,
            vec![vec![json!(1), json!(9.5)], vec![json!(3), json!(30.0)]],
        );

        let extractor = FixedExtractor::rows(vec![order(1, 10.5), order(2, 20.0)]);
        let outcome = f.runner.run_with(&f.table, &extractor, &mut context()).await;

        assert_eq!(outcome.status, RunStatus::Committed);
        assert_eq!(outcome.rows_processed, 2);
        assert_eq!(outcome.load, Some(LoadReport { rows_loaded: 2, rows_rejected: 0 }));
        assert_eq!(outcome.merged_rows, Some(2));

        let mut rows = f.warehouse.rows(&f.table.target);
        rows.sort_by_key(|r| r[0].as_i64());
        assert_eq!(
            rows,
            vec![
                vec![json!(1), json!(10.5)],
                vec![json!(2), json!(20.0)],
                vec![json!(3), json!(30.0)],
            ]
        );

        let staged = f
            .store
            .object(&ObjectLocation::new("aiq-landing", "data/sales_data.csv"))
            .unwrap();
        assert_eq!(String::from_utf8(staged).unwrap(), "order_id,price\n1,10.5\n2,20.0\n");
    }

    #[tokio::test]
    async fn test_duplicate_extracted_keys_keep_last_row() {
        let f = fixture();
        let extractor = FixedExtractor::rows(vec![order(1, 1.0), order(2, 2.0), order(1, 3.0)]);
        let outcome = f.runner.run_with(&f.table, &extractor, &mut context()).await;

        assert!(outcome.is_committed());
        assert_eq!(outcome.rows_processed, 2);
        let mut rows = f.warehouse.rows(&f.table.target);
        rows.sort_by_key(|r| r[0].as_i64());
        assert_eq!(rows, vec![vec![json!(1), json!(3.0)], vec![json!(2), json!(2.0)]]);
    }

    #[tokio::test]
    async fn test_merge_failure_leaves_target_unchanged() {
        let f = fixture();
        let before = vec![vec![json!(1), json!(9.5)]];
        f.warehouse.insert_rows(&f.table.target, before.clone());
        f.warehouse
            .fail_on(StatementKind::Insert, BackendError::from_sqlstate("40P01", "deadlock detected"));

        let outcome = f
            .runner
            .run_with(&f.table, &FixedExtractor::rows(vec![order(1, 10.5)]), &mut context())
            .await;

        assert_eq!(outcome.status, RunStatus::Failed);
        let failure = outcome.error.as_ref().unwrap();
        assert_eq!(failure.stage, RunState::Merging);
        assert_eq!(failure.kind, ErrorKind::Merge);
        assert!(outcome.is_retryable());
        assert_eq!(f.warehouse.rows(&f.table.target), before);
    }

    #[tokio::test]
    async fn test_failure_kind_and_class_are_reported() {
        let f = fixture();

        let transient = f
            .runner
            .run_with(&f.table, &FixedExtractor::failing(FailureClass::Transient), &mut context())
            .await;
        assert_eq!(transient.error_kind(), Some(ErrorKind::Extraction));
        assert!(transient.is_retryable());

        let fatal = f
            .runner
            .run_with(&f.table, &FixedExtractor::failing(FailureClass::Fatal), &mut context())
            .await;
        assert_eq!(fatal.error_kind(), Some(ErrorKind::Extraction));
        assert!(!fatal.is_retryable());

        f.store.fail_next_put(BackendError::transient("503 Slow Down"));
        let staging = f
            .runner
            .run_with(&f.table, &FixedExtractor::rows(vec![order(1, 1.0)]), &mut context())
            .await;
        assert_eq!(staging.error_kind(), Some(ErrorKind::Staging));
        assert_eq!(staging.error.as_ref().unwrap().stage, RunState::Staging);
        assert!(f.warehouse.executed().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_interleave_on_staging() {
        let f = fixture();
        let first = FixedExtractor::rows(vec![order(1, 1.0), order(2, 2.0)]);
        let second = FixedExtractor::rows(vec![order(2, 20.0), order(3, 30.0)]);
        let mut ctx_a = context();
        let mut ctx_b = context();

        let (a, b) = tokio::join!(
            f.runner.run_with(&f.table, &first, &mut ctx_a),
            f.runner.run_with(&f.table, &second, &mut ctx_b)
        );
        assert!(a.is_committed());
        assert!(b.is_committed());

        let kinds: Vec<String> = f
            .warehouse
            .executed()
            .iter()
            .map(|sql| sql.split_whitespace().next().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec!["truncate", "copy", "delete", "insert", "truncate", "copy", "delete", "insert"]
        );
        assert_eq!(f.warehouse.row_count(&f.table.target), 3);
    }

    #[tokio::test]
    async fn test_runners_sharing_locks_serialize_commits() {
        let f = fixture();
        let other = PipelineRunner::new(
            f.store.clone(),
            f.warehouse.clone(),
            Arc::new(FixedCredentials),
            LoadOptions::default(),
        )
        .with_locks(f.runner.locks());
        let first = FixedExtractor::rows(vec![order(1, 1.0)]);
        let second = FixedExtractor::rows(vec![order(1, 5.0), order(4, 4.0)]);
        let mut ctx_a = context();
        let mut ctx_b = context();

        let (a, b) = tokio::join!(
            f.runner.run_with(&f.table, &first, &mut ctx_a),
            other.run_with(&f.table, &second, &mut ctx_b)
        );
        assert!(a.is_committed() && b.is_committed());
        assert_eq!(f.warehouse.executed().len(), 8);
        assert_eq!(f.warehouse.row_count(&f.table.target), 2);
        assert!(Arc::ptr_eq(&f.runner.locks(), &other.locks()));
    }

    fn plan_with_two_requests() -> RunPlan {
        let mut other = table();
        other.name = "sales_order_copy".into();
        RunPlan::new(
            vec![table(), other],
            vec![
                RunRequest {
                    name: "second".into(),
                    tables: vec!["sales_order_copy".into()],
                    after: vec!["first".into()],
                },
                RunRequest {
                    name: "first".into(),
                    tables: vec!["sales_order".into()],
                    after: vec![],
                },
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_request_blocks_later_requests() {
        let store = Arc::new(MemoryObjectStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new(store.clone()));
        let runner = PipelineRunner::new(store, warehouse, Arc::new(FixedCredentials), LoadOptions::default());

        // 檔案不存在，第一個 request 就會失敗
        let report = runner.run_schedule(&plan_with_two_requests(), None).await;

        assert_eq!(report.requests.len(), 2);
        assert_eq!(report.requests[0].name, "first");
        assert_eq!(report.requests[0].status, RequestStatus::Failed);
        assert_eq!(report.requests[1].status, RequestStatus::NotStarted);
        assert_eq!(report.requests[1].blocked_by.as_deref(), Some("first"));
        assert!(report.has_failures());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_credential_failure_is_config_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new(store.clone()));
        let runner = PipelineRunner::new(store, warehouse, Arc::new(MissingCredentials), LoadOptions::default());

        let plan = plan_with_two_requests();
        let selected = vec!["first".to_string()];
        let report = runner.run_schedule(&plan, Some(&selected)).await;

        assert_eq!(report.requests.len(), 1);
        assert_eq!(report.requests[0].outcomes[0].error_kind(), Some(ErrorKind::Config));
        assert_eq!(report.exit_code(), 78);
    }

    #[test]
    fn test_exit_code_for_transient_failures() {
        let failure = RunFailure {
            stage: RunState::Loading,
            kind: ErrorKind::Load,
            class: FailureClass::Transient,
            message: "connection reset".into(),
        };
        let outcome = RunOutcome {
            table: "sales_order".into(),
            rows_processed: 1,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            status: RunStatus::Failed,
            load: None,
            merged_rows: None,
            error: Some(failure),
        };
        let report = ScheduleReport {
            requests: vec![RequestReport {
                name: "sales_order".into(),
                status: RequestStatus::Failed,
                outcomes: vec![outcome],
                blocked_by: None,
            }],
        };
        assert_eq!(report.exit_code(), 75);
        assert_eq!(ScheduleReport { requests: vec![] }.exit_code(), 0);
    }
}
