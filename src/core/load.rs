use crate::core::sql::{load_statements, Query};
use crate::domain::outcome::LoadReport;
use crate::domain::ports::{ObjectStore, SqlExecutor};
use crate::domain::table::{RelationName, StagedRef};
use crate::utils::error::{BackendError, EtlError, Result};
use std::sync::Arc;
use std::time::Duration;

/// How many non-conforming rows a bulk copy may skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectPolicy {
    /// Any rejected row fails the load.
    Strict,
    /// Up to N rows may be skipped; the count is reported.
    MaxRejected(u32),
}

impl RejectPolicy {
    pub fn max_rejected(&self) -> Option<u32> {
        match self {
            RejectPolicy::Strict => None,
            RejectPolicy::MaxRejected(n) => Some(*n),
        }
    }

    pub fn allows(&self, rejected: u64) -> bool {
        rejected <= u64::from(self.max_rejected().unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub policy: RejectPolicy,
    pub readiness_attempts: u32,
    pub readiness_delay: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            policy: RejectPolicy::Strict,
            readiness_attempts: 3,
            readiness_delay: Duration::from_millis(200),
        }
    }
}

/// Truncates the staging relation and bulk-copies a staged object into it.
pub struct Loader<S: ObjectStore, X: SqlExecutor> {
    store: Arc<S>,
    executor: Arc<X>,
    options: LoadOptions,
}

impl<S: ObjectStore, X: SqlExecutor> Loader<S, X> {
    pub fn new(store: Arc<S>, executor: Arc<X>, options: LoadOptions) -> Self {
        Self {
            store,
            executor,
            options,
        }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub async fn load(
        &self,
        staged: &StagedRef,
        staging: &RelationName,
        iam_role: &str,
    ) -> Result<LoadReport> {
        self.wait_until_ready(staged, staging).await?;

        let statements = load_statements(
            staging,
            &staged.location,
            iam_role,
            self.options.policy.max_rejected(),
        );
        for stmt in &statements {
            tracing::debug!("SQL: {}", stmt);
        }
        self.executor
            .execute_transaction(&statements)
            .await
            .map_err(|e| EtlError::load(staging.to_string(), e))?;

        let loaded = self
            .executor
            .query_scalar(&Query::RowCount {
                relation: staging.clone(),
            })
            .await
            .map_err(|e| EtlError::load(staging.to_string(), e))?;
        let loaded = u64::try_from(loaded).unwrap_or(0);
        let expected = staged.row_count as u64;

        if loaded > expected {
            return Err(EtlError::load(
                staging.to_string(),
                BackendError::fatal(format!(
                    "staging relation holds {} rows but only {} were staged",
                    loaded, expected
                )),
            ));
        }

        let rejected = expected - loaded;
        if !self.options.policy.allows(rejected) {
            return Err(EtlError::load(
                staging.to_string(),
                BackendError::fatal(format!(
                    "{} of {} rows rejected, policy {:?} exceeded",
                    rejected, expected, self.options.policy
                )),
            ));
        }
        if rejected > 0 {
            tracing::warn!("⚠️ {} rows rejected while loading {}", rejected, staging);
        }

        tracing::info!("📥 Loaded {} rows into {}", loaded, staging);
        Ok(LoadReport {
            rows_loaded: loaded,
            rows_rejected: rejected,
        })
    }

    /// The staged object must be visible with the acknowledged size before
    /// COPY reads it.
    async fn wait_until_ready(&self, staged: &StagedRef, staging: &RelationName) -> Result<()> {
        let attempts = self.options.readiness_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.head_object(&staged.location).await {
                Ok(Some(size)) if size == staged.size => return Ok(()),
                Ok(seen) => tracing::debug!(
                    "Staged object {} not ready (attempt {}/{}, seen {:?})",
                    staged.location,
                    attempt,
                    attempts,
                    seen
                ),
                Err(e) => return Err(EtlError::load(staging.to_string(), e)),
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.readiness_delay).await;
            }
        }
        Err(EtlError::load(
            staging.to_string(),
            BackendError::transient(format!(
                "staged object {} not visible after {} checks",
                staged.location, attempts
            )),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryObjectStore, MemoryWarehouse};
    use crate::core::sql::StatementKind;
    use crate::domain::model::{Column, ColumnType};
    use crate::domain::table::ObjectLocation;
    use crate::utils::error::{ErrorKind, FailureClass};

    fn columns() -> Vec<Column> {
        vec![
            Column::new("order_id", ColumnType::Integer),
            Column::new("price", ColumnType::Float),
        ]
    }

    async fn setup(body: &str, rows: usize) -> (Arc<MemoryObjectStore>, Arc<MemoryWarehouse>, StagedRef, RelationName) {
        let store = Arc::new(MemoryObjectStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new(store.clone()));
        let staging: RelationName = "aiq_data_staging.sales_order".parse().unwrap();
        warehouse.create_table(&staging, columns());

        let location = ObjectLocation::new("aiq-landing", "data/sales_data.csv");
        let ack = store.put_object(&location, body.as_bytes().to_vec()).await.unwrap();
        let staged = StagedRef {
            location,
            row_count: rows,
            size: ack.size,
            e_tag: ack.e_tag,
        };
        (store, warehouse, staged, staging)
    }

    fn fast_options(policy: RejectPolicy) -> LoadOptions {
        LoadOptions {
            policy,
            readiness_attempts: 3,
            readiness_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_load_truncates_before_copy() {
        let (store, warehouse, staged, staging) = setup("order_id,price\n1,10.5\n2,20\n", 2).await;
        warehouse.insert_rows(&staging, vec![vec![serde_json::json!(99), serde_json::json!(1.0)]]);

        let loader = Loader::new(store, warehouse.clone(), fast_options(RejectPolicy::Strict));
        let report = loader.load(&staged, &staging, "role").await.unwrap();

        assert_eq!(report, LoadReport { rows_loaded: 2, rows_rejected: 0 });
        assert_eq!(warehouse.row_count(&staging), 2);
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_malformed_rows() {
        let (store, warehouse, staged, staging) = setup("order_id,price\n1,10.5\nx,20\n", 2).await;
        let loader = Loader::new(store, warehouse.clone(), fast_options(RejectPolicy::Strict));

        let err = loader.load(&staged, &staging, "role").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert_eq!(err.class(), FailureClass::Fatal);
    }

    #[tokio::test]
    async fn test_skip_policy_reports_rejected_count() {
        let (store, warehouse, staged, staging) = setup("order_id,price\n1,10.5\nx,20\n3,oops\n4,1\n", 4).await;
        let loader = Loader::new(store.clone(), warehouse.clone(), fast_options(RejectPolicy::MaxRejected(2)));
        let report = loader.load(&staged, &staging, "role").await.unwrap();
        assert_eq!(report, LoadReport { rows_loaded: 2, rows_rejected: 2 });

        let loader = Loader::new(store, warehouse, fast_options(RejectPolicy::MaxRejected(1)));
        assert!(loader.load(&staged, &staging, "role").await.is_err());
    }

    #[tokio::test]
    async fn test_waits_for_object_visibility() {
        let (store, warehouse, staged, staging) = setup("order_id,price\n1,10.5\n", 1).await;
        store.hide_for_heads(2);
        let loader = Loader::new(store.clone(), warehouse.clone(), fast_options(RejectPolicy::Strict));
        let report = loader.load(&staged, &staging, "role").await.unwrap();
        assert_eq!(report.rows_loaded, 1);

        store.hide_for_heads(5);
        let err = loader.load(&staged, &staging, "role").await.unwrap_err();
        assert_eq!(err.class(), FailureClass::Transient);
    }

    #[tokio::test]
    async fn test_copy_failure_keeps_previous_staging_contents() {
        let (store, warehouse, staged, staging) = setup("order_id,price\n1,10.5\n", 1).await;
        warehouse.insert_rows(&staging, vec![vec![serde_json::json!(7), serde_json::json!(7.0)]]);
        warehouse.fail_on(StatementKind::Copy, BackendError::from_sqlstate("42501", "permission denied"));

        let loader = Loader::new(store, warehouse.clone(), fast_options(RejectPolicy::Strict));
        let err = loader.load(&staged, &staging, "role").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(!err.is_retryable());
        assert_eq!(warehouse.row_count(&staging), 1);
    }
}
