use crate::core::sql::{merge_statements, Query};
use crate::domain::ports::SqlExecutor;
use crate::domain::table::RelationName;
use crate::utils::error::{BackendError, EtlError, Result};
use std::sync::Arc;

/// Delete-then-insert upsert from a staging relation into its target.
///
/// The delete of every target row whose merge key appears in staging and the
/// insert of every staging row run in one transaction: either both are
/// committed or the target is left untouched. Staging must be unique on the
/// merge key; a staging relation holding duplicates is refused before the
/// target is touched (the runner already keeps the last extracted row per key
/// when it stages).
pub struct Merger<X: SqlExecutor> {
    executor: Arc<X>,
}

impl<X: SqlExecutor> Merger<X> {
    pub fn new(executor: Arc<X>) -> Self {
        Self { executor }
    }

    /// Returns the number of rows inserted into the target.
    pub async fn merge(
        &self,
        staging: &RelationName,
        target: &RelationName,
        merge_key: &[String],
    ) -> Result<u64> {
        let relation = target.to_string();

        let duplicates = self
            .executor
            .query_scalar(&Query::DuplicateKeys {
                relation: staging.clone(),
                key: merge_key.to_vec(),
            })
            .await
            .map_err(|e| EtlError::merge(&relation, e))?;
        if duplicates > 0 {
            return Err(EtlError::merge(
                &relation,
                BackendError::fatal(format!(
                    "staging relation {} holds {} duplicated merge keys on ({})",
                    staging,
                    duplicates,
                    merge_key.join(", ")
                )),
            ));
        }

        let statements = merge_statements(staging, target, merge_key);
        for stmt in &statements {
            tracing::debug!("SQL: {}", stmt);
        }
        let affected = self
            .executor
            .execute_transaction(&statements)
            .await
            .map_err(|e| EtlError::merge(&relation, e))?;

        let deleted = affected.first().copied().unwrap_or(0);
        let inserted = affected.get(1).copied().unwrap_or(0);
        tracing::info!(
            "🔀 Merged {} into {} (replaced {}, inserted {})",
            staging,
            target,
            deleted,
            inserted
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryObjectStore, MemoryWarehouse};
    use crate::core::sql::StatementKind;
    use crate::domain::model::{Column, ColumnType};
    use crate::utils::error::{ErrorKind, FailureClass};
    use serde_json::{json, Value};

    fn weather_columns() -> Vec<Column> {
        vec![
            Column::new("date", ColumnType::Timestamp),
            Column::new("lat", ColumnType::Float),
            Column::new("lon", ColumnType::Float),
            Column::new("temp", ColumnType::Float),
        ]
    }

    fn key() -> Vec<String> {
        vec!["date".into(), "lat".into(), "lon".into()]
    }

    fn row(date: &str, lat: f64, lon: f64, temp: f64) -> Vec<Value> {
        vec![json!(date), json!(lat), json!(lon), json!(temp)]
    }

    fn setup() -> (Arc<MemoryWarehouse>, RelationName, RelationName) {
        let warehouse = Arc::new(MemoryWarehouse::new(Arc::new(MemoryObjectStore::new())));
        let staging: RelationName = "aiq_data_staging.weather_details".parse().unwrap();
        let target: RelationName = "aiq_data.weather_details".parse().unwrap();
        warehouse.create_table(&staging, weather_columns());
        warehouse.create_table(&target, weather_columns());
        (warehouse, staging, target)
    }

    #[tokio::test]
    async fn test_composite_key_replaces_existing_row() {
        let (warehouse, staging, target) = setup();
        warehouse.insert_rows(&target, vec![row("2024-03-27 10:00:00", 10.0, 20.0, 25.0)]);
        warehouse.insert_rows(&staging, vec![row("2024-03-27 10:00:00", 10.0, 20.0, 30.0)]);

        let merged = Merger::new(warehouse.clone()).merge(&staging, &target, &key()).await.unwrap();

        assert_eq!(merged, 1);
        assert_eq!(warehouse.rows(&target), vec![row("2024-03-27 10:00:00", 10.0, 20.0, 30.0)]);
    }

    #[tokio::test]
    async fn test_rows_with_other_keys_are_untouched() {
        let (warehouse, staging, target) = setup();
        warehouse.insert_rows(
            &target,
            vec![
                row("2024-03-26 10:00:00", 10.0, 20.0, 21.0),
                row("2024-03-27 10:00:00", 10.0, 20.0, 25.0),
                row("2024-03-27 10:00:00", 11.0, 20.0, 19.0),
            ],
        );
        warehouse.insert_rows(
            &staging,
            vec![
                row("2024-03-27 10:00:00", 10.0, 20.0, 30.0),
                row("2024-03-28 10:00:00", 10.0, 20.0, 31.0),
            ],
        );

        Merger::new(warehouse.clone()).merge(&staging, &target, &key()).await.unwrap();

        let mut rows = warehouse.rows(&target);
        rows.sort_by(|a, b| a[0].as_str().cmp(&b[0].as_str()).then(a[1].as_f64().partial_cmp(&b[1].as_f64()).unwrap()));
        assert_eq!(
            rows,
            vec![
                row("2024-03-26 10:00:00", 10.0, 20.0, 21.0),
                row("2024-03-27 10:00:00", 10.0, 20.0, 30.0),
                row("2024-03-27 10:00:00", 11.0, 20.0, 19.0),
                row("2024-03-28 10:00:00", 10.0, 20.0, 31.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_merging_twice_is_idempotent() {
        let (warehouse, staging, target) = setup();
        warehouse.insert_rows(
            &staging,
            vec![
                row("2024-03-27 10:00:00", 10.0, 20.0, 30.0),
                row("2024-03-27 10:00:00", 11.0, 21.0, 18.0),
            ],
        );
        let merger = Merger::new(warehouse.clone());

        merger.merge(&staging, &target, &key()).await.unwrap();
        let once = warehouse.rows(&target);
        merger.merge(&staging, &target, &key()).await.unwrap();

        assert_eq!(warehouse.rows(&target), once);
        assert_eq!(once.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_between_delete_and_insert_rolls_back() {
        let (warehouse, staging, target) = setup();
        let before = vec![row("2024-03-27 10:00:00", 10.0, 20.0, 25.0)];
        warehouse.insert_rows(&target, before.clone());
        warehouse.insert_rows(&staging, vec![row("2024-03-27 10:00:00", 10.0, 20.0, 30.0)]);
        warehouse.fail_on(StatementKind::Insert, BackendError::from_sqlstate("08006", "connection lost"));

        let err = Merger::new(warehouse.clone()).merge(&staging, &target, &key()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Merge);
        assert_eq!(err.class(), FailureClass::Transient);
        assert_eq!(warehouse.rows(&target), before);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_fatal() {
        let (warehouse, staging, target) = setup();
        warehouse.insert_rows(&staging, vec![row("2024-03-27 10:00:00", 10.0, 20.0, 30.0)]);
        warehouse.fail_on(StatementKind::Delete, BackendError::from_sqlstate("23505", "unique violation"));

        let err = Merger::new(warehouse.clone()).merge(&staging, &target, &key()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(warehouse.rows(&target).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_staging_keys_are_refused() {
        let (warehouse, staging, target) = setup();
        let before = vec![row("2024-03-27 10:00:00", 10.0, 20.0, 25.0)];
        warehouse.insert_rows(&target, before.clone());
        warehouse.insert_rows(
            &staging,
            vec![
                row("2024-03-27 10:00:00", 10.0, 20.0, 30.0),
                row("2024-03-27 10:00:00", 10.0, 20.0, 31.0),
            ],
        );

        let err = Merger::new(warehouse.clone()).merge(&staging, &target, &key()).await.unwrap_err();
        assert_eq!(err.class(), FailureClass::Fatal);
        assert!(err.to_string().contains("duplicated merge keys"));
        assert_eq!(warehouse.rows(&target), before);
    }
}
