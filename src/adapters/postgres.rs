//! Warehouse connection over the Postgres wire protocol (Redshift speaks it).

use crate::core::sql::{Query, Statement};
use crate::domain::credentials::DatabaseCredentials;
use crate::domain::ports::SqlExecutor;
use crate::utils::error::BackendError;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;

pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    /// Builds the pool without connecting; the first statement opens the
    /// connection, so configuration problems surface as run failures.
    pub fn connect_lazy(db: &DatabaseCredentials) -> Self {
        let options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .username(&db.user)
            .password(&db.password)
            .database(&db.database);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy_with(options);

        Self { pool }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute_transaction(&self, statements: &[Statement]) -> Result<Vec<u64>, BackendError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;
        let mut affected = Vec::with_capacity(statements.len());

        for stmt in statements {
            let sql = stmt.to_string();
            // 任一語句失敗時 tx 被 drop，交易自動 rollback
            let result = sqlx::query(&sql).execute(&mut *tx).await.map_err(backend_error)?;
            affected.push(result.rows_affected());
        }

        tx.commit().await.map_err(backend_error)?;
        Ok(affected)
    }

    async fn query_scalar(&self, query: &Query) -> Result<i64, BackendError> {
        let sql = query.to_string();
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)
    }
}

/// Database errors are classified by SQLSTATE; connection-level failures are
/// transient.
pub fn backend_error(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => BackendError::from_sqlstate(code, db.message()),
            None => BackendError::fatal(db.message()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => BackendError::transient(err.to_string()),
        _ => BackendError::fatal(err.to_string()),
    }
}
