use crate::core::sql::{Query, Statement};
use crate::domain::context::RunContext;
use crate::domain::credentials::CredentialSet;
use crate::domain::model::Dataset;
use crate::domain::table::ObjectLocation;
use crate::utils::error::{BackendError, Result};
use async_trait::async_trait;
use std::future::Future;

/// Acknowledgement returned by the object store once a write is durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAck {
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Storage sink the stager writes to and the loader verifies against.
pub trait ObjectStore: Send + Sync {
    /// Overwrites the object. Must not return before the backend
    /// acknowledges the write.
    fn put_object(
        &self,
        location: &ObjectLocation,
        body: Vec<u8>,
    ) -> impl Future<Output = std::result::Result<PutAck, BackendError>> + Send;

    /// Size of the object if it is visible, `None` otherwise.
    fn head_object(
        &self,
        location: &ObjectLocation,
    ) -> impl Future<Output = std::result::Result<Option<u64>, BackendError>> + Send;

    fn get_object(
        &self,
        location: &ObjectLocation,
    ) -> impl Future<Output = std::result::Result<Vec<u8>, BackendError>> + Send;
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs every statement inside one transaction and commits. On any error
    /// the transaction is rolled back and nothing is visible. Returns the
    /// affected row count per statement.
    async fn execute_transaction(
        &self,
        statements: &[Statement],
    ) -> std::result::Result<Vec<u64>, BackendError>;

    async fn query_scalar(&self, query: &Query) -> std::result::Result<i64, BackendError>;
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<CredentialSet>;
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, context: &RunContext) -> Result<Dataset>;

    /// 用於日誌與錯誤訊息
    fn source_name(&self) -> &str;
}
