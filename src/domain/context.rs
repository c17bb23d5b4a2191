use crate::domain::credentials::CredentialSet;
use crate::domain::model::Dataset;
use std::collections::HashMap;
use std::sync::Arc;

/// State shared by the tables of one run request.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub credentials: Arc<CredentialSet>,
    datasets: HashMap<String, Dataset>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, credentials: Arc<CredentialSet>) -> Self {
        Self {
            run_id: run_id.into(),
            credentials,
            datasets: HashMap::new(),
        }
    }

    /// 記錄已抽取的資料集，供同一批次後續的 extractor 使用
    pub fn add_dataset(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.name().to_string(), dataset);
    }

    pub fn dataset(&self, table: &str) -> Option<&Dataset> {
        self.datasets.get(table)
    }
}
