use crate::domain::table::{RunRequest, TableSpec};
use crate::utils::error::{EtlError, Result};
use std::collections::HashSet;

/// Tables plus run requests in execution order. Requests are ordered by
/// their `after` dependencies; independent requests keep declaration order.
#[derive(Debug, Clone)]
pub struct RunPlan {
    tables: Vec<TableSpec>,
    requests: Vec<RunRequest>,
}

impl RunPlan {
    pub fn new(tables: Vec<TableSpec>, requests: Vec<RunRequest>) -> Result<Self> {
        let mut table_names = HashSet::new();
        for table in &tables {
            if !table_names.insert(table.name.as_str()) {
                return Err(EtlError::InvalidConfigValueError {
                    field: "tables.name".to_string(),
                    value: table.name.clone(),
                    reason: "table names must be unique".to_string(),
                });
            }
        }

        let mut request_names = HashSet::new();
        for request in &requests {
            if !request_names.insert(request.name.as_str()) {
                return Err(EtlError::InvalidConfigValueError {
                    field: "runs.name".to_string(),
                    value: request.name.clone(),
                    reason: "run names must be unique".to_string(),
                });
            }
            if request.tables.is_empty() {
                return Err(EtlError::MissingConfigError {
                    field: format!("runs.{}.tables", request.name),
                });
            }
            if let Some(unknown) = request.tables.iter().find(|t| !table_names.contains(t.as_str())) {
                return Err(EtlError::InvalidConfigValueError {
                    field: format!("runs.{}.tables", request.name),
                    value: unknown.clone(),
                    reason: "no table with this name".to_string(),
                });
            }
        }
        for request in &requests {
            if let Some(unknown) = request.after.iter().find(|a| !request_names.contains(a.as_str())) {
                return Err(EtlError::InvalidConfigValueError {
                    field: format!("runs.{}.after", request.name),
                    value: unknown.clone(),
                    reason: "no run with this name".to_string(),
                });
            }
        }

        let requests = order_requests(requests)?;
        Ok(Self { tables, requests })
    }

    pub fn ordered(&self) -> &[RunRequest] {
        &self.requests
    }

    pub fn request(&self, name: &str) -> Option<&RunRequest> {
        self.requests.iter().find(|r| r.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Tables of a request in declared order.
    pub fn tables_for(&self, request: &RunRequest) -> Vec<&TableSpec> {
        request.tables.iter().filter_map(|name| self.table(name)).collect()
    }
}

// 依賴排序：每輪挑宣告順序中第一個依賴都已排入的 request
fn order_requests(mut pending: Vec<RunRequest>) -> Result<Vec<RunRequest>> {
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending
            .iter()
            .position(|r| r.after.iter().all(|dep| placed.contains(dep)));
        match ready {
            Some(idx) => {
                let request = pending.remove(idx);
                placed.insert(request.name.clone());
                ordered.push(request);
            }
            None => {
                let names: Vec<&str> = pending.iter().map(|r| r.name.as_str()).collect();
                return Err(EtlError::config(format!(
                    "run dependencies form a cycle among: {}",
                    names.join(", ")
                )));
            }
        }
    }
    Ok(ordered)
}
