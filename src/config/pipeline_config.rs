use crate::core::load::{LoadOptions, RejectPolicy};
use crate::core::plan::RunPlan;
use crate::domain::model::Column;
use crate::domain::table::{is_identifier, RunRequest, SourceSpec, TableSpec};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub load: LoadSection,
    pub tables: Vec<TableSpec>,
    /// 未設定時每個 table 各自成為一個 run
    #[serde(default)]
    pub runs: Vec<RunRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSection {
    /// Rows the bulk copy may skip; absent means any rejected row fails the load.
    #[serde(default)]
    pub max_rejected: Option<u32>,
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
    #[serde(default = "default_readiness_delay_ms")]
    pub readiness_delay_ms: u64,
}

fn default_concurrent_requests() -> usize {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_readiness_attempts() -> u32 {
    3
}

fn default_readiness_delay_ms() -> u64 {
    200
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            max_rejected: None,
            readiness_attempts: default_readiness_attempts(),
            readiness_delay_ms: default_readiness_delay_ms(),
        }
    }
}

impl LoadSection {
    pub fn reject_policy(&self) -> RejectPolicy {
        match self.max_rejected {
            Some(n) => RejectPolicy::MaxRejected(n),
            None => RejectPolicy::Strict,
        }
    }

    pub fn options(&self) -> LoadOptions {
        LoadOptions {
            policy: self.reject_policy(),
            readiness_attempts: self.readiness_attempts,
            readiness_delay: Duration::from_millis(self.readiness_delay_ms),
        }
    }
}

impl PipelineFile {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtlError::config(format!("cannot read pipeline config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content, |name| std::env::var(name).ok())?;
        Ok(toml::from_str(&processed)?)
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.pipeline.request_timeout_seconds))
            .build()
            .map_err(|e| EtlError::config(format!("cannot build HTTP client: {}", e)))
    }

    /// Declared runs, or one run per table when none are declared.
    pub fn run_requests(&self) -> Vec<RunRequest> {
        if !self.runs.is_empty() {
            return self.runs.clone();
        }
        self.tables
            .iter()
            .map(|t| RunRequest {
                name: t.name.clone(),
                tables: vec![t.name.clone()],
                after: Vec::new(),
            })
            .collect()
    }

    pub fn plan(&self) -> Result<RunPlan> {
        RunPlan::new(self.tables.clone(), self.run_requests())
    }
}

/// 替換 `${VAR}`；找不到的變數直接視為設定錯誤
pub fn substitute_env_vars<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| EtlError::config(format!("invalid substitution pattern: {}", e)))?;

    let mut missing = Vec::new();
    let result = re.replace_all(content, |caps: &regex::Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing.push(name.to_string());
            String::new()
        })
    });

    if let Some(name) = missing.first() {
        return Err(EtlError::MissingConfigError {
            field: format!("environment variable {}", name),
        });
    }
    Ok(result.into_owned())
}

fn validate_columns(prefix: &str, table: &TableSpec) -> Result<()> {
    if table.columns.is_empty() {
        return Err(EtlError::MissingConfigError {
            field: format!("{}.columns", prefix),
        });
    }
    let mut seen = HashSet::new();
    for Column { name, .. } in &table.columns {
        validate_non_empty_string(&format!("{}.columns.name", prefix), name)?;
        // 欄位名直接拼進 SQL
        if !is_identifier(name) {
            return Err(EtlError::InvalidConfigValueError {
                field: format!("{}.columns", prefix),
                value: name.clone(),
                reason: "column names must be plain SQL identifiers".to_string(),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(EtlError::InvalidConfigValueError {
                field: format!("{}.columns", prefix),
                value: name.clone(),
                reason: "duplicate column".to_string(),
            });
        }
    }

    if table.merge_key.is_empty() {
        return Err(EtlError::MissingConfigError {
            field: format!("{}.merge_key", prefix),
        });
    }
    if let Some(col) = table.merge_key.iter().find(|k| !seen.contains(k.as_str())) {
        return Err(EtlError::InvalidConfigValueError {
            field: format!("{}.merge_key", prefix),
            value: col.clone(),
            reason: "merge key column is not a declared column".to_string(),
        });
    }
    Ok(())
}

fn validate_source(prefix: &str, table: &TableSpec, known_tables: &HashSet<&str>) -> Result<()> {
    match &table.source {
        SourceSpec::File {
            path,
            delimiter,
            window,
        } => {
            validate_path(&format!("{}.source.path", prefix), path)?;
            if let Some(d) = delimiter {
                if !d.is_ascii() {
                    return Err(EtlError::InvalidConfigValueError {
                        field: format!("{}.source.delimiter", prefix),
                        value: d.to_string(),
                        reason: "delimiter must be a single ASCII character".to_string(),
                    });
                }
            }
            if let Some(window) = window {
                if !table.columns.iter().any(|c| c.name == window.column) {
                    return Err(EtlError::InvalidConfigValueError {
                        field: format!("{}.source.window.column", prefix),
                        value: window.column.clone(),
                        reason: "window column is not a declared column".to_string(),
                    });
                }
                validate_positive_number(&format!("{}.source.window.days", prefix), window.days as usize, 1)?;
            }
        }
        SourceSpec::UserApi { endpoint, .. } => {
            validate_url(&format!("{}.source.endpoint", prefix), endpoint)?;
        }
        SourceSpec::WeatherApi {
            endpoint,
            lookup_table,
            ..
        } => {
            validate_url(&format!("{}.source.endpoint", prefix), endpoint)?;
            if !known_tables.contains(lookup_table.as_str()) {
                return Err(EtlError::InvalidConfigValueError {
                    field: format!("{}.source.lookup_table", prefix),
                    value: lookup_table.clone(),
                    reason: "no table with this name".to_string(),
                });
            }
        }
    }
    Ok(())
}

impl Validate for PipelineFile {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("pipeline.name", &self.pipeline.name)?;
        validate_range("pipeline.concurrent_requests", self.pipeline.concurrent_requests, 1, 64)?;
        validate_positive_number(
            "pipeline.request_timeout_seconds",
            self.pipeline.request_timeout_seconds as usize,
            1,
        )?;
        validate_range("load.readiness_attempts", self.load.readiness_attempts, 1, 60)?;

        if self.tables.is_empty() {
            return Err(EtlError::MissingConfigError {
                field: "tables".to_string(),
            });
        }
        let known: HashSet<&str> = self.tables.iter().map(|t| t.name.as_str()).collect();
        for table in &self.tables {
            let prefix = format!("tables.{}", table.name);
            validate_non_empty_string("tables.name", &table.name)?;
            validate_path(&format!("{}.object_file", prefix), &table.object_file)?;
            validate_columns(&prefix, table)?;
            validate_source(&prefix, table, &known)?;
        }

        // 唯一性、引用與循環依賴由 RunPlan 檢查
        self.plan().map(|_| ())
    }
}
