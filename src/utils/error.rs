use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// 失敗是否值得由排程器重試
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Transient,
    Fatal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Transient => write!(f, "transient"),
            FailureClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// 錯誤分類，對應 pipeline 的各個階段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Extraction,
    Staging,
    Load,
    Merge,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Extraction => "ExtractionError",
            ErrorKind::Staging => "StagingError",
            ErrorKind::Load => "LoadError",
            ErrorKind::Merge => "MergeError",
            ErrorKind::Config => "ConfigError",
        };
        f.write_str(name)
    }
}

/// Failure reported by a storage or warehouse backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub code: Option<String>,
    pub message: String,
    pub class: FailureClass,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            class: FailureClass::Transient,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            class: FailureClass::Fatal,
        }
    }

    /// 依 SQLSTATE 建立錯誤並自動分類
    pub fn from_sqlstate(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let class = classify_sqlstate(Some(&code));
        Self {
            code: Some(code),
            message: message.into(),
            class,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Connection loss, resource exhaustion, operator intervention, serialization
/// failures, deadlocks and lock timeouts are retryable. Anything else is not.
pub fn classify_sqlstate(code: Option<&str>) -> FailureClass {
    match code {
        Some(c) if c.starts_with("08") || c.starts_with("53") || c.starts_with("57") => {
            FailureClass::Transient
        }
        Some("40001") | Some("40P01") | Some("55P03") => FailureClass::Transient,
        _ => FailureClass::Fatal,
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Extraction failed for '{source_name}': {message}")]
    ExtractionError {
        source_name: String,
        message: String,
        class: FailureClass,
    },

    #[error("Staging to '{location}' failed: {message}")]
    StagingError {
        location: String,
        message: String,
        class: FailureClass,
    },

    #[error("Load into '{relation}' failed ({class}): {message}")]
    LoadError {
        relation: String,
        message: String,
        class: FailureClass,
    },

    #[error("Merge into '{relation}' failed ({class}): {message}")]
    MergeError {
        relation: String,
        message: String,
        class: FailureClass,
    },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

impl EtlError {
    pub fn extraction(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtractionError {
            source_name: source_name.into(),
            message: message.into(),
            class: FailureClass::Fatal,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn staging(location: impl Into<String>, err: BackendError) -> Self {
        Self::StagingError {
            location: location.into(),
            message: err.message,
            class: err.class,
        }
    }

    pub fn load(relation: impl Into<String>, err: BackendError) -> Self {
        Self::LoadError {
            relation: relation.into(),
            message: describe(&err),
            class: err.class,
        }
    }

    pub fn merge(relation: impl Into<String>, err: BackendError) -> Self {
        Self::MergeError {
            relation: relation.into(),
            message: describe(&err),
            class: err.class,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::ExtractionError { .. }
            | EtlError::ApiError(_)
            | EtlError::CsvError(_)
            | EtlError::SerializationError(_) => ErrorKind::Extraction,
            EtlError::StagingError { .. } => ErrorKind::Staging,
            EtlError::LoadError { .. } => ErrorKind::Load,
            EtlError::MergeError { .. } => ErrorKind::Merge,
            EtlError::IoError(_)
            | EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => ErrorKind::Config,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            EtlError::ExtractionError { class, .. }
            | EtlError::StagingError { class, .. }
            | EtlError::LoadError { class, .. }
            | EtlError::MergeError { class, .. } => *class,
            EtlError::ApiError(e) => {
                let server_side = e.status().map(|s| s.is_server_error()).unwrap_or(false);
                if e.is_timeout() || e.is_connect() || server_side {
                    FailureClass::Transient
                } else {
                    FailureClass::Fatal
                }
            }
            _ => FailureClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match (self.kind(), self.class()) {
            (ErrorKind::Config, _) => "Check the pipeline config and credential file",
            (_, FailureClass::Transient) => "Retry the run; the failure looks temporary",
            (ErrorKind::Extraction, _) => "Check the source file or upstream API payload",
            (ErrorKind::Staging, _) => "Check bucket permissions and the key prefix",
            (ErrorKind::Load, _) => "Check the staging table schema and the COPY role",
            (ErrorKind::Merge, _) => "Check the target table schema and merge key",
        }
    }
}

fn describe(err: &BackendError) -> String {
    match &err.code {
        Some(code) => format!("[{}] {}", code, err.message),
        None => err.message.clone(),
    }
}

impl From<toml::de::Error> for EtlError {
    fn from(e: toml::de::Error) -> Self {
        EtlError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
