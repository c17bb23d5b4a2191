use crate::domain::model::Column;
use crate::utils::error::EtlError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// `schema.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationName {
    pub schema: String,
    pub table: String,
}

impl RelationName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for RelationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Plain SQL identifier: a letter or `_`, then letters, digits or `_`.
pub fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for RelationName {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| EtlError::InvalidConfigValueError {
            field: "relation".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let (schema, table) = s
            .split_once('.')
            .ok_or_else(|| invalid("expected <schema>.<table>"))?;
        if !is_identifier(schema) || !is_identifier(table) {
            return Err(invalid("schema and table must be plain SQL identifiers"));
        }
        Ok(Self::new(schema, table))
    }
}

impl TryFrom<String> for RelationName {
    type Error = EtlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelationName> for String {
    fn from(value: RelationName) -> Self {
        value.to_string()
    }
}

/// Bucket and key prefix every staged object lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `{bucket}/{prefix}{file}`；prefix 直接串接，不補斜線
    pub fn for_file(storage: &StorageConfig, file: &str) -> Self {
        Self::new(storage.bucket.clone(), format!("{}{}", storage.prefix, file))
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    pub fn parse_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("s3://")?;
        let (bucket, key) = rest.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(bucket, key))
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// A durably written staged object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRef {
    pub location: ObjectLocation,
    pub row_count: usize,
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Only rows whose `column` is within the last `days` days are extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractWindow {
    pub column: String,
    pub days: u32,
}

fn default_lat_column() -> String {
    "lat".to_string()
}

fn default_lon_column() -> String {
    "lon".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    File {
        path: String,
        #[serde(default)]
        delimiter: Option<char>,
        #[serde(default)]
        window: Option<ExtractWindow>,
    },
    UserApi {
        endpoint: String,
        /// 扁平化後的欄位名 -> 目標欄位名
        #[serde(default)]
        field_mapping: Option<HashMap<String, String>>,
    },
    WeatherApi {
        endpoint: String,
        /// Table (earlier in the same run) whose rows provide coordinates.
        lookup_table: String,
        #[serde(default = "default_lat_column")]
        lat_column: String,
        #[serde(default = "default_lon_column")]
        lon_column: String,
    },
}

impl SourceSpec {
    pub fn describe(&self) -> &str {
        match self {
            SourceSpec::File { path, .. } => path,
            SourceSpec::UserApi { endpoint, .. } => endpoint,
            SourceSpec::WeatherApi { endpoint, .. } => endpoint,
        }
    }
}

/// Static description of one table's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub target: RelationName,
    pub staging: RelationName,
    pub merge_key: Vec<String>,
    pub columns: Vec<Column>,
    /// Logical file name appended to the storage prefix, e.g. `data/sales_data.csv`.
    pub object_file: String,
    pub source: SourceSpec,
}

impl TableSpec {
    pub fn object_location(&self, storage: &StorageConfig) -> ObjectLocation {
        ObjectLocation::for_file(storage, &self.object_file)
    }
}

/// A named group of tables run together, in order, after the runs it
/// depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub name: String,
    pub tables: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}
