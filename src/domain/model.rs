use crate::utils::error::{EtlError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, Value>,
}

impl Record {
    pub fn new(data: HashMap<String, Value>) -> Self {
        Self { data }
    }

    /// 缺少的欄位視為 null
    pub fn get(&self, column: &str) -> &Value {
        self.data.get(column).unwrap_or(&NULL)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Record {
    fn from(fields: [(&str, Value); N]) -> Self {
        Self {
            data: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Timestamp,
    Boolean,
}

impl ColumnType {
    /// Parses one delimited cell. Empty cells are null; `None` means the cell
    /// does not conform to the column type.
    pub fn parse_cell(&self, raw: &str) -> Option<Value> {
        if raw.is_empty() {
            return Some(Value::Null);
        }
        match self {
            ColumnType::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
            ColumnType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            ColumnType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Bool(true)),
                "false" | "f" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            ColumnType::Timestamp => {
                let trimmed = raw.trim();
                let valid = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S").is_ok()
                    || NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S").is_ok()
                    || NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok();
                valid.then(|| Value::String(trimmed.to_string()))
            }
            ColumnType::Text => Some(Value::String(raw.to_string())),
        }
    }

    /// Coerces a JSON value coming from an API into the column's type.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (ColumnType::Text, Value::String(_)) => Some(value.clone()),
            (ColumnType::Text, other) => Some(Value::String(other.to_string())),
            (_, Value::String(s)) => self.parse_cell(s),
            (ColumnType::Integer, Value::Number(n)) if n.is_i64() => Some(value.clone()),
            (ColumnType::Float, Value::Number(n)) => n
                .as_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (ColumnType::Boolean, Value::Bool(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// 序列化成 CSV 欄位
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Merge-key tuple in canonical textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyTuple(pub Vec<String>);

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(", "))
    }
}

/// An extracted batch: fixed schema, declared merge key, immutable rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    columns: Vec<Column>,
    merge_key: Vec<String>,
    rows: Vec<Record>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<Column>,
        merge_key: Vec<String>,
        rows: Vec<Record>,
    ) -> Result<Self> {
        let name = name.into();
        if merge_key.is_empty() {
            return Err(EtlError::MissingConfigError {
                field: format!("{}.merge_key", name),
            });
        }
        let known: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        if known.len() != columns.len() {
            return Err(EtlError::InvalidConfigValueError {
                field: format!("{}.columns", name),
                value: columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: "column names must be unique".to_string(),
            });
        }
        if let Some(missing) = merge_key.iter().find(|k| !known.contains(k.as_str())) {
            return Err(EtlError::InvalidConfigValueError {
                field: format!("{}.merge_key", name),
                value: missing.clone(),
                reason: "merge key column is not part of the schema".to_string(),
            });
        }
        // null 永遠不等於任何值，delete 比對不到
        for (idx, row) in rows.iter().enumerate() {
            if let Some(column) = merge_key.iter().find(|k| row.get(k).is_null()) {
                return Err(EtlError::extraction(
                    &name,
                    format!("row {}: merge key column '{}' is null", idx + 1, column),
                ));
            }
        }
        Ok(Self {
            name,
            columns,
            merge_key,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn merge_key(&self) -> &[String] {
        &self.merge_key
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn key_of(&self, row: &Record) -> KeyTuple {
        KeyTuple(
            self.merge_key
                .iter()
                .map(|k| render_cell(row.get(k)))
                .collect(),
        )
    }

    /// 計算重複的 merge key 數量（多出來的列數）
    pub fn duplicate_keys(&self) -> usize {
        let distinct: HashSet<KeyTuple> = self.rows.iter().map(|r| self.key_of(r)).collect();
        self.rows.len() - distinct.len()
    }

    /// Keeps, for every merge key, only the last row carrying it. Surviving
    /// rows stay in their original relative order. Returns the number of
    /// rows dropped.
    pub fn dedup_last_wins(self) -> (Self, usize) {
        let mut last_index: HashMap<KeyTuple, usize> = HashMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            last_index.insert(self.key_of(row), idx);
        }
        let before = self.rows.len();
        let keep: HashSet<usize> = last_index.into_values().collect();
        let rows: Vec<Record> = self
            .rows
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep.contains(idx))
            .map(|(_, row)| row)
            .collect();
        let dropped = before - rows.len();
        (
            Self {
                name: self.name,
                columns: self.columns,
                merge_key: self.merge_key,
                rows,
            },
            dropped,
        )
    }

    pub fn filter_rows<F>(self, mut keep: F) -> Self
    where
        F: FnMut(&Record) -> bool,
    {
        let rows = self.rows.into_iter().filter(|r| keep(r)).collect();
        Self { rows, ..self }
    }

    /// 給日誌用的前幾筆樣本
    pub fn sample(&self, n: usize) -> String {
        let mut lines = vec![self.column_names().join(",")];
        for row in self.rows.iter().take(n) {
            let cells: Vec<String> = self
                .columns
                .iter()
                .map(|c| render_cell(row.get(&c.name)))
                .collect();
            lines.push(cells.join(","));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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

    #[test]
    fn test_merge_key_must_be_in_schema() {
        let err = Dataset::new("weather", weather_columns(), vec!["city".into()], vec![]);
        assert!(matches!(err, Err(EtlError::InvalidConfigValueError { .. })));

        let err = Dataset::new("weather", weather_columns(), vec![], vec![]);
        assert!(matches!(err, Err(EtlError::MissingConfigError { .. })));
    }

    #[test]
    fn test_null_merge_key_is_rejected() {
        let rows = vec![
            Record::from([("date", json!("2024-03-27 10:00:00")), ("lat", json!(10.0)), ("lon", json!(20.0))]),
            Record::from([("date", json!("2024-03-27 10:00:00")), ("lat", Value::Null), ("lon", json!(20.0))]),
        ];
        let err = Dataset::new("weather", weather_columns(), key(), rows).unwrap_err();
        assert_eq!(err.kind(), crate::utils::error::ErrorKind::Extraction);
        let message = err.to_string();
        assert!(message.contains("row 2"), "{}", message);
        assert!(message.contains("'lat'"), "{}", message);

        // 非 key 欄位可以是 null
        let rows = vec![Record::from([("date", json!("2024-03-27 10:00:00")), ("lat", json!(10.0)), ("lon", json!(20.0))])];
        assert!(Dataset::new("weather", weather_columns(), key(), rows).is_ok());
    }

    #[test]
    fn test_dedup_last_wins_keeps_order() {
        let rows = vec![
            Record::from([("date", json!("2024-03-27 10:00:00")), ("lat", json!(10.0)), ("lon", json!(20.0)), ("temp", json!(25.0))]),
            Record::from([("date", json!("2024-03-27 10:00:00")), ("lat", json!(11.0)), ("lon", json!(21.0)), ("temp", json!(18.0))]),
            Record::from([("date", json!("2024-03-27 10:00:00")), ("lat", json!(10.0)), ("lon", json!(20.0)), ("temp", json!(30.0))]),
        ];
        let dataset = Dataset::new("weather", weather_columns(), key(), rows).unwrap();
        assert_eq!(dataset.duplicate_keys(), 1);

        let (deduped, dropped) = dataset.dedup_last_wins();
        assert_eq!(dropped, 1);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped.rows()[0].get("lat"), &json!(11.0));
        assert_eq!(deduped.rows()[1].get("temp"), &json!(30.0));
        assert_eq!(deduped.duplicate_keys(), 0);
    }

    #[test]
    fn test_parse_cell_by_type() {
        assert_eq!(ColumnType::Integer.parse_cell("42"), Some(json!(42)));
        assert_eq!(ColumnType::Integer.parse_cell("4.2"), None);
        assert_eq!(ColumnType::Float.parse_cell("-37.3159"), Some(json!(-37.3159)));
        assert_eq!(ColumnType::Text.parse_cell(""), Some(Value::Null));
        assert!(ColumnType::Timestamp.parse_cell("2024-03-27 10:00:00").is_some());
        assert!(ColumnType::Timestamp.parse_cell("2024-03-27").is_some());
        assert_eq!(ColumnType::Timestamp.parse_cell("yesterday"), None);
        assert_eq!(ColumnType::Boolean.parse_cell("t"), Some(json!(true)));
    }

    #[test]
    fn test_coerce_api_values() {
        assert_eq!(ColumnType::Float.coerce(&json!("-37.3159")), Some(json!(-37.3159)));
        assert_eq!(ColumnType::Text.coerce(&json!(5)), Some(json!("5")));
        assert_eq!(ColumnType::Integer.coerce(&json!(800)), Some(json!(800)));
        assert_eq!(ColumnType::Integer.coerce(&json!("abc")), None);
    }

    #[test]
    fn test_sample_renders_header_and_rows() {
        let rows = vec![Record::from([
            ("date", json!("2024-03-27 10:00:00")),
            ("lat", json!(10.0)),
            ("lon", json!(20.0)),
        ])];
        let dataset = Dataset::new("weather", weather_columns(), key(), rows).unwrap();
        assert_eq!(
            dataset.sample(5),
            "date,lat,lon,temp\n2024-03-27 10:00:00,10.0,20.0,"
        );
    }
}
