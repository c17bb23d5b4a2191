use crate::domain::context::RunContext;
use crate::domain::model::{Column, ColumnType, Dataset, Record};
use crate::domain::ports::Extractor;
use crate::domain::table::ExtractWindow;
use crate::utils::error::{EtlError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;

/// Reads a delimited file with a header row into a dataset.
pub struct FileExtractor {
    table: String,
    path: String,
    delimiter: u8,
    window: Option<ExtractWindow>,
    columns: Vec<Column>,
    merge_key: Vec<String>,
}

impl FileExtractor {
    pub fn new(
        table: impl Into<String>,
        path: impl Into<String>,
        columns: Vec<Column>,
        merge_key: Vec<String>,
    ) -> Self {
        Self {
            table: table.into(),
            path: path.into(),
            delimiter: b',',
            window: None,
            columns,
            merge_key,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_window(mut self, window: Option<ExtractWindow>) -> Self {
        self.window = window;
        self
    }

    /// Parses file content. Every declared column must appear in the header;
    /// extra columns in the file are ignored.
    pub fn parse(&self, content: &[u8]) -> Result<Dataset> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .from_reader(content);

        let headers = reader.headers()?.clone();
        let positions: HashMap<&str, usize> =
            headers.iter().enumerate().map(|(i, h)| (h.trim(), i)).collect();

        let mut indexes = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let idx = positions.get(column.name.as_str()).ok_or_else(|| {
                EtlError::extraction(
                    &self.path,
                    format!("header has no column '{}'", column.name),
                )
            })?;
            indexes.push(*idx);
        }

        let mut rows = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let record = result?;
            let mut data = HashMap::with_capacity(self.columns.len());
            for (column, idx) in self.columns.iter().zip(&indexes) {
                let raw = record.get(*idx).unwrap_or("");
                let value = column.ty.parse_cell(raw).ok_or_else(|| {
                    EtlError::extraction(
                        &self.path,
                        format!(
                            "row {}: '{}' is not a valid {:?} for column '{}'",
                            line + 2,
                            raw,
                            column.ty,
                            column.name
                        ),
                    )
                })?;
                data.insert(column.name.clone(), value);
            }
            rows.push(Record::new(data));
        }

        let dataset = Dataset::new(&self.table, self.columns.clone(), self.merge_key.clone(), rows)?;
        match &self.window {
            Some(window) => apply_window(dataset, window, Utc::now().naive_utc()),
            None => Ok(dataset),
        }
    }
}

#[async_trait::async_trait]
impl Extractor for FileExtractor {
    async fn extract(&self, _context: &RunContext) -> Result<Dataset> {
        tracing::debug!("Reading source file: {}", self.path);
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| EtlError::extraction(&self.path, format!("cannot read file: {}", e)))?;
        self.parse(&content)
    }

    fn source_name(&self) -> &str {
        &self.path
    }
}

fn parse_moment(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Drops rows older than `now - days` on the window column. Rows without a
/// readable moment fall outside the window.
pub fn apply_window(dataset: Dataset, window: &ExtractWindow, now: NaiveDateTime) -> Result<Dataset> {
    let column = dataset
        .columns()
        .iter()
        .find(|c| c.name == window.column)
        .ok_or_else(|| EtlError::InvalidConfigValueError {
            field: format!("{}.source.window.column", dataset.name()),
            value: window.column.clone(),
            reason: "window column is not part of the schema".to_string(),
        })?;
    if column.ty != ColumnType::Timestamp {
        return Err(EtlError::InvalidConfigValueError {
            field: format!("{}.source.window.column", dataset.name()),
            value: window.column.clone(),
            reason: "window column must be a timestamp".to_string(),
        });
    }

    let cutoff = now - Duration::days(i64::from(window.days));
    let before = dataset.len();
    let name = window.column.clone();
    let filtered = dataset.filter_rows(|row| {
        row.get(&name)
            .as_str()
            .and_then(parse_moment)
            .map(|moment| moment >= cutoff)
            .unwrap_or(false)
    });
    tracing::debug!(
        "Extraction window kept {} of {} rows (cutoff {})",
        filtered.len(),
        before,
        cutoff
    );
    Ok(filtered)
}
