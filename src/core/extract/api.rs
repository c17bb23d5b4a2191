use crate::core::extract::normalize::{flatten_json, project_records, rename_fields};
use crate::domain::context::RunContext;
use crate::domain::model::{render_cell, Column, Dataset};
use crate::domain::ports::Extractor;
use crate::utils::error::{EtlError, FailureClass, Result};
use chrono::DateTime;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// GET a JSON document. Non-success statuses and unparseable bodies are
/// extraction errors; 5xx and 429 are transient.
pub async fn fetch_json(client: &Client, url: &str, query: &[(&str, String)]) -> Result<Value> {
    tracing::debug!("Making API request to: {}", url);
    let response = client.get(url).query(query).send().await?;
    let status = response.status();
    tracing::debug!("API response status: {}", status);

    if !status.is_success() {
        let class = if status.is_server_error() || status.as_u16() == 429 {
            FailureClass::Transient
        } else {
            FailureClass::Fatal
        };
        return Err(EtlError::ExtractionError {
            source_name: url.to_string(),
            message: format!("HTTP {}", status),
            class,
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| EtlError::extraction(url, format!("unparseable payload: {}", e)))
}

/// address.* 與 geo 座標的預設對應
pub fn default_user_mapping() -> HashMap<String, String> {
    [
        ("address.suite", "suite"),
        ("address.city", "city"),
        ("address.zipcode", "zipcode"),
        ("address.geo.lat", "lat"),
        ("address.geo.lng", "lon"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

/// Reads a user-directory style endpoint returning a JSON array of (nested)
/// objects.
pub struct UserApiExtractor {
    table: String,
    endpoint: String,
    client: Client,
    field_mapping: HashMap<String, String>,
    columns: Vec<Column>,
    merge_key: Vec<String>,
}

impl UserApiExtractor {
    pub fn new(
        table: impl Into<String>,
        endpoint: impl Into<String>,
        client: Client,
        columns: Vec<Column>,
        merge_key: Vec<String>,
    ) -> Self {
        Self {
            table: table.into(),
            endpoint: endpoint.into(),
            client,
            field_mapping: default_user_mapping(),
            columns,
            merge_key,
        }
    }

    pub fn with_field_mapping(mut self, mapping: HashMap<String, String>) -> Self {
        self.field_mapping = mapping;
        self
    }

    pub fn normalize(&self, payload: Value) -> Result<Dataset> {
        let items = match payload {
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            other => {
                return Err(EtlError::extraction(
                    &self.endpoint,
                    format!("expected a JSON array, got {}", other),
                ))
            }
        };

        let flats = items
            .iter()
            .map(|item| rename_fields(flatten_json(item), &self.field_mapping))
            .collect();
        let rows = project_records(&self.endpoint, &self.columns, flats)?;
        Dataset::new(&self.table, self.columns.clone(), self.merge_key.clone(), rows)
    }
}

#[async_trait::async_trait]
impl Extractor for UserApiExtractor {
    async fn extract(&self, _context: &RunContext) -> Result<Dataset> {
        let payload = fetch_json(&self.client, &self.endpoint, &[]).await?;
        self.normalize(payload)
    }

    fn source_name(&self) -> &str {
        &self.endpoint
    }
}

/// `main.*`, `wind.*`, `clouds.*`, `coord.*` 的欄位改名
pub fn weather_mapping() -> HashMap<String, String> {
    [
        ("main.temp", "temp"),
        ("main.feels_like", "feel_like"),
        ("main.temp_min", "min_temp"),
        ("main.temp_max", "max_temp"),
        ("main.pressure", "pressure"),
        ("main.humidity", "humidity"),
        ("wind.speed", "wind_speed"),
        ("wind.deg", "wind_deg"),
        ("wind.gust", "wind_gust"),
        ("clouds.all", "cloud_all"),
        ("coord.lat", "lat"),
        ("coord.lon", "lon"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

/// Flattens one weather response and derives `weather_id`, `weather_type`,
/// `description` (from `weather[0]`) and the local-time `date`.
pub fn normalize_weather(source: &str, payload: &Value) -> Result<Map<String, Value>> {
    let mapping = weather_mapping();
    let mut flat = rename_fields(flatten_json(payload), &mapping);
    // 選填欄位（例如 wind.gust）缺少時補 null
    for column in mapping.values().map(String::as_str).chain(["base", "visibility"]) {
        flat.entry(column.to_string()).or_insert(Value::Null);
    }

    let first = flat
        .get("weather")
        .and_then(|w| w.as_array())
        .and_then(|w| w.first())
        .cloned();
    let pick = |field: &str| {
        first
            .as_ref()
            .and_then(|w| w.get(field))
            .cloned()
            .unwrap_or(Value::Null)
    };
    let weather_id = pick("id");
    let weather_type = pick("main");
    let description = pick("description");
    flat.insert("weather_id".to_string(), weather_id);
    flat.insert("weather_type".to_string(), weather_type);
    flat.insert("description".to_string(), description);

    let dt = flat.get("dt").and_then(Value::as_i64);
    let offset = flat.get("timezone").and_then(Value::as_i64);
    let (dt, offset) = match (dt, offset) {
        (Some(dt), Some(offset)) => (dt, offset),
        _ => {
            return Err(EtlError::extraction(
                source,
                "weather payload lacks a numeric dt/timezone pair",
            ))
        }
    };
    let local = dt
        .checked_add(offset)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| EtlError::extraction(source, format!("timestamp {} out of range", dt)))?;
    flat.insert(
        "date".to_string(),
        Value::String(local.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string()),
    );
    Ok(flat)
}

/// Looks weather up for every distinct coordinate pair of a dataset extracted
/// earlier in the same run.
pub struct WeatherExtractor {
    table: String,
    endpoint: String,
    lookup_table: String,
    lat_column: String,
    lon_column: String,
    client: Client,
    concurrency: usize,
    columns: Vec<Column>,
    merge_key: Vec<String>,
}

impl WeatherExtractor {
    pub fn new(
        table: impl Into<String>,
        endpoint: impl Into<String>,
        lookup_table: impl Into<String>,
        client: Client,
        columns: Vec<Column>,
        merge_key: Vec<String>,
    ) -> Self {
        Self {
            table: table.into(),
            endpoint: endpoint.into(),
            lookup_table: lookup_table.into(),
            lat_column: "lat".to_string(),
            lon_column: "lon".to_string(),
            client,
            concurrency: 1,
            columns,
            merge_key,
        }
    }

    pub fn with_coordinate_columns(mut self, lat: impl Into<String>, lon: impl Into<String>) -> Self {
        self.lat_column = lat.into();
        self.lon_column = lon.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Distinct (lat, lon) pairs in order of first appearance. Rows with a
    /// missing coordinate are skipped.
    pub fn lookup_keys(&self, lookup: &Dataset) -> Vec<(String, String)> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for row in lookup.rows() {
            let (lat, lon) = (row.get(&self.lat_column), row.get(&self.lon_column));
            if lat.is_null() || lon.is_null() {
                continue;
            }
            let pair = (render_cell(lat), render_cell(lon));
            if seen.insert(pair.clone()) {
                keys.push(pair);
            }
        }
        keys
    }

    async fn fetch_one(&self, api_key: &str, lat: String, lon: String) -> Result<Map<String, Value>> {
        let query = [("lat", lat), ("lon", lon), ("appid", api_key.to_string())];
        let payload = fetch_json(&self.client, &self.endpoint, &query).await?;
        normalize_weather(&self.endpoint, &payload)
    }
}

#[async_trait::async_trait]
impl Extractor for WeatherExtractor {
    async fn extract(&self, context: &RunContext) -> Result<Dataset> {
        let lookup = context.dataset(&self.lookup_table).ok_or_else(|| {
            EtlError::config(format!(
                "table '{}' reads coordinates from '{}', which must be extracted earlier in the same run",
                self.table, self.lookup_table
            ))
        })?;
        let api_key = context
            .credentials
            .api_key
            .as_deref()
            .ok_or_else(|| EtlError::MissingConfigError {
                field: "credentials.api_key".to_string(),
            })?;

        let keys = self.lookup_keys(lookup);
        tracing::info!(
            "🌤️ Fetching weather for {} distinct coordinates ({} source rows)",
            keys.len(),
            lookup.len()
        );

        let flats: Vec<Map<String, Value>> = futures::stream::iter(keys)
            .map(|(lat, lon)| self.fetch_one(api_key, lat, lon))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let rows = project_records(&self.endpoint, &self.columns, flats)?;
        Dataset::new(&self.table, self.columns.clone(), self.merge_key.clone(), rows)
    }

    fn source_name(&self) -> &str {
        &self.endpoint
    }
}
