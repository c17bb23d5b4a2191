pub mod api;
pub mod file;
pub mod normalize;

pub use api::{UserApiExtractor, WeatherExtractor};
pub use file::FileExtractor;

use crate::domain::ports::Extractor;
use crate::domain::table::{SourceSpec, TableSpec};
use crate::utils::error::{EtlError, Result};
use reqwest::Client;

/// 依 TableSpec 的來源設定建立對應的 extractor
pub fn extractor_for(table: &TableSpec, client: &Client, concurrency: usize) -> Result<Box<dyn Extractor>> {
    let columns = table.columns.clone();
    let key = table.merge_key.clone();
    let extractor: Box<dyn Extractor> = match &table.source {
        SourceSpec::File {
            path,
            delimiter,
            window,
        } => {
            let delimiter = match delimiter {
                None => b',',
                Some(c) if c.is_ascii() => *c as u8,
                Some(c) => {
                    return Err(EtlError::InvalidConfigValueError {
                        field: format!("{}.source.delimiter", table.name),
                        value: c.to_string(),
                        reason: "delimiter must be a single ASCII character".to_string(),
                    })
                }
            };
            Box::new(
                FileExtractor::new(&table.name, path, columns, key)
                    .with_delimiter(delimiter)
                    .with_window(window.clone()),
            )
        }
        SourceSpec::UserApi {
            endpoint,
            field_mapping,
        } => {
            let extractor = UserApiExtractor::new(&table.name, endpoint, client.clone(), columns, key);
            match field_mapping {
                Some(mapping) => Box::new(extractor.with_field_mapping(mapping.clone())),
                None => Box::new(extractor),
            }
        }
        SourceSpec::WeatherApi {
            endpoint,
            lookup_table,
            lat_column,
            lon_column,
        } => Box::new(
            WeatherExtractor::new(&table.name, endpoint, lookup_table, client.clone(), columns, key)
                .with_coordinate_columns(lat_column, lon_column)
                .with_concurrency(concurrency),
        ),
    };
    Ok(extractor)
}
