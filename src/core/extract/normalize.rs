use crate::domain::model::{Column, Record};
use crate::utils::error::{EtlError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Flattens nested objects into dotted names (`address.geo.lat`). Arrays are
/// kept as values.
pub fn flatten_json(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    match value {
        Value::Object(obj) => flatten_into("", obj, &mut out),
        other => {
            out.insert("value".to_string(), other.clone());
        }
    }
    out
}

fn flatten_into(prefix: &str, obj: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in obj {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(&name, inner, out),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}

/// 依 mapping 重新命名扁平化後的欄位
pub fn rename_fields(mut flat: Map<String, Value>, mapping: &HashMap<String, String>) -> Map<String, Value> {
    for (from, to) in mapping {
        if let Some(value) = flat.remove(from) {
            flat.insert(to.clone(), value);
        }
    }
    flat
}

/// Projects flattened records onto the declared columns, coercing each value
/// to the column type. A column absent from every record is an error; a value
/// missing from a single record becomes null.
pub fn project_records(
    source: &str,
    columns: &[Column],
    flats: Vec<Map<String, Value>>,
) -> Result<Vec<Record>> {
    if !flats.is_empty() {
        if let Some(missing) = columns
            .iter()
            .find(|c| flats.iter().all(|f| !f.contains_key(&c.name)))
        {
            return Err(EtlError::extraction(
                source,
                format!("payload has no field for column '{}'", missing.name),
            ));
        }
    }

    flats
        .into_iter()
        .enumerate()
        .map(|(idx, flat)| {
            let mut data = HashMap::with_capacity(columns.len());
            for column in columns {
                let raw = flat.get(&column.name).unwrap_or(&Value::Null);
                let value = column.ty.coerce(raw).ok_or_else(|| {
                    EtlError::extraction(
                        source,
                        format!(
                            "record {}: value {} does not fit column '{}' ({:?})",
                            idx, raw, column.name, column.ty
                        ),
                    )
                })?;
                data.insert(column.name.clone(), value);
            }
            Ok(Record::new(data))
        })
        .collect()
}
