use crate::domain::model::{render_cell, Dataset};
use crate::domain::ports::ObjectStore;
use crate::domain::table::{ObjectLocation, StagedRef};
use crate::utils::error::{BackendError, EtlError, Result};
use std::sync::Arc;

/// Writes datasets to object storage in the canonical CSV encoding.
pub struct Stager<S: ObjectStore> {
    store: Arc<S>,
}

impl<S: ObjectStore> Stager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Header row first, columns in schema order, UTF-8, `\n` line endings,
    /// quoting only where needed, nulls as empty cells.
    pub fn encode(dataset: &Dataset) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());

        writer.write_record(dataset.column_names())?;
        for row in dataset.rows() {
            writer.write_record(dataset.columns().iter().map(|c| render_cell(row.get(&c.name))))?;
        }
        writer
            .into_inner()
            .map_err(|e| EtlError::config(format!("CSV buffer flush failed: {}", e)))
    }

    /// Overwrites `location` with the encoded dataset. Returns only after the
    /// store acknowledged a write of the expected size.
    pub async fn stage(&self, dataset: &Dataset, location: &ObjectLocation) -> Result<StagedRef> {
        let body = Self::encode(dataset).map_err(|e| {
            EtlError::staging(location.uri(), BackendError::fatal(format!("encoding failed: {}", e)))
        })?;
        let size = body.len() as u64;

        tracing::debug!("Writing {} bytes to {}", size, location);
        let ack = self
            .store
            .put_object(location, body)
            .await
            .map_err(|e| EtlError::staging(location.uri(), e))?;

        if ack.size != size {
            return Err(EtlError::staging(
                location.uri(),
                BackendError::transient(format!(
                    "store acknowledged {} bytes, expected {}",
                    ack.size, size
                )),
            ));
        }

        tracing::info!("📤 Staged {} rows to {}", dataset.len(), location);
        Ok(StagedRef {
            location: location.clone(),
            row_count: dataset.len(),
            size,
            e_tag: ack.e_tag,
        })
    }
}
