use crate::domain::ports::{ObjectStore, PutAck};
use crate::domain::table::ObjectLocation;
use crate::utils::error::BackendError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Object store on the local filesystem: `{base}/{bucket}/{key}`.
///
/// Writes go to a temporary sibling that is synced and then renamed over
/// the destination, so a reader sees either the old object or the new one.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn path_of(&self, location: &ObjectLocation) -> PathBuf {
        Path::new(&self.base_path).join(&location.bucket).join(&location.key)
    }
}

fn io_error(context: &str, path: &Path, err: std::io::Error) -> BackendError {
    let message = format!("{} {}: {}", context, path.display(), err);
    match err.kind() {
        ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::InvalidInput => {
            BackendError::fatal(message)
        }
        _ => BackendError::transient(message),
    }
}

/// Writes `body` to `tmp_path`, syncs it, then renames it onto `full_path`.
async fn write_and_swap(tmp_path: &Path, full_path: &Path, body: &[u8]) -> Result<(), BackendError> {
    let mut file = tokio::fs::File::create(tmp_path)
        .await
        .map_err(|e| io_error("cannot create", tmp_path, e))?;
    file.write_all(body)
        .await
        .map_err(|e| io_error("cannot write", tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| io_error("cannot sync", tmp_path, e))?;
    drop(file);

    tokio::fs::rename(tmp_path, full_path)
        .await
        .map_err(|e| io_error("cannot rename onto", full_path, e))
}

impl ObjectStore for LocalObjectStore {
    async fn put_object(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<PutAck, BackendError> {
        let full_path = self.path_of(location);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("cannot create", parent, e))?;
        }

        let mut tmp_name = full_path.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        if let Err(e) = write_and_swap(&tmp_path, &full_path, &body).await {
            // 失敗時不留下半寫的 .tmp
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!("⚠️ Could not remove {}: {}", tmp_path.display(), cleanup);
                }
            }
            return Err(e);
        }

        let size = tokio::fs::metadata(&full_path)
            .await
            .map_err(|e| io_error("cannot stat", &full_path, e))?
            .len();
        Ok(PutAck { size, e_tag: None })
    }

    async fn head_object(&self, location: &ObjectLocation) -> Result<Option<u64>, BackendError> {
        let full_path = self.path_of(location);
        match tokio::fs::metadata(&full_path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("cannot stat", &full_path, e)),
        }
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Vec<u8>, BackendError> {
        let full_path = self.path_of(location);
        tokio::fs::read(&full_path)
            .await
            .map_err(|e| io_error("cannot read", &full_path, e))
    }
}
