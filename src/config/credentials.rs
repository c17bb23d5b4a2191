use crate::domain::credentials::{CredentialSet, DatabaseCredentials};
use crate::domain::ports::CredentialProvider;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Reads a JSON credential document from disk on every resolve, so a rotated
/// file is picked up by the next run.
#[derive(Debug, Clone)]
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn credentials(&self) -> Result<CredentialSet> {
        let content = tokio::fs::read(&self.path).await.map_err(|e| {
            EtlError::config(format!("cannot read credential file {}: {}", self.path.display(), e))
        })?;
        serde_json::from_slice(&content).map_err(|e| {
            EtlError::config(format!("invalid credential file {}: {}", self.path.display(), e))
        })
    }
}

/// `ETL_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve_with<F>(lookup: F) -> Result<CredentialSet>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| EtlError::MissingConfigError {
                    field: name.to_string(),
                })
        };

        let port = match lookup("ETL_DB_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| EtlError::InvalidConfigValueError {
                field: "ETL_DB_PORT".to_string(),
                value: raw.clone(),
                reason: "port must be a number between 0 and 65535".to_string(),
            })?,
            None => 5439,
        };

        Ok(CredentialSet {
            access_key: required("ETL_ACCESS_KEY")?,
            secret_key: required("ETL_SECRET_KEY")?,
            region_name: required("ETL_REGION_NAME")?,
            bucket_name: required("ETL_BUCKET_NAME")?,
            prefix: lookup("ETL_PREFIX").unwrap_or_default(),
            redshift_iam_role: required("ETL_REDSHIFT_IAM_ROLE")?,
            api_key: lookup("ETL_API_KEY").filter(|v| !v.is_empty()),
            db: DatabaseCredentials {
                host: required("ETL_DB_HOST")?,
                port,
                user: required("ETL_DB_USER")?,
                password: required("ETL_DB_PASSWORD")?,
                database: required("ETL_DB_NAME")?,
            },
        })
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn credentials(&self) -> Result<CredentialSet> {
        Self::resolve_with(|name| std::env::var(name).ok())
    }
}

/// An already resolved set.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub CredentialSet);

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<CredentialSet> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env() -> HashMap<&'static str, &'static str> {
        [
            ("ETL_ACCESS_KEY", "AKIA123"),
            ("ETL_SECRET_KEY", "secret"),
            ("ETL_REGION_NAME", "me-south-1"),
            ("ETL_BUCKET_NAME", "aiq-landing"),
            ("ETL_PREFIX", "etl/"),
            ("ETL_REDSHIFT_IAM_ROLE", "arn:aws:iam::1:role/copy"),
            ("ETL_DB_HOST", "cluster.redshift.amazonaws.com"),
            ("ETL_DB_USER", "etl"),
            ("ETL_DB_PASSWORD", "pw"),
            ("ETL_DB_NAME", "aiq"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_env_credentials() {
        let vars = env();
        let creds = EnvCredentialProvider::resolve_with(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.db.port, 5439);
        assert_eq!(creds.prefix, "etl/");
        assert_eq!(creds.api_key, None);
        assert_eq!(creds.storage().bucket, "aiq-landing");
    }

    #[test]
    fn test_env_credentials_missing_field() {
        let mut vars = env();
        vars.remove("ETL_DB_PASSWORD");
        let err = EnvCredentialProvider::resolve_with(|k| vars.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(err.to_string().contains("ETL_DB_PASSWORD"));

        let mut vars = env();
        vars.insert("ETL_DB_PORT", "redshift");
        assert!(EnvCredentialProvider::resolve_with(|k| vars.get(k).map(|v| v.to_string())).is_err());
    }

    #[tokio::test]
    async fn test_file_credentials() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
  "access_key": "AKIA123",
  "secret_key": "secret",
  "region_name": "me-south-1",
  "bucket_name": "aiq-landing",
  "redshift_iam_role": "arn:aws:iam::1:role/copy",
  "api_key": "weather-key",
  "db": {{"host": "localhost", "port": 5439, "username": "etl", "password": "pw", "database": "aiq"}}
}}"#
        )
        .unwrap();

        let creds = FileCredentialProvider::new(file.path()).credentials().await.unwrap();
        assert_eq!(creds.db.user, "etl");
        assert_eq!(creds.prefix, "");
        assert_eq!(creds.api_key.as_deref(), Some("weather-key"));

        let err = FileCredentialProvider::new("/nonexistent/creds.json")
            .credentials()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::utils::error::ErrorKind::Config);
    }
}
