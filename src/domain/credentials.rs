use crate::domain::table::StorageConfig;
use serde::Deserialize;
use std::fmt;

const REDACTED: &str = "***";

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseCredentials {
    pub host: String,
    pub port: u16,
    #[serde(alias = "username")]
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("database", &self.database)
            .finish()
    }
}

/// Everything the pipeline needs to reach storage, the warehouse and the
/// upstream APIs. Resolved by a `CredentialProvider`, never parsed by the core.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialSet {
    pub access_key: String,
    pub secret_key: String,
    pub region_name: String,
    pub bucket_name: String,
    #[serde(default)]
    pub prefix: String,
    /// Role the warehouse assumes to read staged objects during COPY.
    pub redshift_iam_role: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub db: DatabaseCredentials,
}

impl CredentialSet {
    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            bucket: self.bucket_name.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_key", &self.access_key)
            .field("secret_key", &REDACTED)
            .field("region_name", &self.region_name)
            .field("bucket_name", &self.bucket_name)
            .field("prefix", &self.prefix)
            .field("redshift_iam_role", &self.redshift_iam_role)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("db", &self.db)
            .finish()
    }
}
