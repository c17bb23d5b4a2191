// 單元測試共用的假憑證

use crate::domain::credentials::{CredentialSet, DatabaseCredentials};

pub fn credentials() -> CredentialSet {
    CredentialSet {
        access_key: "AKIATEST".into(),
        secret_key: "secret".into(),
        region_name: "me-south-1".into(),
        bucket_name: "aiq-landing".into(),
        prefix: String::new(),
        redshift_iam_role: "arn:aws:iam::123456789012:role/RedshiftCopy".into(),
        api_key: Some("test-api-key".into()),
        db: DatabaseCredentials {
            host: "localhost".into(),
            port: 5439,
            user: "etl".into(),
            password: "etl".into(),
            database: "aiq".into(),
        },
    }
}
