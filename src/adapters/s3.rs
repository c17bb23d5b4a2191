use crate::domain::credentials::CredentialSet;
use crate::domain::ports::{ObjectStore, PutAck};
use crate::domain::table::ObjectLocation;
use crate::utils::error::BackendError;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client as S3Client;

const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "RequestTimeout",
    "ServiceUnavailable",
    "InternalError",
];

pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Client from the resolved credential set. `endpoint_url` points at an
    /// S3-compatible service (MinIO, LocalStack) instead of AWS.
    pub async fn from_credentials(creds: &CredentialSet, endpoint_url: Option<&str>) -> Self {
        let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let credentials = Credentials::new(
            creds.access_key.clone(),
            creds.secret_key.clone(),
            None,
            None,
            "staged-etl",
        );
        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .region(Region::new(creds.region_name.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);
        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        Self::new(S3Client::from_conf(builder.build()))
    }
}

fn backend_error<E>(operation: &str, location: &ObjectLocation, err: SdkError<E, HttpResponse>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.code().map(str::to_string);
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(service) => {
            service.raw().status().as_u16() >= 500
                || code.as_deref().map(|c| TRANSIENT_CODES.contains(&c)).unwrap_or(false)
        }
        _ => false,
    };
    let message = format!("{} {} failed: {}", operation, location, DisplayErrorContext(&err));
    let backend = if transient {
        BackendError::transient(message)
    } else {
        BackendError::fatal(message)
    };
    match code {
        Some(code) => backend.with_code(code),
        None => backend,
    }
}

impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<PutAck, BackendError> {
        let size = body.len() as u64;
        let output = self
            .client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .content_type("text/csv")
            .body(body.into())
            .send()
            .await
            .map_err(|e| backend_error("PutObject", location, e))?;

        Ok(PutAck {
            size,
            e_tag: output.e_tag().map(str::to_string),
        })
    }

    async fn head_object(&self, location: &ObjectLocation) -> Result<Option<u64>, BackendError> {
        let result = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(output.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) => Ok(None),
            Err(err) => Err(backend_error("HeadObject", location, err)),
        }
    }

    async fn get_object(&self, location: &ObjectLocation) -> Result<Vec<u8>, BackendError> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| backend_error("GetObject", location, e))?;

        let data = output.body.collect().await.map_err(|e| {
            BackendError::transient(format!("reading {} failed: {}", location, e))
        })?;
        Ok(data.into_bytes().to_vec())
    }
}
