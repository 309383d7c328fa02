//! S3-compatible remote archive using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::remote::RemoteArchive;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use tracing::instrument;

/// Region used when none is configured; R2 requires "auto".
const DEFAULT_REGION: &str = "us-east-1";

/// Map an HTTP status from the object store to a storage error.
pub(crate) fn classify_status(status: u16, key: &str, message: String) -> StorageError {
    match status {
        404 => StorageError::NotFound(key.to_string()),
        401 | 403 => StorageError::Fatal(format!("access denied ({status}): {message}")),
        408 | 429 | 500..=599 => StorageError::Transient(format!("status {status}: {message}")),
        _ => StorageError::Fatal(format!("status {status}: {message}")),
    }
}

/// Convert an AWS SDK error into a transient or fatal storage error.
fn classify_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(service_err) => {
            classify_status(service_err.raw().status().as_u16(), key, message)
        }
        SdkError::ConstructionFailure(_) => StorageError::Fatal(message),
        // Timeouts, connection failures and unparseable responses.
        _ => StorageError::Transient(message),
    }
}

/// S3-compatible archive (AWS S3, MinIO, Cloudflare R2).
pub struct S3Archive {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: Option<String>,
    region: String,
}

impl std::fmt::Debug for S3Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Archive")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Archive {
    /// Create a new S3 archive client.
    ///
    /// Without explicit credentials the default AWS credential chain is used.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if bucket.is_empty() {
            return Err(StorageError::Config("s3 bucket cannot be empty".to_string()));
        }
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id,
                secret,
                None, // session token
                None, // expiration
                "picvault-config",
            );
            builder = builder.credentials_provider(credentials);
        } else {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(resolved_region.clone()))
                .load()
                .await;
            if let Some(provider) = shared.credentials_provider() {
                builder = builder.credentials_provider(provider);
            }
        }

        let normalized_endpoint = endpoint.map(|endpoint_url| {
            // Bare host:port endpoints (e.g. "minio:9000") default to http.
            let lower = endpoint_url.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint_url
            } else {
                format!("http://{endpoint_url}")
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            builder = builder.endpoint_url(endpoint_url);
            // Plain-HTTP endpoints do not need native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            builder = builder.force_path_style(true);
        }

        // Strip trailing slashes to avoid "prefix//key".
        let prefix = prefix
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix,
            endpoint: normalized_endpoint,
            region: resolved_region,
        })
    }

    /// Endpoint URL of the R2 account `account_id`.
    pub fn r2_endpoint(account_id: &str) -> String {
        format!("https://{account_id}.r2.cloudflarestorage.com")
    }

    /// Create a Cloudflare R2 client for `account_id`.
    pub async fn r2(
        account_id: &str,
        bucket: &str,
        prefix: Option<String>,
        access_key_id: String,
        secret_access_key: String,
    ) -> StorageResult<Self> {
        Self::new(
            bucket,
            Some(Self::r2_endpoint(account_id)),
            Some("auto".to_string()),
            prefix,
            Some(access_key_id),
            Some(secret_access_key),
            true,
        )
        .await
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Full object key with the configured prefix applied.
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl RemoteArchive for S3Archive {
    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_type(content_type)
            .body(data.into())
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, key))?;

        // A body cut off mid-transfer is a network failure.
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("reading body of {key}: {e}")))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // delete_object succeeds for missing keys.
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match classify_sdk_error(e, key) {
                StorageError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify_sdk_error(e, key) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &self.bucket))?;
        Ok(())
    }
}
