use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use objdet_core::config::AwsConfig;

use super::{already_present, write_stream_atomically, ArchiveFetcher, FetchOptions, FetchResult};
use crate::error::IngestError;

/// Fetches `s3://bucket/key` and `file:///abs/path` sources through object_store.
pub struct ObjectStoreFetcher {
    options: FetchOptions,
    aws: AwsConfig,
}

impl ObjectStoreFetcher {
    pub fn new(options: FetchOptions, aws: AwsConfig) -> Self {
        Self { options, aws }
    }

    /// Build a store for `source_url` and the object path inside it.
    fn resolve(&self, source_url: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath), IngestError> {
        let url = Url::parse(source_url).map_err(|e| IngestError::fetch(source_url, e))?;
        match url.scheme() {
            "file" => {
                let local = url
                    .to_file_path()
                    .map_err(|_| IngestError::fetch(source_url, "not an absolute file path"))?;
                let location = ObjectPath::from_absolute_path(&local)
                    .map_err(|e| IngestError::fetch(source_url, e))?;
                Ok((Arc::new(LocalFileSystem::new()), location))
            }
            "s3" => {
                let bucket = url
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| IngestError::fetch(source_url, "missing bucket"))?;
                let key = url.path().trim_start_matches('/');
                if key.is_empty() {
                    return Err(IngestError::fetch(source_url, "missing object key"));
                }
                let store = self.s3_store(bucket)?;
                let location =
                    ObjectPath::parse(key).map_err(|e| IngestError::fetch(source_url, e))?;
                Ok((store, location))
            }
            other => Err(IngestError::fetch(
                source_url,
                format!("unsupported scheme '{other}'"),
            )),
        }
    }

    fn s3_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, IngestError> {
        let client_options = ClientOptions::new()
            .with_connect_timeout(self.options.connect_timeout)
            .with_timeout(self.options.timeout);

        let mut builder = AmazonS3Builder::new()
            .with_region(&self.aws.region)
            .with_bucket_name(bucket)
            .with_client_options(client_options);

        if let Some(ref key) = self.aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = self.aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = self.aws.session_token {
            builder = builder.with_token(token);
        }
        if let Some(ref endpoint) = self.aws.endpoint_url {
            if !endpoint.is_empty() {
                // object_store requires an absolute endpoint URL
                let endpoint_url =
                    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                        endpoint.clone()
                    } else {
                        format!("https://{endpoint}")
                    };
                builder = builder
                    .with_endpoint(&endpoint_url)
                    .with_allow_http(endpoint_url.starts_with("http://"));
            }
        }

        let store = builder
            .build()
            .map_err(|e| IngestError::Config(format!("s3 client for bucket '{bucket}': {e}")))?;
        Ok(Arc::new(store))
    }
}

#[async_trait]
impl ArchiveFetcher for ObjectStoreFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchResult, IngestError> {
        if let Some(existing) = already_present(dest).await? {
            return Ok(existing);
        }

        let (store, location) = self.resolve(source_url)?;
        debug!(url = source_url, %location, "requesting object");

        let object = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            got = store.get(&location) => got.map_err(|e| IngestError::fetch(source_url, e))?,
        };

        let size_bytes =
            write_stream_atomically(source_url, object.into_stream(), dest, cancel).await?;

        info!(
            url = source_url,
            path = %dest.display(),
            size_bytes,
            "archive copied from object store"
        );
        Ok(FetchResult {
            path: dest.to_path_buf(),
            size_bytes,
            skipped: false,
        })
    }
}
