use std::path::Path;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{already_present, write_stream_atomically, ArchiveFetcher, FetchOptions, FetchResult};
use crate::error::IngestError;

/// Streams `http://` and `https://` sources with reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(options: &FetchOptions) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| IngestError::Config(format!("header name '{name}': {e}")))?;
            let mut value = HeaderValue::from_str(value)
                .map_err(|e| IngestError::Config(format!("header '{name}': {e}")))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| IngestError::Config(format!("http client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(
        &self,
        source_url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchResult, IngestError> {
        if let Some(existing) = already_present(dest).await? {
            return Ok(existing);
        }

        debug!(url = source_url, "requesting archive");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            resp = self.client.get(source_url).send() => {
                resp.map_err(|e| IngestError::fetch(source_url, e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::fetch(source_url, format!("HTTP {status}")));
        }

        let size_bytes =
            write_stream_atomically(source_url, response.bytes_stream(), dest, cancel).await?;

        info!(
            url = source_url,
            path = %dest.display(),
            size_bytes,
            "archive downloaded"
        );
        Ok(FetchResult {
            path: dest.to_path_buf(),
            size_bytes,
            skipped: false,
        })
    }
}
