use crate::url_codec::validate_source_url;
use crate::ProxyError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Maximum redirect hops followed for one source fetch.
const MAX_REDIRECTS: usize = 5;

/// Outbound retrieval of source images.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, ProxyError>;
}

/// Fetches sources over HTTP(S) with a bounded timeout and body size.
pub struct HttpFetcher {
    client: Client,
    max_size: usize,
}

impl HttpFetcher {
    /// Builds the shared client.
    ///
    /// Redirect targets are re-validated like the requested URL, so a public
    /// host cannot bounce the fetch onto a private address.
    pub fn new(
        timeout: Duration,
        max_size: usize,
        allow_private_hosts: bool,
    ) -> Result<Self, ProxyError> {
        let redirects = Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error(ProxyError::UpstreamFetch("Too many redirects".into()));
            }
            match validate_source_url(attempt.url().as_str(), allow_private_hosts) {
                Ok(_) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        });

        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirects)
            .build()
            .map_err(|e| ProxyError::UpstreamFetch(format!("HTTP client init: {}", e)))?;

        Ok(Self { client, max_size })
    }
}

#[async_trait::async_trait]
impl SourceFetcher for HttpFetcher {
    /// Downloads the source body.
    ///
    /// # Errors
    /// Returns `ProxyError::UpstreamFetch` if:
    /// - the request fails, times out or returns non-2xx
    /// - the body exceeds the size limit (checked against Content-Length
    ///   and again while streaming)
    async fn fetch(&self, url: &Url) -> Result<Bytes, ProxyError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProxyError::UpstreamFetch(format!(
                "Upstream status: {}",
                resp.status()
            )));
        }

        // not trusted; the decoder sniffs the format from the bytes
        if let Some(ct) = resp.headers().get(reqwest::header::CONTENT_TYPE) {
            debug!("Source {} declared Content-Type {:?}", url, ct);
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_size as u64 {
                return Err(ProxyError::UpstreamFetch(format!(
                    "Source of {} bytes exceeds size limit",
                    len
                )));
            }
        }

        // Content-Length can lie; enforce the limit on what actually arrives
        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| ProxyError::UpstreamFetch(e.to_string()))?
        {
            if buf.len() + chunk.len() > self.max_size {
                return Err(ProxyError::UpstreamFetch("Source exceeds size limit".into()));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }
}
