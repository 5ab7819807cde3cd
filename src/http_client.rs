//! HTTP client shared by all source plugins.
//!
//! Features:
//! - Connection pooling with keep-alive, HTTP/2 when the server offers it
//! - Brotli, Gzip compression (auto-negotiated)
//! - Charset decoding for legacy-encoded pages (`request(url, Some("windows-1251"))`)
//! - Per-host politeness through [`HostGate`]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::error::PluginError;
use crate::gate::{GatePermit, HostGate};

/// User-Agent sent to every source.
pub const USER_AGENT: &str = concat!(
    "reelscan/",
    env!("CARGO_PKG_VERSION"),
    " (movie jukebox metadata scanner)"
);

/// A successful response that keeps its host permit until the body is read.
#[derive(Debug)]
pub struct GatedResponse {
    response: Response,
    permit: GatePermit,
}

impl GatedResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Read the body as UTF-8, then release the permit.
    pub async fn text(self) -> Result<String, PluginError> {
        let Self { response, permit } = self;
        let body = response.text().await;
        drop(permit);
        Ok(body?)
    }

    /// Read the body, decoding with `charset` unless the server declares one.
    pub async fn text_with_charset(self, charset: &str) -> Result<String, PluginError> {
        let Self { response, permit } = self;
        let body = response.text_with_charset(charset).await;
        drop(permit);
        Ok(body?)
    }
}

/// HTTP client that routes every request through the host gate.
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: Client,
    gate: Arc<HostGate>,
}

impl SourceClient {
    /// Create a client with default per-host limits.
    pub fn new() -> Result<Self> {
        Self::with_gate(HostGate::default())
    }

    /// Create a client using the given politeness gate.
    pub fn with_gate(gate: HostGate) -> Result<Self> {
        let client = Client::builder()
            // Let the server negotiate HTTP/2
            .http2_adaptive_window(true)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .brotli(true)
            .gzip(true)
            .deflate(true)
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            gate: Arc::new(gate),
        })
    }

    /// Send a GET through the gate and fail on non-success status.
    pub async fn fetch(&self, url: &str) -> Result<GatedResponse, PluginError> {
        self.fetch_localized(url, None).await
    }

    /// Like [`fetch`](Self::fetch), asking for `language` via `Accept-Language`.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_localized(&self, url: &str, language: Option<&str>) -> Result<GatedResponse, PluginError> {
        let host = host_of(url)?;
        let permit = self.gate.acquire(&host).await?;

        debug!("Fetching");
        let mut request = self.client.get(url);
        if let Some(language) = language {
            request = request.header(reqwest::header::ACCEPT_LANGUAGE, language);
        }
        let response = request.send().await?;

        info!(
            status = %response.status(),
            version = ?response.version(),
            "Response received"
        );

        if !response.status().is_success() {
            return Err(PluginError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(GatedResponse { response, permit })
    }

    /// Fetch a page as text.
    ///
    /// The response's declared charset wins; `charset` is the fallback when
    /// the server does not declare one (UTF-8 if `None`).
    pub async fn request(&self, url: &str, charset: Option<&str>) -> Result<String, PluginError> {
        self.fetch(url)
            .await?
            .text_with_charset(charset.unwrap_or("utf-8"))
            .await
    }

    /// Fetch a UTF-8 page in the given language.
    pub async fn request_localized(&self, url: &str, language: Option<&str>) -> Result<String, PluginError> {
        self.fetch_localized(url, language).await?.text().await
    }

    /// Fetch and deserialize a JSON document.
    pub async fn request_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PluginError> {
        let body = self.request(url, None).await?;
        let value = serde_json::from_str(&body)?;
        Ok(value)
    }

    pub fn gate(&self) -> &HostGate {
        &self.gate
    }

    /// Get the underlying reqwest client
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Lower-cased host name of `url`.
pub fn host_of(url: &str) -> Result<String, PluginError> {
    let parsed = url::Url::parse(url).map_err(|e| PluginError::parse(format!("invalid URL {url}: {e}")))?;
    parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| PluginError::parse(format!("URL has no host: {url}")))
}
