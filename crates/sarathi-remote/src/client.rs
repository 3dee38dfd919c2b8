//! Shared HTTP plumbing for the backend clients.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use sarathi_core::config::BackendConfig;
use sarathi_core::error::{Result, SarathiError};

/// Connection to the configured backend origin.
///
/// The inner `reqwest::Client` carries only a connect timeout so that
/// answer streams can run as long as the server keeps sending; JSON calls
/// add the configured per-request timeout.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SarathiError::Config(
                "backend base_url is not configured".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            base_url,
            client,
            timeout,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).timeout(self.timeout)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).timeout(self.timeout)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path)).timeout(self.timeout)
    }

    /// Send a request and decode a JSON body from a 2xx response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = send_checked(request).await?;
        response.json::<T>().await.map_err(|e| {
            SarathiError::Serialization(format!("Invalid response body: {}", e))
        })
    }

    /// Send a request whose response body is ignored.
    pub async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        send_checked(request).await.map(|_| ())
    }
}

/// Send a request, mapping non-2xx statuses to `SarathiError::Service`.
pub async fn send_checked(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SarathiError::Service(format!("{}: {}", status.as_u16(), body)))
}

pub fn transport_error(err: reqwest::Error) -> SarathiError {
    if err.is_timeout() {
        SarathiError::Transport(format!("request timed out: {}", err))
    } else {
        SarathiError::Transport(err.to_string())
    }
}

/// Encode a value for use as one URL path segment.
pub fn path_segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
