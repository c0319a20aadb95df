//! reqwest-backed [`BackendClient`].

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{BackendClient, BackendError, BackendRequest, BackendResponse, Method};
use crate::config::BackendConfig;

/// HTTP client for the source backend
#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpBackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(Self {
            base_url: config.source_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self, BackendError> {
        Self::new(&BackendConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &BackendRequest) -> Result<reqwest::Url, BackendError> {
        let raw = format!("{}{}", self.base_url, request.path);
        let mut url =
            reqwest::Url::parse(&raw).map_err(|e| BackendError::InvalidUrl(format!("{raw}: {e}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(
                request
                    .query
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
        }
        Ok(url)
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let url = self.url_for(&request)?;
        debug!(method = %request.method, url = %url, "backend request");

        let builder = match request.method {
            Method::Get => self.http_client.get(url),
            Method::Post => self.http_client.post(url),
        };
        let builder = match request.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        };
        let builder = match request.body {
            Some(body) => builder.body(body),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        if !(200..300).contains(&status) {
            warn!(status, path = %request.path, "backend returned non-success status");
        }
        Ok(BackendResponse { status, body })
    }
}
