//! HTTP client utilities.

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::politeness::{PolitenessGovernor, RateLimit};
use crate::config::HttpConfig;
use crate::sources::SourceError;

const RATE_LIMIT_HEADER: &str = "x-rate-limit-limit";
const RATE_INTERVAL_HEADER: &str = "x-rate-limit-interval";

/// Default user agent: crate name and version
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Shared HTTP client; every request is paced through the politeness governor
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Arc<Client>,
    governor: Arc<PolitenessGovernor>,
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new(governor: Arc<PolitenessGovernor>) -> Result<Self, SourceError> {
        Self::with_config(governor, &HttpConfig::default())
    }

    pub fn with_config(governor: Arc<PolitenessGovernor>, config: &HttpConfig) -> Result<Self, SourceError> {
        let user_agent = config.user_agent.clone().unwrap_or_else(default_user_agent);
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
            governor,
        })
    }

    /// Get the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn governor(&self) -> &Arc<PolitenessGovernor> {
        &self.governor
    }

    /// GET `url` as a paced call to `source`, returning the body
    pub async fn get_text(&self, source: &str, url: &str) -> Result<String, SourceError> {
        self.get_text_with_headers(source, url, HeaderMap::new()).await
    }

    pub async fn get_text_with_headers(
        &self,
        source: &str,
        url: &str,
        headers: HeaderMap,
    ) -> Result<String, SourceError> {
        tracing::debug!(source, url, "GET");
        let client = self.client.clone();
        let response = self
            .governor
            .call(source, || async move {
                let response = client.get(url).headers(headers).send().await?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.text().await?;
                Ok::<_, reqwest::Error>(RawResponse { status, headers, body })
            })
            .await?;

        if let Some(rate_limit) = advertised_rate_limit(&response.headers) {
            self.governor.advertise(source, rate_limit).await;
        }

        match response.status {
            status if status.is_success() => Ok(response.body),
            StatusCode::NOT_FOUND => Err(SourceError::NotFound(url.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimit),
            status => Err(SourceError::Api(format!("{} returned status {}", source, status))),
        }
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, source: &str, url: &str) -> Result<T, SourceError> {
        let body = self.get_text(source, url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        source: &str,
        url: &str,
        headers: HeaderMap,
    ) -> Result<T, SourceError> {
        let body = self.get_text_with_headers(source, url, headers).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Rate limit advertised through `X-Rate-Limit-*` response headers
pub fn advertised_rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let limit = headers.get(RATE_LIMIT_HEADER)?.to_str().ok()?;
    let interval = headers.get(RATE_INTERVAL_HEADER)?.to_str().ok()?;
    RateLimit::from_headers(limit, interval)
}

/// Browser-like headers for sources that reject library user agents
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        ),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertised_rate_limit() {
        let mut headers = HeaderMap::new();
        assert!(advertised_rate_limit(&headers).is_none());

        headers.insert(RATE_LIMIT_HEADER, HeaderValue::from_static("50"));
        headers.insert(RATE_INTERVAL_HEADER, HeaderValue::from_static("1s"));
        let limit = advertised_rate_limit(&headers).unwrap();
        assert_eq!(limit.limit, 50);
        assert_eq!(limit.interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_get_text_adopts_advertised_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/works")
            .with_status(200)
            .with_header("x-rate-limit-limit", "5")
            .with_header("x-rate-limit-interval", "2s")
            .with_body("ok")
            .create_async()
            .await;

        let governor = Arc::new(PolitenessGovernor::new());
        let client = HttpClient::new(governor.clone()).unwrap();
        let body = client.get_text("crossref", &format!("{}/works", server.url())).await.unwrap();

        assert_eq!(body, "ok");
        mock.assert_async().await;
        let limit = governor.rate_limit("crossref").await.unwrap();
        assert_eq!(limit.limit, 5);
        assert_eq!(limit.interval, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/missing").with_status(404).create_async().await;
        server.mock("GET", "/busy").with_status(429).create_async().await;

        let client = HttpClient::new(Arc::new(PolitenessGovernor::new())).unwrap();
        let missing = client.get_text("test", &format!("{}/missing", server.url())).await;
        assert!(matches!(missing, Err(SourceError::NotFound(_))));
        let busy = client.get_text("test", &format!("{}/busy", server.url())).await;
        assert!(matches!(busy, Err(SourceError::RateLimit)));
    }
}
