//! Backend device listing client.
//!
//! Retrieves the monitoring station list from the flood dashboard backend
//! (`GET /api/devices`, bearer-token authenticated). The response is the
//! backend's standard collection envelope:
//!
//! ```json
//! { "data": [ { "id": 1, "name": "...", "latitude": "-6.63", "longitude": "106.83", ... } ] }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;

use crate::config::EndpointConfig;
use crate::ingest::DeviceSource;
use crate::model::FetchError;

// ============================================================================
// HTTP source
// ============================================================================

/// Device source backed by the dashboard REST API.
#[derive(Debug, Clone)]
pub struct HttpDeviceSource {
    client: reqwest::Client,
    url: String,
    api_token: Option<String>,
}

impl HttpDeviceSource {
    /// Builds a source from endpoint configuration.
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: build_devices_url(&endpoint.base_url, &endpoint.path),
            api_token: endpoint.api_token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeviceSource for HttpDeviceSource {
    async fn fetch_raw(&self) -> Result<Value, FetchError> {
        let mut request = self.client.get(&self.url).header(ACCEPT, "application/json");
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(FetchError::Http(response.status().as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::InvalidShape(format!("body is not JSON: {}", e)))
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transport(format!("timed out: {}", err))
    } else {
        FetchError::Transport(err.to_string())
    }
}

/// Joins base URL and path with exactly one slash between them.
pub fn build_devices_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_devices_url_normalises_slashes() {
        assert_eq!(
            build_devices_url("http://localhost:8000/api/", "/devices"),
            "http://localhost:8000/api/devices"
        );
        assert_eq!(
            build_devices_url("http://localhost:8000/api", "devices"),
            "http://localhost:8000/api/devices"
        );
    }

    #[test]
    fn test_source_uses_configured_url() {
        let endpoint = EndpointConfig {
            base_url: "https://banjir.example.org/api".to_string(),
            path: "devices".to_string(),
            api_token: None,
            timeout_secs: 5,
        };
        let source = HttpDeviceSource::new(&endpoint).expect("client should build");
        assert_eq!(source.url(), "https://banjir.example.org/api/devices");
    }

    #[tokio::test]
    #[ignore] // Don't run in CI - depends on a running backend
    async fn live_backend_returns_device_listing() {
        let endpoint = EndpointConfig::default();
        let source = HttpDeviceSource::new(&endpoint).expect("client should build");
        let body = source
            .fetch_raw()
            .await
            .unwrap_or_else(|e| panic!("GET {} failed: {}", source.url(), e));
        let records = crate::ingest::unwrap_records(body).expect("listing should be an array");
        println!("{} devices at {}", records.len(), source.url());
    }
}
