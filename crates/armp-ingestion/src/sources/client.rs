//! Rate-limited JSON client shared by the HTTP source adapters.
//!
//! Classifies failures into the pipeline's error taxonomy: timeouts,
//! connection errors, HTTP 429 and 5xx become [`SourceError::Transient`];
//! other non-success statuses become [`SourceError::Rejected`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, ClientBuilder, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use armp_common::SourceSystem;

use super::SourceSettings;
use crate::error::SourceError;
use crate::throttle::RateLimiter;

const MAX_ERROR_BODY: usize = 200;

#[derive(Debug)]
pub struct SourceClient {
    system: SourceSystem,
    client: Client,
    base_url: Url,
    limiter: RateLimiter,
}

impl SourceClient {
    pub fn new(system: SourceSystem, settings: &SourceSettings) -> Result<Self, SourceError> {
        let config_error = |message: String| SourceError::Config { system, message };

        let base_url = Url::parse(settings.base_url.trim_end_matches('/'))
            .map_err(|e| config_error(format!("invalid base URL {}: {e}", settings.base_url)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(config_error(format!("unsupported scheme in {}", settings.base_url)));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let user_agent = match &settings.mailto {
            Some(mailto) => format!("{} (mailto:{mailto})", settings.user_agent),
            None => settings.user_agent.clone(),
        };

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| config_error(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            system,
            client,
            base_url,
            limiter: RateLimiter::from_millis(settings.min_interval_ms),
        })
    }

    pub fn system(&self) -> SourceSystem {
        self.system
    }

    /// `base_url` joined with a relative endpoint path.
    pub fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| SourceError::Config {
            system: self.system,
            message: format!("invalid endpoint {joined}: {e}"),
        })
    }

    /// GET a JSON document. Waits for the source's rate limiter first.
    #[instrument(skip(self, query), fields(source = %self.system))]
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, SourceError> {
        let url = self.endpoint(path)?;
        self.limiter.wait().await;

        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transient(describe_request_error(&e)))?;

        let status = resp.status();
        debug!(status = status.as_u16(), "Source responded");

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(self.transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Rejected {
                system: self.system,
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        // A truncated body usually means the connection dropped mid-transfer.
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| self.transient(format!("unreadable JSON body: {e}")))
    }

    fn transient(&self, message: String) -> SourceError {
        SourceError::Transient { system: self.system, message }
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timeout: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
