use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{SyncError, SyncResult};
use crate::metrics::MetricsTracker;

const USER_AGENT: &str = concat!("manga_sync/", env!("CARGO_PKG_VERSION"));

/// Configuration for the JSON transport used by source adapters
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    /// Bearer token sent on every request when present
    pub auth_token: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            auth_token: None,
        }
    }
}

/// HTTP transport bound to one source. Failures are reported once and never
/// retried; a failed title is re-run by invoking the sync again.
pub struct SourceClient {
    client: Client,
    source: String,
    auth_token: Option<String>,
    metrics: Arc<MetricsTracker>,
}

impl SourceClient {
    pub fn new(
        source: &str,
        config: HttpClientConfig,
        metrics: Arc<MetricsTracker>,
    ) -> SyncResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| SyncError::Config(format!("http client for {}: {}", source, e)))?;

        Ok(Self {
            client,
            source: source.to_string(),
            auth_token: config.auth_token,
            metrics,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source
    }

    /// GET `url` with `query` and decode the JSON body into `T`.
    ///
    /// Transport errors and non-2xx statuses (including 401/403 from a
    /// missing token) become `SourceUnavailable`; a body that does not
    /// match `T` becomes `SourceFormat` carrying a payload excerpt.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> SyncResult<T> {
        let start = Instant::now();

        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(format!("GET {}: {}", url, e), None)),
        };

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(self.fail(
                format!("GET {} returned HTTP {}", final_url, status),
                Some(status.as_u16()),
            ));
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Err(self.fail(format!("reading body of {}: {}", final_url, e), None)),
        };

        match serde_json::from_str::<T>(&text) {
            Ok(value) => {
                self.metrics.record_success(&self.source, start.elapsed());
                Ok(value)
            }
            Err(e) => {
                let err = SyncError::source_format(&self.source, &final_url, &text, e);
                log::error!("[{}] {}", self.source, err);
                self.metrics.record_failure(&self.source, &err, None);
                Err(err)
            }
        }
    }

    fn fail(&self, message: String, status: Option<u16>) -> SyncError {
        let err = SyncError::SourceUnavailable {
            provider: self.source.clone(),
            message,
        };
        self.metrics.record_failure(&self.source, &err, status);
        err
    }
}
