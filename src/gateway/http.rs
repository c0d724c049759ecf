//! Gateway delivering files with HTTP `PUT`.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::time::timeout;
use url::Url;

use crate::gateway::traits::is_plain_file_name;
use crate::gateway::{GatewayError, UploadGateway, UploadOutcome};
use crate::storage::InstrumentId;

/// Map a response status to an upload outcome.
pub fn classify_status(status: StatusCode) -> UploadOutcome {
    match status {
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => UploadOutcome::Succeeded,
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => UploadOutcome::AlreadyExists,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            UploadOutcome::GatewayNotReady
        }
        other => UploadOutcome::Unrecognized(format!("HTTP {}", other.as_u16())),
    }
}

/// `PUT <base_url>/<instrument_id>/<filename>` with `If-None-Match: *`, so
/// the store refuses to overwrite an existing object.
pub struct HttpGateway {
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
    client: Client,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url.as_str())
            .field("has_token", &self.token.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Create a gateway for a base URL.
    ///
    /// # Errors
    /// `Config` if the URL cannot carry path segments, `Client` if the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Self::with_client(base_url, token, request_timeout, client)
    }

    pub(crate) fn with_client(
        base_url: &str,
        token: Option<String>,
        request_timeout: Duration,
        client: Client,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::Config(format!("invalid base_url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "base_url '{base_url}' cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            token: token.filter(|t| !t.is_empty()),
            timeout: request_timeout,
            client,
        })
    }

    /// Target URL for one file.
    pub fn object_url(&self, instrument_id: InstrumentId, filename: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&instrument_id.to_string())
                .push(filename);
        }
        url
    }
}

#[async_trait::async_trait]
impl UploadGateway for HttpGateway {
    fn describe(&self) -> String {
        format!("http:{}", self.base_url)
    }

    async fn upload(
        &self,
        instrument_id: InstrumentId,
        filename: &str,
        content: &[u8],
    ) -> UploadOutcome {
        if !is_plain_file_name(filename) {
            return UploadOutcome::Unrecognized(format!("invalid file name '{filename}'"));
        }

        let url = self.object_url(instrument_id, filename);
        let mut request = self
            .client
            .put(url.clone())
            .header(reqwest::header::IF_NONE_MATCH, "*")
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => {
                let status = response.status();
                let outcome = classify_status(status);
                tracing::debug!(
                    url = %url,
                    status = status.as_u16(),
                    outcome = %outcome,
                    "HTTP upload answered"
                );
                outcome
            }
            Ok(Err(e)) if e.is_connect() || e.is_timeout() => {
                tracing::debug!(url = %url, error = %e, "HTTP store unreachable");
                UploadOutcome::GatewayNotReady
            }
            Ok(Err(e)) => UploadOutcome::Unrecognized(format!("request failed: {e}")),
            Err(_) => {
                tracing::debug!(
                    url = %url,
                    timeout_ms = self.timeout.as_millis(),
                    "HTTP upload timed out"
                );
                UploadOutcome::GatewayNotReady
            }
        }
    }
}
