//! Upload gateway trait and outcome classification.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::InstrumentId;

/// Default HTTP request timeout (60 seconds).
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

fn default_http_timeout() -> Duration {
    DEFAULT_HTTP_TIMEOUT
}

/// Errors building a gateway session.
///
/// Individual uploads never fail with this type; they report an
/// [`UploadOutcome`] instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Destination configuration is unusable.
    #[error("gateway config error: {0}")]
    Config(String),

    /// HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of one delivery attempt.
///
/// Consumed immediately by the collection loop; never stored on the file.
#[derive(Debug, Clone, PartialEq, Eq, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum UploadOutcome {
    /// Bytes durably accepted by the remote store.
    Succeeded,
    /// A file with this identity is already present remotely.
    AlreadyExists,
    /// Transport or session is not usable; not the file's fault.
    GatewayNotReady,
    /// Anything outside the known set, with a description of what was seen.
    Unrecognized(String),
}

impl std::fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrecognized(detail) => write!(f, "unrecognized ({detail})"),
            other => f.write_str(other.as_ref()),
        }
    }
}

/// Where and how files are delivered. Supplied once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DestinationConfig {
    /// Remote store mounted as a directory tree.
    Directory {
        /// Root of the store; files land in `<base_dir>/<instrument_id>/`.
        base_dir: PathBuf,
    },
    /// Remote store accepting `PUT` requests.
    Http {
        /// Base URL; files land at `<base_url>/<instrument_id>/<filename>`.
        base_url: String,
        /// Optional bearer token. Supports `${VAR}` substitution.
        #[serde(default)]
        token: Option<String>,
        /// Per-request timeout (default: 60s).
        #[serde(default = "default_http_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

impl DestinationConfig {
    /// Directory destination.
    pub fn directory(base_dir: impl Into<PathBuf>) -> Self {
        Self::Directory {
            base_dir: base_dir.into(),
        }
    }

    /// HTTP destination without authentication.
    pub fn http(base_url: impl Into<String>) -> Self {
        Self::Http {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Validate the destination without touching the network or disk.
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self {
            Self::Directory { base_dir } => {
                if base_dir.as_os_str().is_empty() {
                    return Err(GatewayError::Config("base_dir cannot be empty".into()));
                }
            }
            Self::Http {
                base_url, timeout, ..
            } => {
                let url = url::Url::parse(base_url).map_err(|e| {
                    GatewayError::Config(format!("invalid base_url '{base_url}': {e}"))
                })?;
                if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
                    return Err(GatewayError::Config(format!(
                        "base_url '{base_url}' must be an http(s) URL"
                    )));
                }
                if timeout.is_zero() {
                    return Err(GatewayError::Config("timeout must be positive".into()));
                }
            }
        }
        Ok(())
    }
}

/// A connected session to the remote store.
///
/// Shared by all instrument tasks behind an `Arc`; implementations must be
/// internally synchronized. No retry happens here: every call is exactly one
/// delivery attempt.
#[async_trait::async_trait]
pub trait UploadGateway: Send + Sync + 'static {
    /// Short description for logs (e.g. `directory:/srv/drop`).
    fn describe(&self) -> String;

    /// Deliver one file.
    async fn upload(
        &self,
        instrument_id: InstrumentId,
        filename: &str,
        content: &[u8],
    ) -> UploadOutcome;
}

/// A file name safe to use as a single path segment.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
