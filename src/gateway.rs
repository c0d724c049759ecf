//! Upload Gateway
//!
//! Moves a file's bytes to the remote store and classifies each attempt as an
//! [`UploadOutcome`]. One session is built per run with [`connect_gateway`]
//! and shared by every instrument task.

mod directory;
mod http;
mod traits;

use std::sync::Arc;

pub use directory::DirectoryGateway;
pub use http::{HttpGateway, classify_status};
pub use traits::{DEFAULT_HTTP_TIMEOUT, DestinationConfig, GatewayError, UploadGateway, UploadOutcome};

/// Build the gateway session for a destination.
///
/// Nothing is contacted here; reachability is reported per upload.
pub fn connect_gateway(config: &DestinationConfig) -> Result<Arc<dyn UploadGateway>, GatewayError> {
    config.validate()?;
    let gateway: Arc<dyn UploadGateway> = match config {
        DestinationConfig::Directory { base_dir } => Arc::new(DirectoryGateway::new(base_dir)),
        DestinationConfig::Http {
            base_url,
            token,
            timeout,
        } => Arc::new(HttpGateway::new(base_url, token.clone(), *timeout)?),
    };
    tracing::info!(gateway = %gateway.describe(), "Upload gateway ready");
    Ok(gateway)
}
