//! Downstream operations
//!
//! Each operation declares the scope it delegates to and performs one
//! bearer-authenticated HTTP call with the delegated token.

pub mod documents;
pub mod profile;

pub use documents::GetDocuments;
pub use profile::GetUserProfile;

use crate::config::GatewayConfig;
use crate::error::DownstreamError;
use crate::orchestrator::Operation;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// The operations this gateway exposes
pub fn default_operations(config: &GatewayConfig) -> Vec<Arc<dyn Operation>> {
    vec![
        Arc::new(GetDocuments::new(config.search.clone())),
        Arc::new(GetUserProfile::new(config.graph.clone())),
    ]
}

/// Decode a successful JSON response or describe the failure
///
/// The failure body is kept whole; it is scrubbed of bearer material before
/// anything shortens it.
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, DownstreamError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DownstreamError::Status {
            status: status.as_u16(),
            detail: body.trim().to_string(),
        });
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| DownstreamError::Decode(e.to_string()))
}
