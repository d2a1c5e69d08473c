//! External provider clients
//!
//! Typed reqwest clients for everything the control plane brokers: the
//! hosted agent runtime, the telephony/room provider, per-user SMTP, the
//! print-and-mail provider, and the platform notice/SMS senders. Each client
//! owns its HTTP client with a bounded timeout.

pub mod notify;
pub mod printmail;
pub mod runtime;
pub mod smtp;
pub mod telephony;

use voxway_core::VoxwayError;

pub(crate) const PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Map an upstream non-2xx into a provider error, preserving the details.
pub(crate) async fn provider_error(context: &str, resp: reqwest::Response) -> VoxwayError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    VoxwayError::Provider(format!("{} failed with {}: {}", context, status, body))
}

pub(crate) fn network_error(context: &str, err: reqwest::Error) -> VoxwayError {
    if err.is_timeout() {
        VoxwayError::Timeout(format!("{}: {}", context, err))
    } else {
        VoxwayError::Network(format!("{}: {}", context, err))
    }
}
