use thiserror::Error;

use crate::signer::SignError;

/// Failures talking to the escrow service or the ledger behind it.
///
/// None of these are retried by the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
    /// The request may or may not have been applied; re-read contract state
    /// before acting again.
    #[error("escrow service timed out")]
    Timeout,
    #[error("escrow service unavailable: {0}")]
    Unavailable(String),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("signing failed: {0}")]
    Signing(#[from] SignError),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
