//! 💀 Error types for the folio library boundary.
//!
//! Three families, three fates:
//! - [`EncodingError`]: the bytes never made it off the disk. Local. Never retried.
//! - [`TransportError`]: the endpoint let us down. Retried by the executor, shrugged off by the gate.
//! - [`DispatchError`]: the whole run is off. No partial results, no consolation prize.
//!
//! Application glue (config, CLI) stays on `anyhow`. These live at the seams where
//! callers need to `match` instead of just `?`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 📂 Reading an item's bytes failed before anything touched the network.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("could not read bytes for item '{id}' from '{path}': {source}")]
    Unreadable {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 📡 Everything that can go wrong between "send" and "here's your text".
///
/// The executor retries all of these and the readiness gate ignores all of
/// these. The variants exist so the logs can say *which* flavor of bad day it was.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("could not reach the inference endpoint: {0}")]
    Connect(String),
    #[error("inference endpoint answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("inference endpoint sent back something that is not a completion: {0}")]
    Malformed(String),
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// 🏷️ Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Status { .. } => "status",
            TransportError::Malformed(_) => "malformed",
            TransportError::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status { status: status.as_u16(), body: err.to_string() }
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// 🛑 Run-level failures. If you got one of these, no chunk was sent.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("model '{model}' did not become ready within {max_wait:?}; the pod may have failed to start")]
    ReadinessTimedOut { model: String, max_wait: Duration },
    #[error("model '{model}' passed readiness but failed the confirmation probe: {reason}")]
    ConfirmationFailed { model: String, reason: String },
    #[error("invalid dispatcher configuration: {0}")]
    InvalidConfig(String),
}
