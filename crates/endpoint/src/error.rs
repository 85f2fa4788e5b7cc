use std::time::Duration;
use thiserror::Error;

/// Failures talking to the serving endpoint, classified so the executor can
/// report them on a trial without inspecting strings.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("`{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("no metrics in final unit")]
    MissingMetrics,

    #[error("endpoint reported an error: {0}")]
    Reported(String),
}

impl EndpointError {
    pub(crate) fn from_reqwest(url: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EndpointError::Timeout {
                url: url.to_string(),
                timeout,
            }
        } else if err.is_decode() {
            EndpointError::Decode {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            EndpointError::Transport {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EndpointError::Timeout { .. })
    }
}
