use std::fmt;

use thiserror::Error;

/// Closed classification of everything that can go wrong during one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Connection,
    Timeout,
    MalformedResponse,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport_error",
            Self::Connection => "connection_error",
            Self::Timeout => "timeout_error",
            Self::MalformedResponse => "malformed_response",
            Self::Unknown => "unknown_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The endpoint answered with a non-2xx status.
    #[error("model API returned status {status}: {body}")]
    Transport { status: u16, body: String },

    #[error(
        "could not connect to model API at '{url}': {detail}. \
         Is the server running and VLLM_API_BASE_URL correct?"
    )]
    Connection { url: String, detail: String },

    #[error(
        "model request to '{url}' timed out after {after_secs}s. \
         Increase MODEL_TIMEOUT_SECS or check model responsiveness."
    )]
    Timeout { url: String, after_secs: u64 },

    /// 2xx reply whose payload lacks the assistant text.
    #[error("unexpected response format from model API: {raw}")]
    MalformedResponse { raw: String },

    #[error("unexpected error while calling model API: {detail}")]
    Unknown { detail: String },
}

impl ChatError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } => FailureKind::Transport,
            Self::Connection { .. } => FailureKind::Connection,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::MalformedResponse { .. } => FailureKind::MalformedResponse,
            Self::Unknown { .. } => FailureKind::Unknown,
        }
    }

    pub fn detail(&self) -> String {
        self.to_string()
    }

    pub fn malformed(raw: impl Into<String>) -> Self {
        Self::MalformedResponse { raw: raw.into() }
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        Self::Unknown {
            detail: detail.into(),
        }
    }
}
