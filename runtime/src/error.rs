//! Error taxonomy for the acquisition engine.
//!
//! Every failure is classified by [`AcquireError::disposition`], which is the
//! only thing the acquisition loop looks at when deciding whether to abort,
//! spend a retry, or log in again. A lost claim is not an error at all; see
//! [`crate::acquisition::booking::ClaimOutcome`].

/// Maximum number of payload characters carried into error messages and logs.
pub const PAYLOAD_PREVIEW_CHARS: usize = 200;

/// How the acquisition loop must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Abort the run immediately.
    Terminal,
    /// Spend one unit of the retry budget and poll again.
    Retry,
    /// The upstream session is gone; log in again before the next poll.
    Reauthenticate,
}

/// All errors raised by the acquisition engine.
#[derive(thiserror::Error, Debug)]
pub enum AcquireError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("credential encryption failed: {0}")]
    Crypto(String),

    #[error("unexpected response from {endpoint}: {detail}")]
    Protocol { endpoint: String, detail: String },

    #[error("upstream session expired ({endpoint})")]
    SessionExpired { endpoint: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AcquireError {
    /// Build a protocol error, truncating the offending payload.
    pub fn protocol(endpoint: impl Into<String>, detail: impl AsRef<str>) -> Self {
        AcquireError::Protocol {
            endpoint: endpoint.into(),
            detail: preview(detail.as_ref()),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            AcquireError::Auth(_) | AcquireError::Crypto(_) | AcquireError::Config(_) => {
                Disposition::Terminal
            }
            AcquireError::Protocol { .. } | AcquireError::Transport(_) => Disposition::Retry,
            AcquireError::SessionExpired { .. } => Disposition::Reauthenticate,
        }
    }
}

/// Truncate a payload to [`PAYLOAD_PREVIEW_CHARS`] characters for diagnostics.
pub fn preview(payload: &str) -> String {
    let mut chars = payload.chars();
    let head: String = chars.by_ref().take(PAYLOAD_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
