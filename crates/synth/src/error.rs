use thiserror::Error;

pub type Result<T> = std::result::Result<T, SynthesisError>;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid API key: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response has no <TITLE>:, <BODY>: or <LABELS>: section")]
    MissingSections,
}

impl SynthesisError {
    /// Rate limits and 5xx answers are worth retrying; everything else is final.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Server { .. })
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body.to_string()),
            429 => Self::RateLimited(body.to_string()),
            500..=599 => Self::Server {
                status,
                body: body.to_string(),
            },
            _ => Self::Http {
                status,
                body: body.to_string(),
            },
        }
    }
}
