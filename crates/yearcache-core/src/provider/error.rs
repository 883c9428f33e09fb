use reqwest::StatusCode;
use thiserror::Error;

/// Longest slice of a response body kept in an error, in characters.
const MAX_BODY_EXCERPT: usize = 200;

/// Why a `/dapi` fetch produced no usable year.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request never got an HTTP response (connect, TLS, timeout).
    #[error("Transport failure reaching /dapi: {0}")]
    Transport(#[from] reqwest::Error),

    /// `/dapi` answered, but not with 200.
    #[error("/dapi returned HTTP {status}: {excerpt}")]
    Status { status: u16, excerpt: String },

    #[error("/dapi still throttling after {retries} retries")]
    Throttled { retries: u32 },

    /// A 200 whose body is not JSON, or not an upstream envelope.
    #[error("Malformed /dapi body: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Any non-200 answer. The body is cut down to a short excerpt.
    pub fn status(status: StatusCode, body: &str) -> Self {
        ProviderError::Status {
            status: status.as_u16(),
            excerpt: excerpt(body),
        }
    }

    /// HTTP status code, when the provider answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            ProviderError::Throttled { .. } => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            ProviderError::Transport(e) => e.status().map(|s| s.as_u16()),
            ProviderError::Malformed(_) => None,
        }
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((cut, _)) => format!("{}... ({} bytes)", &body[..cut], body.len()),
        None if body.is_empty() => "<empty body>".to_string(),
        None => body.to_string(),
    }
}
