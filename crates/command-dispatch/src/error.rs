use thiserror::Error;

pub type Result<T, E = ApiError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("data API unreachable: {0}")]
    Unreachable(String),
    #[error("data API request timed out")]
    Timeout,
    #[error("data API returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unexpected data API response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Connection refused or timed out, as opposed to a rejected request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Unreachable(_) | ApiError::Timeout)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Unreachable(e.to_string())
        }
    }
}
