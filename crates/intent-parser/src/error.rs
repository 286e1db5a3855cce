use thiserror::Error;

pub type Result<T, E = ParseError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty utterance")]
    Empty,
    #[error("no intent matched: {0}")]
    NoMatch(String),
    #[error("invalid pattern for {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("metric source error: {0}")]
    Source(String),
    #[error("generative fallback error: {0}")]
    Fallback(String),
}
