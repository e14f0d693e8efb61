use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("studio {0} not found")]
    NotFound(i64),
    #[error("studio {0} has no usable address fields")]
    NoAddress(i64),
    #[error("geocoding provider error: {0}")]
    Provider(String),
    #[error("geocoding provider rate limited the request: {0}")]
    RateLimited(String),
    #[error("geocoding transport error: {0}")]
    Transport(String),
    #[error("geocode queue is full ({0} pending)")]
    QueueFull(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

const THROTTLE_MARKERS: &[&str] = &["429", "rate limit", "too many requests", "quota"];

impl AppError {
    /// Whether the batch queue should back off and retry the same item.
    pub fn is_throttling(&self) -> bool {
        match self {
            AppError::RateLimited(_) => true,
            AppError::Transport(message) => {
                let lowered = message.to_lowercase();
                THROTTLE_MARKERS.iter().any(|marker| lowered.contains(marker))
            }
            _ => false,
        }
    }

    /// Skips are per-item outcomes that no amount of retrying will change.
    pub fn is_skip(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::NoAddress(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_throttling_errors() {
        assert!(AppError::RateLimited("OVER_QUERY_LIMIT".into()).is_throttling());
        assert!(AppError::Transport("HTTP 429 Too Many Requests".into()).is_throttling());
        assert!(AppError::Transport("daily Quota exhausted".into()).is_throttling());
        assert!(!AppError::Transport("connection reset by peer".into()).is_throttling());
        assert!(!AppError::Provider("REQUEST_DENIED".into()).is_throttling());
        assert!(!AppError::Configuration("missing key".into()).is_throttling());
    }

    #[test]
    fn classifies_skips() {
        assert!(AppError::NotFound(7).is_skip());
        assert!(AppError::NoAddress(7).is_skip());
        assert!(!AppError::Provider("boom".into()).is_skip());
    }
}
