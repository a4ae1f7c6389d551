use serde::Serialize;

/// Standard error response body for the API layer to forward.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

/// Failure of a single upstream provider fetch.
///
/// Absorbed by the refresh coordinator; never reaches a snapshot caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} rejected credentials: {message}")]
    Auth {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} unavailable: {message}")]
    Unavailable {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    /// Map a reqwest transport error onto the taxonomy.
    pub(crate) fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { provider }
        } else if err.is_decode() {
            ProviderError::MalformedResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            ProviderError::Unavailable {
                provider,
                message: err.to_string(),
            }
        }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub(crate) fn from_status(provider: &'static str, status: reqwest::StatusCode) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                ProviderError::Auth {
                    provider,
                    message: format!("HTTP {}", status),
                }
            }
            _ => ProviderError::Unavailable {
                provider,
                message: format!("HTTP {}", status),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("cache file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache file (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    #[error("Weather data service unavailable. Please try again later.")]
    NoDataEverObtained,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// HTTP status the API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NoDataEverObtained => 503,
            AppError::BadRequest(_) => 400,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
        }
    }
}
