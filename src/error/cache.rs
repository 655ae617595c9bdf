//! Local persistent cache errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("corrupt cache record: {0}")]
    Serialization(String),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            CacheError::Io { .. } => "E_CACHE_IO",
            CacheError::Serialization(_) => "E_CACHE_CORRUPT",
            CacheError::Unavailable(_) => "E_CACHE_UNAVAILABLE",
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
