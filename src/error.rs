use thiserror::Error;

/// Engine-level failures. Route handlers map these onto transport codes;
/// inside the engine they are just propagated with `?`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("history serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
