use thiserror::Error;

/// Errors surfaced by the session store.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The identifier has no live session row.
    #[error("session {key:?} not found")]
    NotFound { key: String },

    /// A row for the identifier already exists, or a bag replace lost a
    /// compare-and-swap race and the caller should retry.
    #[error("session {key:?} was created or modified concurrently")]
    Conflict { key: String },

    /// The stored cell, or one of its values, does not decode into the
    /// requested shape.
    #[error("stored session data does not match the requested type: {0}")]
    TypeMismatch(#[from] serde_json::Error),

    /// Invalid store configuration (e.g. a table name that is not a plain
    /// identifier).
    #[error("invalid session store configuration: {0}")]
    Config(String),

    /// Underlying pool or transaction error, wrapped verbatim.
    #[error("session storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl SessionError {
    pub(crate) fn not_found(key: &str) -> Self {
        Self::NotFound { key: key.to_string() }
    }

    pub(crate) fn conflict(key: &str) -> Self {
        Self::Conflict { key: key.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
