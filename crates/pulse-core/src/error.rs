use thiserror::Error;

/// Top-level error type for the Pulse system.
///
/// The first four variants form the persistence taxonomy surfaced by the
/// repositories; the rest cover configuration, I/O and task plumbing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PulseError {
    /// A unique or foreign-key constraint rejected a write.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A multi-step write failed partway and was rolled back.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// The database file could not be opened or is not usable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl PulseError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        PulseError::NotFound { entity, id }
    }

    /// True for the constraint-violation class.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, PulseError::ConstraintViolation(_))
    }
}

impl From<toml::de::Error> for PulseError {
    fn from(err: toml::de::Error) -> Self {
        PulseError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PulseError {
    fn from(err: toml::ser::Error) -> Self {
        PulseError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(err: serde_json::Error) -> Self {
        PulseError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Pulse operations.
pub type Result<T> = std::result::Result<T, PulseError>;
