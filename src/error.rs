use thiserror::Error;

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::ValidationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageError(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(format!("I/O error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Concurrency error: {0}")]
    ConcurrencyError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type AuditResult<T> = Result<T, AuditError>;

impl AuditError {
    pub fn missing_field(field: &str) -> Self {
        Self::ValidationError(format!("Required field '{}' is missing or empty", field))
    }

    pub fn lock_timeout(waited_ms: u64) -> Self {
        Self::ConcurrencyError(format!(
            "Timed out after {}ms waiting for the append lock",
            waited_ms
        ))
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StorageError(_) => "storage",
            Self::EncryptionError(_) => "encryption",
            Self::ValidationError(_) => "validation",
            Self::ConcurrencyError(_) => "concurrency",
            Self::ConfigError(_) => "config",
        }
    }
}
