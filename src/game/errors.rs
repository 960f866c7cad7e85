use sled::transaction::TransactionError;
use thiserror::Error;

/// Errors that can arise while interacting with the game storage layer.
///
/// Business-rule rejections (daily limits, insufficient funds, ...) are never
/// reported through this type; they come back as outcome enums.
#[derive(Debug, Error)]
pub enum GameError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// A mutation was requested against an account in a state that does not allow it
    /// (for example adjusting the balance of a user that was never created).
    #[error("account state error: {0}")]
    AccountState(String),

    /// A persisted record violates an invariant (negative balance, stage outside the ladder).
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Configuration rejected during validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    /// Storage failures that may succeed when retried. Invariant and account errors never do.
    pub fn is_transient(&self) -> bool {
        match self {
            GameError::Io(_) => true,
            GameError::Sled(err) => matches!(err, sled::Error::Io(_)),
            _ => false,
        }
    }
}

impl From<TransactionError<GameError>> for GameError {
    fn from(err: TransactionError<GameError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(storage) => GameError::Sled(storage),
        }
    }
}
