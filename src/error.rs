//! Error types for webhook ingestion, the log store and the live feed.

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The `x-novu-signature` header did not match the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// The body passed verification but is not a JSON document.
    #[error("{0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// A store write or delete failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// The insert subscription dropped records or closed.
    #[error("subscription error: {0}")]
    SubscriptionError(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
