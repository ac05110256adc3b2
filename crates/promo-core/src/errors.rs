use crate::extractor::ExtractionError;

/// Core error type.
///
/// Adapter crates should map their specific errors into this type so the
/// conversation layer can turn any failure into an operator-facing hint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("composition failed: {0}")]
    CompositionFailed(#[from] ExtractionError),

    #[error("no active promotion in this chat")]
    NoActiveSession,

    #[error("no field is waiting for input")]
    NoPendingField,

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),
}

pub type Result<T> = std::result::Result<T, Error>;
