// src/errors.rs
use thiserror::Error;

/// Failure of a call into one of the hosted services. Each adapter returns
/// this instead of panicking or stringly-typed errors so the orchestrator can
/// match on the variant. No retries are attempted anywhere: a single failed
/// call surfaces immediately to the caller.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("service is not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not decode service response: {0}")]
    Decode(String),

    #[error("could not process the image. Please try again with a clearer photo.")]
    InvalidImage,
}

/// Branch-level errors of the assistant orchestrator, mapped onto the HTTP
/// status taxonomy: image/text branch failures become 400s with their own
/// suggested actions, everything else becomes a generic 500.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{0}")]
    ImageBranch(AdapterError),

    #[error("Chat processing failed: {0}")]
    TextBranch(AdapterError),

    #[error("could not store the uploaded image")]
    Storage(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
