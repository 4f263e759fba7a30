//! Error types for scoreq.

use thiserror::Error;

use crate::model::event::EventId;

#[derive(Debug, Error)]
pub enum Error {
    /// A required command field was missing or empty. Raised before any
    /// store interaction.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The plan delivered an event whose payload has already expired out of
    /// the payload store.
    #[error("payload missing for event {0}")]
    PayloadMissing(EventId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
