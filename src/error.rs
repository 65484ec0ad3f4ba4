//! Error types for the cardkeeper library.

use thiserror::Error;

/// The main error type for cardkeeper operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A card command failed
    #[error("Card error: {0}")]
    Card(#[from] crate::card::CardError),

    /// Invalid input provided by the caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested action needs staged input that was never provided
    #[error("Missing staged input: {0}")]
    MissingInput(&'static str),

    /// An operation is already executing on the current connection
    #[error("Session is busy")]
    Busy,
}

/// A specialized Result type for cardkeeper operations.
pub type Result<T> = std::result::Result<T, Error>;
