use std::fmt::Display;

use anyhow::Error;
use thiserror::Error;

/// A generic failure with no more specific classification, carrying a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct GeneralError(String);

/// Constructs a [`GeneralError`] wrapped as an [`Error`].
pub fn general_error<M>(message: M) -> Error
where
    M: Display,
{
    Error::new(GeneralError(message.to_string()))
}

/// A lookup that found nothing where the caller required something.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not found: {0}")]
pub struct NotFoundError(String);

/// Constructs a [`NotFoundError`] wrapped as an [`Error`].
pub fn not_found_error<M>(message: M) -> Error
where
    M: Display,
{
    Error::new(NotFoundError(message.to_string()))
}
