use thiserror::Error;

use super::slug::SlugError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("`{field}` must not be empty")]
    MissingField { field: &'static str },
    #[error("invalid slug: {0}")]
    Slug(#[from] SlugError),
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
