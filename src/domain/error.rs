use thiserror::Error;

use crate::domain::slug::SlugError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid `{field}`: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Slug(#[from] SlugError),
}

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Reject blank text after trimming; returns the trimmed value.
pub fn require_text(field: &'static str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Ratings are whole stars from 1 to 5.
pub fn validate_rating(rating: Option<u8>) -> Result<(), DomainError> {
    match rating {
        Some(value) if !(1..=5).contains(&value) => Err(DomainError::validation(
            "rating",
            format!("must be between 1 and 5, got {value}"),
        )),
        _ => Ok(()),
    }
}
