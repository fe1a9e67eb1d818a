use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubpulseError {
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Rejected user or admin input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("invalid taxonomy: {0}")]
    InvalidTaxonomy(String),
}
