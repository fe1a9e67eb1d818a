use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

pub const MAX_REQUEST_NAME_LEN: usize = 100;

/// A user-submitted suggestion for a new category. Never auto-processed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryRequest {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCategoryRequest {
    pub name: String,
    pub description: Option<String>,
}

impl NewCategoryRequest {
    /// Trim and validate raw input. Blank descriptions become `None`.
    pub fn parse(name: Option<&str>, description: Option<&str>) -> Result<Self, ValidationError> {
        let name = name.map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(ValidationError::Required { field: "name" });
        }
        if name.chars().count() > MAX_REQUEST_NAME_LEN {
            return Err(ValidationError::TooLong {
                field: "name",
                max: MAX_REQUEST_NAME_LEN,
            });
        }

        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        Ok(Self {
            name: name.to_string(),
            description,
        })
    }
}
