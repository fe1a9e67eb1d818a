use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flat alternative taxonomy, independent of [`crate::models::Category`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductArea {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub is_active: bool,
    pub taxonomy_version: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProductArea {
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i32,
}
