use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which join table an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentKind {
    Category,
    ProductArea,
}

impl AssignmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentKind::Category => "category",
            AssignmentKind::ProductArea => "product-area",
        }
    }
}

impl std::str::FromStr for AssignmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" | "categories" => Ok(AssignmentKind::Category),
            "product-area" | "product-areas" | "product_areas" => Ok(AssignmentKind::ProductArea),
            other => Err(format!("unknown assignment kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCategoryAssignment {
    pub post_id: Uuid,
    pub category_id: Uuid,
    pub confidence: f64,
    pub taxonomy_version: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProductAreaAssignment {
    pub post_id: Uuid,
    pub product_area_id: Uuid,
    pub confidence: f64,
    pub taxonomy_version: i32,
}

/// Category assignment joined with category and parent names.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryAssignmentView {
    pub post_id: Uuid,
    pub confidence: f64,
    pub category_id: Uuid,
    pub name: String,
    pub level: i32,
    pub parent_id: Option<Uuid>,
    pub parent_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductAreaAssignmentView {
    pub post_id: Uuid,
    pub confidence: f64,
    pub product_area_id: Uuid,
    pub name: String,
}
