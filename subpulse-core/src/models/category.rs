use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Level of a top-level category.
pub const LEVEL_PARENT: i32 = 0;
/// Level of a subcategory. Only two levels exist.
pub const LEVEL_CHILD: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub level: i32,
    pub sort_order: i32,
    pub is_active: bool,
    pub taxonomy_version: i32,
}

impl Category {
    pub fn is_parent(&self) -> bool {
        self.level == LEVEL_PARENT
    }
}

/// Insert form used by taxonomy replacement. Children name their parent by
/// position in the batch, since parent ids do not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub children: Vec<NewCategory>,
}
