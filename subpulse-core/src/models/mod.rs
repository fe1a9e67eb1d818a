pub mod assignment;
pub mod category;
pub mod category_request;
pub mod post;
pub mod product_area;

pub use assignment::{
    AssignmentKind, CategoryAssignmentView, NewCategoryAssignment, NewProductAreaAssignment,
    ProductAreaAssignmentView,
};
pub use category::{Category, NewCategory};
pub use category_request::{CategoryRequest, NewCategoryRequest};
pub use post::{NewPost, Post};
pub use product_area::{NewProductArea, ProductArea};
