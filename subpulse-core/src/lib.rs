pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod json_extract;
pub mod keywords;
pub mod llm;
pub mod models;
pub mod store;
pub mod taxonomy;
pub mod trends;

pub use classifier::{Classification, LlmClassifier, LlmOutcome};
pub use config::SubpulseConfig;
pub use error::{SubpulseError, ValidationError};
pub use keywords::{score_post, KeywordMatch, KeywordTable};
pub use llm::{
    create_backend, CompletionBackend, CompletionRequest, GeminiClient, GeminiConfig, GroqClient,
    GroqConfig, LlmError,
};
pub use store::{
    AssignmentStore, CategoryRequestStore, MemoryStore, PgStore, PostListQuery, PostStore, Store,
    StoreError, TaxonomyStore,
};
pub use taxonomy::{build_category_tree, resolve_category_filter, CategoryFilter, NameIndex, TaxonomyDefinition};
pub use trends::{weekly_trends, TrendSample, TrendSeries};
