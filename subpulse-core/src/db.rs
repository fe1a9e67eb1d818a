//! Postgres pool setup and the schema check behind `--health`.

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;

/// Tables created by `migrations/0001_init.sql`.
pub const SCHEMA_TABLES: [&str; 6] = [
    "posts",
    "categories",
    "product_areas",
    "post_categories",
    "post_product_areas",
    "category_requests",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await?;

    tracing::debug!(max_connections = config.max_connections, "Postgres pool ready");
    Ok(pool)
}

/// Server version string.
pub async fn server_version(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Schema tables absent from the connected database's `public` schema.
pub async fn missing_schema_tables(pool: &PgPool) -> Result<Vec<&'static str>, sqlx::Error> {
    let present: Vec<(String,)> = sqlx::query_as(
        "SELECT table_name::text FROM information_schema.tables WHERE table_schema = 'public'",
    )
    .fetch_all(pool)
    .await?;

    Ok(absent_tables(present.iter().map(|(name,)| name.as_str())))
}

fn absent_tables<'a>(present: impl IntoIterator<Item = &'a str>) -> Vec<&'static str> {
    let present: Vec<&str> = present.into_iter().collect();
    SCHEMA_TABLES
        .iter()
        .copied()
        .filter(|table| !present.contains(table))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_tables_lists_only_missing_schema_tables() {
        let present = ["posts", "categories", "post_categories", "_sqlx_migrations"];
        assert_eq!(
            absent_tables(present),
            vec!["product_areas", "post_product_areas", "category_requests"]
        );
        assert!(absent_tables(SCHEMA_TABLES).is_empty());
    }
}
