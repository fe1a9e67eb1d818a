use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{
    next_version, AssignmentStore, CategoryRequestStore, PostListQuery, PostPage, PostStats,
    PostStore, StoreError, TaxonomyStore,
};
use crate::models::category::{LEVEL_CHILD, LEVEL_PARENT};
use crate::models::{
    AssignmentKind, Category, CategoryAssignmentView, CategoryRequest, NewCategory,
    NewCategoryAssignment, NewCategoryRequest, NewPost, NewProductArea, NewProductAreaAssignment,
    Post, ProductArea, ProductAreaAssignmentView,
};
use crate::trends::TrendSample;

const POST_COLUMNS: &str = "id, source_id, title, content, author, score, num_comments, \
     permalink, thumbnail, link_flair_text, ai_summary, created_at, scraped_at";

const CATEGORY_COLUMNS: &str =
    "id, name, description, parent_id, level, sort_order, is_active, taxonomy_version";

const PRODUCT_AREA_COLUMNS: &str =
    "id, name, description, sort_order, is_active, taxonomy_version";

/// Join table, foreign-key column and taxonomy table for an assignment kind.
fn tables(kind: AssignmentKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        AssignmentKind::Category => ("post_categories", "category_id", "categories"),
        AssignmentKind::ProductArea => ("post_product_areas", "product_area_id", "product_areas"),
    }
}

/// Escape LIKE wildcards so the search term matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn push_post_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &'a PostListQuery) {
        qb.push(" WHERE TRUE");

        if let Some(ids) = &query.category_ids {
            qb.push(" AND id IN (SELECT post_id FROM post_categories WHERE category_id = ANY(")
                .push_bind(ids.as_slice())
                .push("))");
        }

        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = like_pattern(term);
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR content ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[async_trait]
impl PostStore for PgStore {
    async fn insert_post_if_absent(&self, post: &NewPost) -> Result<Option<Post>, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO posts (source_id, title, content, author, score, num_comments,
                               permalink, thumbnail, link_flair_text, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (source_id) DO NOTHING
            RETURNING {}
            "#,
            POST_COLUMNS
        );

        let row = sqlx::query_as::<_, Post>(&sql)
            .bind(&post.source_id)
            .bind(&post.title)
            .bind(&post.content)
            .bind(&post.author)
            .bind(post.score)
            .bind(post.num_comments)
            .bind(&post.permalink)
            .bind(&post.thumbnail)
            .bind(&post.link_flair_text)
            .bind(post.created_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn post_exists(&self, source_id: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM posts WHERE source_id = $1)")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list_posts(&self, query: &PostListQuery) -> Result<PostPage, StoreError> {
        if query.category_ids.as_ref().is_some_and(|ids| ids.is_empty()) {
            return Ok(PostPage {
                posts: Vec::new(),
                total: 0,
            });
        }

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM posts");
        Self::push_post_filters(&mut count_qb, query);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM posts", POST_COLUMNS));
        Self::push_post_filters(&mut qb, query);
        qb.push(format!(
            " ORDER BY {} {}, id ASC LIMIT ",
            query.sort.column(),
            query.order.keyword()
        ))
        .push_bind(query.limit as i64)
        .push(" OFFSET ")
        .push_bind(query.offset());

        let posts = qb.build_query_as::<Post>().fetch_all(&self.pool).await?;

        Ok(PostPage { posts, total })
    }

    async fn post_stats(&self, recent_since: DateTime<Utc>) -> Result<PostStats, StoreError> {
        let (total_posts, recent_posts, avg_score): (i64, i64, f64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE created_at >= $1),
                   COALESCE(AVG(score)::float8, 0)
            FROM posts
            "#,
        )
        .bind(recent_since)
        .fetch_one(&self.pool)
        .await?;

        Ok(PostStats {
            total_posts,
            recent_posts,
            avg_score,
        })
    }

    async fn posts_without_summary(&self, limit: i64) -> Result<Vec<Post>, StoreError> {
        let sql = format!(
            "SELECT {} FROM posts WHERE ai_summary IS NULL ORDER BY created_at DESC LIMIT $1",
            POST_COLUMNS
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(posts)
    }

    async fn set_summary(&self, post_id: Uuid, summary: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE posts SET ai_summary = $2 WHERE id = $1")
            .bind(post_id)
            .bind(summary)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("post {}", post_id)));
        }
        Ok(())
    }

    async fn latest_scraped_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let (latest,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(scraped_at) FROM posts")
                .fetch_one(&self.pool)
                .await?;
        Ok(latest)
    }

    async fn ping(&self) -> Result<String, StoreError> {
        Ok(crate::db::server_version(&self.pool).await?)
    }
}

#[async_trait]
impl TaxonomyStore for PgStore {
    async fn active_categories(&self) -> Result<Vec<Category>, StoreError> {
        let sql = format!(
            "SELECT {} FROM categories WHERE is_active ORDER BY level, sort_order, name",
            CATEGORY_COLUMNS
        );
        Ok(sqlx::query_as::<_, Category>(&sql).fetch_all(&self.pool).await?)
    }

    async fn active_product_areas(&self) -> Result<Vec<ProductArea>, StoreError> {
        let sql = format!(
            "SELECT {} FROM product_areas WHERE is_active ORDER BY sort_order, name",
            PRODUCT_AREA_COLUMNS
        );
        Ok(sqlx::query_as::<_, ProductArea>(&sql).fetch_all(&self.pool).await?)
    }

    async fn replace_categories(&self, categories: &[NewCategory]) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (current,): (Option<i32>,) =
            sqlx::query_as("SELECT MAX(taxonomy_version) FROM categories")
                .fetch_one(&mut *tx)
                .await?;
        let version = next_version(current);

        sqlx::query("UPDATE categories SET is_active = FALSE WHERE is_active")
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM post_categories WHERE taxonomy_version < $1")
            .bind(version)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for parent in categories {
            let (parent_id,): (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO categories (name, description, parent_id, level, sort_order, is_active, taxonomy_version)
                VALUES ($1, $2, NULL, $3, $4, TRUE, $5)
                RETURNING id
                "#,
            )
            .bind(&parent.name)
            .bind(&parent.description)
            .bind(LEVEL_PARENT)
            .bind(parent.sort_order)
            .bind(version)
            .fetch_one(&mut *tx)
            .await?;

            for child in &parent.children {
                sqlx::query(
                    r#"
                    INSERT INTO categories (name, description, parent_id, level, sort_order, is_active, taxonomy_version)
                    VALUES ($1, $2, $3, $4, $5, TRUE, $6)
                    "#,
                )
                .bind(&child.name)
                .bind(&child.description)
                .bind(parent_id)
                .bind(LEVEL_CHILD)
                .bind(child.sort_order)
                .bind(version)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            version,
            parents = categories.len(),
            removed_assignments = removed,
            "Replaced category taxonomy"
        );
        Ok(version)
    }

    async fn replace_product_areas(&self, areas: &[NewProductArea]) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (current,): (Option<i32>,) =
            sqlx::query_as("SELECT MAX(taxonomy_version) FROM product_areas")
                .fetch_one(&mut *tx)
                .await?;
        let version = next_version(current);

        sqlx::query("UPDATE product_areas SET is_active = FALSE WHERE is_active")
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM post_product_areas WHERE taxonomy_version < $1")
            .bind(version)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for area in areas {
            sqlx::query(
                r#"
                INSERT INTO product_areas (name, description, sort_order, is_active, taxonomy_version)
                VALUES ($1, $2, $3, TRUE, $4)
                "#,
            )
            .bind(&area.name)
            .bind(&area.description)
            .bind(area.sort_order)
            .bind(version)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            version,
            product_areas = areas.len(),
            removed_assignments = removed,
            "Replaced product-area taxonomy"
        );
        Ok(version)
    }
}

#[async_trait]
impl AssignmentStore for PgStore {
    async fn insert_category_assignments(
        &self,
        rows: &[NewCategoryAssignment],
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO post_categories (post_id, category_id, confidence, taxonomy_version) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.post_id)
                .push_bind(row.category_id)
                .push_bind(row.confidence)
                .push_bind(row.taxonomy_version);
        });
        qb.push(" ON CONFLICT (post_id, category_id) DO NOTHING");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn insert_product_area_assignments(
        &self,
        rows: &[NewProductAreaAssignment],
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO post_product_areas (post_id, product_area_id, confidence, taxonomy_version) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.post_id)
                .push_bind(row.product_area_id)
                .push_bind(row.confidence)
                .push_bind(row.taxonomy_version);
        });
        qb.push(" ON CONFLICT (post_id, product_area_id) DO NOTHING");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn has_assignments(&self, kind: AssignmentKind, post_id: Uuid) -> Result<bool, StoreError> {
        let (join, _, _) = tables(kind);
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE post_id = $1)", join);
        let (exists,): (bool,) = sqlx::query_as(&sql)
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn category_views(&self, post_ids: &[Uuid]) -> Result<Vec<CategoryAssignmentView>, StoreError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, CategoryAssignmentView>(
            r#"
            SELECT pc.post_id, pc.confidence, c.id AS category_id, c.name, c.level,
                   c.parent_id, p.name AS parent_name
            FROM post_categories pc
            JOIN categories c ON c.id = pc.category_id AND c.is_active
            LEFT JOIN categories p ON p.id = c.parent_id
            WHERE pc.post_id = ANY($1)
            ORDER BY pc.post_id, pc.confidence DESC, c.name
            "#,
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn product_area_views(
        &self,
        post_ids: &[Uuid],
    ) -> Result<Vec<ProductAreaAssignmentView>, StoreError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ProductAreaAssignmentView>(
            r#"
            SELECT ppa.post_id, ppa.confidence, pa.id AS product_area_id, pa.name
            FROM post_product_areas ppa
            JOIN product_areas pa ON pa.id = ppa.product_area_id AND pa.is_active
            WHERE ppa.post_id = ANY($1)
            ORDER BY ppa.post_id, ppa.confidence DESC, pa.name
            "#,
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn assignment_counts(&self, kind: AssignmentKind) -> Result<HashMap<Uuid, i64>, StoreError> {
        let (join, fk, _) = tables(kind);
        let sql = format!("SELECT {fk}, COUNT(*) FROM {join} GROUP BY {fk}");
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    async fn unclassified_posts(&self, kind: AssignmentKind, limit: i64) -> Result<Vec<Post>, StoreError> {
        let (join, _, _) = tables(kind);
        let sql = format!(
            r#"
            SELECT {} FROM posts p
            WHERE NOT EXISTS (SELECT 1 FROM {} j WHERE j.post_id = p.id)
            ORDER BY p.created_at DESC
            LIMIT $1
            "#,
            POST_COLUMNS, join
        );
        let posts = sqlx::query_as::<_, Post>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(posts)
    }

    async fn trend_samples(
        &self,
        kind: AssignmentKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrendSample>, StoreError> {
        let (join, fk, taxonomy) = tables(kind);
        let sql = format!(
            r#"
            SELECT p.created_at,
                   COALESCE(array_agg(t.name) FILTER (WHERE t.name IS NOT NULL), '{{}}'::text[]) AS names
            FROM posts p
            LEFT JOIN {join} j ON j.post_id = p.id
            LEFT JOIN {taxonomy} t ON t.id = j.{fk} AND t.is_active
            WHERE p.created_at >= $1
            GROUP BY p.id, p.created_at
            ORDER BY p.created_at
            "#
        );
        let rows: Vec<(DateTime<Utc>, Vec<String>)> = sqlx::query_as(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(created_at, names)| TrendSample { created_at, names })
            .collect())
    }
}

#[async_trait]
impl CategoryRequestStore for PgStore {
    async fn insert_category_request(
        &self,
        request: &NewCategoryRequest,
    ) -> Result<CategoryRequest, StoreError> {
        let row = sqlx::query_as::<_, CategoryRequest>(
            r#"
            INSERT INTO category_requests (name, description, status)
            VALUES ($1, $2, 'pending')
            RETURNING id, name, description, status, created_at
            "#,
        )
        .bind(&request.name)
        .bind(&request.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rag"), "%rag%");
        assert_eq!(like_pattern("100%_ok"), "%100\\%\\_ok%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_tables_per_kind() {
        assert_eq!(tables(AssignmentKind::Category).0, "post_categories");
        assert_eq!(tables(AssignmentKind::ProductArea).1, "product_area_id");
    }
}
