use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    next_version, AssignmentStore, CategoryRequestStore, PostListQuery, PostPage, PostSort,
    PostStats, PostStore, SortOrder, StoreError, TaxonomyStore,
};
use crate::models::category::{LEVEL_CHILD, LEVEL_PARENT};
use crate::models::{
    AssignmentKind, Category, CategoryAssignmentView, CategoryRequest, NewCategory,
    NewCategoryAssignment, NewCategoryRequest, NewPost, NewProductArea, NewProductAreaAssignment,
    Post, ProductArea, ProductAreaAssignmentView,
};
use crate::trends::TrendSample;

#[derive(Default)]
struct Inner {
    posts: Vec<Post>,
    categories: Vec<Category>,
    product_areas: Vec<ProductArea>,
    category_assignments: Vec<NewCategoryAssignment>,
    product_area_assignments: Vec<NewProductAreaAssignment>,
    requests: Vec<CategoryRequest>,
}

impl Inner {
    fn assigned_post_ids(&self, kind: AssignmentKind) -> HashSet<Uuid> {
        match kind {
            AssignmentKind::Category => self.category_assignments.iter().map(|a| a.post_id).collect(),
            AssignmentKind::ProductArea => {
                self.product_area_assignments.iter().map(|a| a.post_id).collect()
            }
        }
    }

    fn matches(&self, post: &Post, query: &PostListQuery) -> bool {
        if let Some(ids) = &query.category_ids {
            let hit = self
                .category_assignments
                .iter()
                .any(|a| a.post_id == post.id && ids.contains(&a.category_id));
            if !hit {
                return false;
            }
        }

        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            if !post.title.to_lowercase().contains(&term) && !post.content.to_lowercase().contains(&term) {
                return false;
            }
        }

        true
    }
}

fn compare_posts(a: &Post, b: &Post, sort: PostSort) -> Ordering {
    match sort {
        PostSort::CreatedAt => a.created_at.cmp(&b.created_at),
        PostSort::Score => a.score.cmp(&b.score),
        PostSort::NumComments => a.num_comments.cmp(&b.num_comments),
        PostSort::Title => a.title.cmp(&b.title),
    }
}

fn newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
}

/// Process-local store with the same semantics as [`super::PgStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn insert_post_if_absent(&self, post: &NewPost) -> Result<Option<Post>, StoreError> {
        let mut inner = self.lock()?;
        if inner.posts.iter().any(|p| p.source_id == post.source_id) {
            return Ok(None);
        }

        let stored = Post {
            id: Uuid::new_v4(),
            source_id: post.source_id.clone(),
            title: post.title.clone(),
            content: post.content.clone(),
            author: post.author.clone(),
            score: post.score,
            num_comments: post.num_comments,
            permalink: post.permalink.clone(),
            thumbnail: post.thumbnail.clone(),
            link_flair_text: post.link_flair_text.clone(),
            ai_summary: None,
            created_at: post.created_at,
            scraped_at: Utc::now(),
        };
        inner.posts.push(stored.clone());
        Ok(Some(stored))
    }

    async fn post_exists(&self, source_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.posts.iter().any(|p| p.source_id == source_id))
    }

    async fn list_posts(&self, query: &PostListQuery) -> Result<PostPage, StoreError> {
        let inner = self.lock()?;
        let mut posts: Vec<Post> = inner
            .posts
            .iter()
            .filter(|p| inner.matches(p, query))
            .cloned()
            .collect();

        posts.sort_by(|a, b| {
            let ord = compare_posts(a, b, query.sort);
            let ord = match query.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            ord.then(a.id.cmp(&b.id))
        });

        let total = posts.len() as i64;
        let posts = posts
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();

        Ok(PostPage { posts, total })
    }

    async fn post_stats(&self, recent_since: DateTime<Utc>) -> Result<PostStats, StoreError> {
        let inner = self.lock()?;
        let total_posts = inner.posts.len() as i64;
        let recent_posts = inner.posts.iter().filter(|p| p.created_at >= recent_since).count() as i64;
        let avg_score = if inner.posts.is_empty() {
            0.0
        } else {
            inner.posts.iter().map(|p| p.score as f64).sum::<f64>() / total_posts as f64
        };

        Ok(PostStats {
            total_posts,
            recent_posts,
            avg_score,
        })
    }

    async fn posts_without_summary(&self, limit: i64) -> Result<Vec<Post>, StoreError> {
        let inner = self.lock()?;
        let mut posts: Vec<Post> = inner
            .posts
            .iter()
            .filter(|p| p.ai_summary.is_none())
            .cloned()
            .collect();
        newest_first(&mut posts);
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }

    async fn set_summary(&self, post_id: Uuid, summary: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let post = inner
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| StoreError::NotFound(format!("post {}", post_id)))?;
        post.ai_summary = Some(summary.to_string());
        Ok(())
    }

    async fn latest_scraped_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.lock()?.posts.iter().map(|p| p.scraped_at).max())
    }

    async fn ping(&self) -> Result<String, StoreError> {
        Ok("memory".to_string())
    }
}

#[async_trait]
impl TaxonomyStore for MemoryStore {
    async fn active_categories(&self) -> Result<Vec<Category>, StoreError> {
        let inner = self.lock()?;
        let mut active: Vec<Category> = inner.categories.iter().filter(|c| c.is_active).cloned().collect();
        active.sort_by(|a, b| (a.level, a.sort_order, &a.name).cmp(&(b.level, b.sort_order, &b.name)));
        Ok(active)
    }

    async fn active_product_areas(&self) -> Result<Vec<ProductArea>, StoreError> {
        let inner = self.lock()?;
        let mut active: Vec<ProductArea> =
            inner.product_areas.iter().filter(|a| a.is_active).cloned().collect();
        active.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));
        Ok(active)
    }

    async fn replace_categories(&self, categories: &[NewCategory]) -> Result<i32, StoreError> {
        let mut inner = self.lock()?;
        let version = next_version(inner.categories.iter().map(|c| c.taxonomy_version));

        for c in inner.categories.iter_mut() {
            c.is_active = false;
        }
        inner.category_assignments.retain(|a| a.taxonomy_version >= version);

        for parent in categories {
            let parent_id = Uuid::new_v4();
            inner.categories.push(Category {
                id: parent_id,
                name: parent.name.clone(),
                description: parent.description.clone(),
                parent_id: None,
                level: LEVEL_PARENT,
                sort_order: parent.sort_order,
                is_active: true,
                taxonomy_version: version,
            });
            for child in &parent.children {
                inner.categories.push(Category {
                    id: Uuid::new_v4(),
                    name: child.name.clone(),
                    description: child.description.clone(),
                    parent_id: Some(parent_id),
                    level: LEVEL_CHILD,
                    sort_order: child.sort_order,
                    is_active: true,
                    taxonomy_version: version,
                });
            }
        }

        Ok(version)
    }

    async fn replace_product_areas(&self, areas: &[NewProductArea]) -> Result<i32, StoreError> {
        let mut inner = self.lock()?;
        let version = next_version(inner.product_areas.iter().map(|a| a.taxonomy_version));

        for a in inner.product_areas.iter_mut() {
            a.is_active = false;
        }
        inner.product_area_assignments.retain(|a| a.taxonomy_version >= version);

        for area in areas {
            inner.product_areas.push(ProductArea {
                id: Uuid::new_v4(),
                name: area.name.clone(),
                description: area.description.clone(),
                sort_order: area.sort_order,
                is_active: true,
                taxonomy_version: version,
            });
        }

        Ok(version)
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn insert_category_assignments(
        &self,
        rows: &[NewCategoryAssignment],
    ) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let mut written = 0;
        for row in rows {
            let exists = inner
                .category_assignments
                .iter()
                .any(|a| a.post_id == row.post_id && a.category_id == row.category_id);
            if !exists {
                inner.category_assignments.push(row.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert_product_area_assignments(
        &self,
        rows: &[NewProductAreaAssignment],
    ) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let mut written = 0;
        for row in rows {
            let exists = inner
                .product_area_assignments
                .iter()
                .any(|a| a.post_id == row.post_id && a.product_area_id == row.product_area_id);
            if !exists {
                inner.product_area_assignments.push(row.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn has_assignments(&self, kind: AssignmentKind, post_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock()?.assigned_post_ids(kind).contains(&post_id))
    }

    async fn category_views(&self, post_ids: &[Uuid]) -> Result<Vec<CategoryAssignmentView>, StoreError> {
        let inner = self.lock()?;
        let by_id: HashMap<Uuid, &Category> = inner.categories.iter().map(|c| (c.id, c)).collect();

        let mut views: Vec<CategoryAssignmentView> = inner
            .category_assignments
            .iter()
            .filter(|a| post_ids.contains(&a.post_id))
            .filter_map(|a| {
                let category = by_id.get(&a.category_id).filter(|c| c.is_active)?;
                let parent_name = category
                    .parent_id
                    .and_then(|id| by_id.get(&id))
                    .map(|p| p.name.clone());
                Some(CategoryAssignmentView {
                    post_id: a.post_id,
                    confidence: a.confidence,
                    category_id: category.id,
                    name: category.name.clone(),
                    level: category.level,
                    parent_id: category.parent_id,
                    parent_name,
                })
            })
            .collect();

        views.sort_by(|a, b| {
            a.post_id
                .cmp(&b.post_id)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.name.cmp(&b.name))
        });
        Ok(views)
    }

    async fn product_area_views(
        &self,
        post_ids: &[Uuid],
    ) -> Result<Vec<ProductAreaAssignmentView>, StoreError> {
        let inner = self.lock()?;
        let by_id: HashMap<Uuid, &ProductArea> = inner.product_areas.iter().map(|a| (a.id, a)).collect();

        let mut views: Vec<ProductAreaAssignmentView> = inner
            .product_area_assignments
            .iter()
            .filter(|a| post_ids.contains(&a.post_id))
            .filter_map(|a| {
                let area = by_id.get(&a.product_area_id).filter(|pa| pa.is_active)?;
                Some(ProductAreaAssignmentView {
                    post_id: a.post_id,
                    confidence: a.confidence,
                    product_area_id: area.id,
                    name: area.name.clone(),
                })
            })
            .collect();

        views.sort_by(|a, b| {
            a.post_id
                .cmp(&b.post_id)
                .then(b.confidence.total_cmp(&a.confidence))
                .then(a.name.cmp(&b.name))
        });
        Ok(views)
    }

    async fn assignment_counts(&self, kind: AssignmentKind) -> Result<HashMap<Uuid, i64>, StoreError> {
        let inner = self.lock()?;
        let ids: Vec<Uuid> = match kind {
            AssignmentKind::Category => inner.category_assignments.iter().map(|a| a.category_id).collect(),
            AssignmentKind::ProductArea => inner
                .product_area_assignments
                .iter()
                .map(|a| a.product_area_id)
                .collect(),
        };

        let mut counts = HashMap::new();
        for id in ids {
            *counts.entry(id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn unclassified_posts(&self, kind: AssignmentKind, limit: i64) -> Result<Vec<Post>, StoreError> {
        let inner = self.lock()?;
        let assigned = inner.assigned_post_ids(kind);
        let mut posts: Vec<Post> = inner
            .posts
            .iter()
            .filter(|p| !assigned.contains(&p.id))
            .cloned()
            .collect();
        newest_first(&mut posts);
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }

    async fn trend_samples(
        &self,
        kind: AssignmentKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrendSample>, StoreError> {
        let inner = self.lock()?;

        let active_names: HashMap<Uuid, &str> = match kind {
            AssignmentKind::Category => inner
                .categories
                .iter()
                .filter(|c| c.is_active)
                .map(|c| (c.id, c.name.as_str()))
                .collect(),
            AssignmentKind::ProductArea => inner
                .product_areas
                .iter()
                .filter(|a| a.is_active)
                .map(|a| (a.id, a.name.as_str()))
                .collect(),
        };
        let pairs: Vec<(Uuid, Uuid)> = match kind {
            AssignmentKind::Category => inner
                .category_assignments
                .iter()
                .map(|a| (a.post_id, a.category_id))
                .collect(),
            AssignmentKind::ProductArea => inner
                .product_area_assignments
                .iter()
                .map(|a| (a.post_id, a.product_area_id))
                .collect(),
        };

        let mut samples: Vec<TrendSample> = inner
            .posts
            .iter()
            .filter(|p| p.created_at >= since)
            .map(|p| TrendSample {
                created_at: p.created_at,
                names: pairs
                    .iter()
                    .filter(|(post_id, _)| *post_id == p.id)
                    .filter_map(|(_, target)| active_names.get(target).map(|n| n.to_string()))
                    .collect(),
            })
            .collect();
        samples.sort_by_key(|s| s.created_at);
        Ok(samples)
    }
}

#[async_trait]
impl CategoryRequestStore for MemoryStore {
    async fn insert_category_request(
        &self,
        request: &NewCategoryRequest,
    ) -> Result<CategoryRequest, StoreError> {
        let stored = CategoryRequest {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            description: request.description.clone(),
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        self.lock()?.requests.push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_post(source_id: &str, title: &str, score: i32, age_days: i64) -> NewPost {
        NewPost {
            source_id: source_id.to_string(),
            title: title.to_string(),
            content: String::new(),
            author: "someone".to_string(),
            score,
            num_comments: 0,
            permalink: format!("/r/test/comments/{}", source_id),
            thumbnail: None,
            link_flair_text: None,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    fn tree() -> Vec<NewCategory> {
        vec![NewCategory {
            name: "Knowledge".into(),
            description: None,
            sort_order: 0,
            children: vec![NewCategory {
                name: "Knowledge Retrieval".into(),
                description: None,
                sort_order: 0,
                children: vec![],
            }],
        }]
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_on_source_id() {
        let store = MemoryStore::new();
        let first = store.insert_post_if_absent(&new_post("abc", "Hello", 1, 0)).await.unwrap();
        let second = store.insert_post_if_absent(&new_post("abc", "Hello again", 1, 0)).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(store.post_exists("abc").await.unwrap());
        assert_eq!(store.post_stats(Utc::now()).await.unwrap().total_posts, 1);
    }

    #[tokio::test]
    async fn test_list_posts_search_sort_and_page() {
        let store = MemoryStore::new();
        for (i, title) in ["SharePoint setup", "Flows failing", "sharepoint auth"].iter().enumerate() {
            store
                .insert_post_if_absent(&new_post(&format!("p{}", i), title, i as i32 * 10, i as i64))
                .await
                .unwrap();
        }

        let query = PostListQuery {
            search: Some("SHAREPOINT".into()),
            sort: PostSort::Score,
            order: SortOrder::Desc,
            limit: 1,
            ..Default::default()
        };
        let page = store.list_posts(&query).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].title, "sharepoint auth");

        let empty = PostListQuery {
            category_ids: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(store.list_posts(&empty).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_replace_categories_drops_old_assignments() {
        let store = MemoryStore::new();
        let post = store.insert_post_if_absent(&new_post("abc", "x", 1, 0)).await.unwrap().unwrap();

        let v1 = store.replace_categories(&tree()).await.unwrap();
        let child = store
            .active_categories()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.name == "Knowledge Retrieval")
            .unwrap();
        store
            .insert_category_assignments(&[NewCategoryAssignment {
                post_id: post.id,
                category_id: child.id,
                confidence: 0.9,
                taxonomy_version: v1,
            }])
            .await
            .unwrap();
        assert!(store.has_assignments(AssignmentKind::Category, post.id).await.unwrap());

        let views = store.category_views(&[post.id]).await.unwrap();
        assert_eq!(views[0].parent_name.as_deref(), Some("Knowledge"));

        let v2 = store.replace_categories(&tree()).await.unwrap();
        assert_eq!(v2, v1 + 1);
        assert!(!store.has_assignments(AssignmentKind::Category, post.id).await.unwrap());
        assert_eq!(store.active_categories().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_assignment_is_ignored() {
        let store = MemoryStore::new();
        let row = NewCategoryAssignment {
            post_id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            confidence: 0.5,
            taxonomy_version: 1,
        };
        assert_eq!(store.insert_category_assignments(&[row.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_category_assignments(&[row]).await.unwrap(), 0);
    }
}
