//! Classification Orchestrator
//!
//! Chooses between LLM and keyword classification for one post, resolves
//! names against a per-batch taxonomy snapshot and writes the assignment
//! rows. A rate-limit signal from the provider aborts the batch; any other
//! provider failure falls back to keyword scoring.

use std::sync::Arc;
use std::time::Duration;

use subpulse_core::classifier::{Classification, LlmClassifier, LlmOutcome, FALLBACK_CONFIDENCE};
use subpulse_core::config::{ClassifierConfig, SubpulseConfig};
use subpulse_core::keywords::{score_post, KeywordTable, MAX_CONFIDENCE, MIN_CATEGORY_CONFIDENCE};
use subpulse_core::llm::create_backend;
use subpulse_core::models::{AssignmentKind, NewCategoryAssignment, NewProductAreaAssignment, Post};
use subpulse_core::store::{Store, StoreError};
use subpulse_core::taxonomy::NameIndex;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("completion provider is rate limited")]
    RateLimited,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Which path produced a post's assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Llm,
    Keyword,
    /// Nothing qualified; the catch-all category was assigned.
    CatchAll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Classified { assignments: usize, strategy: Strategy },
    /// Assignment rows already exist; nothing was written.
    AlreadyClassified,
    /// No assignment could be produced (no taxonomy, no catch-all, or no
    /// provider for product areas).
    Skipped,
}

// ============================================================================
// Pacing
// ============================================================================

/// Keeps successive provider calls at least `delay` apart.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(Duration::from_millis(config.request_delay_ms))
    }

    /// Sleep out the rest of the delay since the previous call. The first
    /// call never waits.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    llm: Option<LlmClassifier>,
    keywords: Arc<KeywordTable>,
    catch_all: String,
    request_delay: Duration,
}

impl Orchestrator {
    pub fn new(
        llm: Option<LlmClassifier>,
        keywords: Arc<KeywordTable>,
        catch_all: impl Into<String>,
        request_delay: Duration,
    ) -> Self {
        Self {
            llm,
            keywords,
            catch_all: catch_all.into(),
            request_delay,
        }
    }

    /// LLM classification is used when enabled and an API key is available;
    /// otherwise keyword scoring only.
    pub fn from_config(config: &SubpulseConfig, keywords: Arc<KeywordTable>) -> Self {
        let llm = if config.classifier.enabled {
            match create_backend(&config.classifier, None) {
                Ok(backend) => {
                    tracing::info!(
                        backend = backend.name(),
                        model = config.classifier.model(),
                        "LLM classification enabled"
                    );
                    Some(LlmClassifier::from_config(backend, &config.classifier))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "LLM classification unavailable, using keyword scoring");
                    None
                }
            }
        } else {
            tracing::info!("LLM classification disabled via config");
            None
        };

        Self::new(
            llm,
            keywords,
            config.taxonomy.catch_all.clone(),
            Duration::from_millis(config.classifier.request_delay_ms),
        )
    }

    pub fn llm(&self) -> Option<&LlmClassifier> {
        self.llm.as_ref()
    }

    pub fn catch_all(&self) -> &str {
        &self.catch_all
    }

    /// Snapshot the active taxonomy for one batch of posts.
    pub async fn begin_batch(&self, store: &dyn Store) -> Result<ClassifyBatch<'_>, StoreError> {
        let categories = NameIndex::for_categories(&store.active_categories().await?);
        let product_areas = NameIndex::for_product_areas(&store.active_product_areas().await?);

        tracing::debug!(
            categories = categories.names().len(),
            product_areas = product_areas.names().len(),
            version = categories.version(),
            "Classification batch started"
        );

        Ok(ClassifyBatch {
            orchestrator: self,
            categories,
            product_areas,
            pacer: Pacer::new(self.request_delay),
        })
    }
}

/// Taxonomy snapshot plus pacing state shared by the posts of one run.
pub struct ClassifyBatch<'a> {
    orchestrator: &'a Orchestrator,
    categories: NameIndex,
    product_areas: NameIndex,
    pacer: Pacer,
}

impl<'a> ClassifyBatch<'a> {
    pub fn category_names(&self) -> &[String] {
        self.categories.names()
    }

    /// Classify one post into categories unless it already holds
    /// category assignments.
    pub async fn classify_categories(
        &mut self,
        store: &dyn Store,
        post: &Post,
    ) -> Result<PostOutcome, ClassifyError> {
        if store.has_assignments(AssignmentKind::Category, post.id).await? {
            return Ok(PostOutcome::AlreadyClassified);
        }
        if self.categories.is_empty() {
            return Ok(PostOutcome::Skipped);
        }

        let (candidates, strategy) = self.category_candidates(post).await?;

        let mut rows: Vec<NewCategoryAssignment> = candidates
            .iter()
            .filter_map(|c| {
                self.categories.resolve(&c.name).map(|id| NewCategoryAssignment {
                    post_id: post.id,
                    category_id: id,
                    confidence: c.confidence.min(MAX_CONFIDENCE),
                    taxonomy_version: self.categories.version(),
                })
            })
            .filter(|row| row.confidence >= MIN_CATEGORY_CONFIDENCE)
            .collect();

        let strategy = if rows.is_empty() {
            let Some(id) = self.categories.resolve(&self.orchestrator.catch_all) else {
                tracing::debug!(post_id = %post.id, "No category qualified and no catch-all defined");
                return Ok(PostOutcome::Skipped);
            };
            rows.push(NewCategoryAssignment {
                post_id: post.id,
                category_id: id,
                confidence: FALLBACK_CONFIDENCE,
                taxonomy_version: self.categories.version(),
            });
            Strategy::CatchAll
        } else {
            strategy
        };

        let written = store.insert_category_assignments(&rows).await?;
        tracing::debug!(post_id = %post.id, assignments = written, ?strategy, "Post classified");

        Ok(PostOutcome::Classified {
            assignments: written,
            strategy,
        })
    }

    async fn category_candidates(
        &mut self,
        post: &Post,
    ) -> Result<(Vec<Classification>, Strategy), ClassifyError> {
        let orchestrator = self.orchestrator;
        if let Some(llm) = orchestrator.llm.as_ref() {
            self.pacer.wait().await;
            let outcome = llm
                .classify_categories(
                    &post.title,
                    &post.content,
                    self.categories.names(),
                    &orchestrator.catch_all,
                )
                .await;

            match outcome {
                LlmOutcome::Success(list) => return Ok((list, Strategy::Llm)),
                LlmOutcome::RateLimited => return Err(ClassifyError::RateLimited),
                LlmOutcome::Failed(reason) => {
                    tracing::warn!(post_id = %post.id, reason = %reason, "LLM classification failed, using keywords");
                }
            }
        }

        let matches = score_post(&post.title, &post.content, &orchestrator.keywords)
            .into_iter()
            .map(|m| Classification::new(m.category, m.confidence))
            .collect();
        Ok((matches, Strategy::Keyword))
    }

    /// Classify one post into at most two product areas. LLM only; without a
    /// provider the post is skipped.
    pub async fn classify_product_areas(
        &mut self,
        store: &dyn Store,
        post: &Post,
    ) -> Result<PostOutcome, ClassifyError> {
        if store.has_assignments(AssignmentKind::ProductArea, post.id).await? {
            return Ok(PostOutcome::AlreadyClassified);
        }
        let orchestrator = self.orchestrator;
        let Some(llm) = orchestrator.llm.as_ref() else {
            return Ok(PostOutcome::Skipped);
        };
        if self.product_areas.is_empty() {
            return Ok(PostOutcome::Skipped);
        }

        self.pacer.wait().await;
        let list = match llm
            .classify_product_areas(&post.title, &post.content, self.product_areas.names())
            .await
        {
            LlmOutcome::Success(list) => list,
            LlmOutcome::RateLimited => return Err(ClassifyError::RateLimited),
            LlmOutcome::Failed(reason) => {
                tracing::warn!(post_id = %post.id, reason = %reason, "Product-area classification failed");
                return Ok(PostOutcome::Skipped);
            }
        };

        let rows: Vec<NewProductAreaAssignment> = list
            .iter()
            .filter_map(|c| {
                self.product_areas.resolve(&c.name).map(|id| NewProductAreaAssignment {
                    post_id: post.id,
                    product_area_id: id,
                    confidence: c.confidence,
                    taxonomy_version: self.product_areas.version(),
                })
            })
            .take(subpulse_core::classifier::MAX_PRODUCT_AREAS)
            .collect();

        if rows.is_empty() {
            return Ok(PostOutcome::Skipped);
        }

        let written = store.insert_product_area_assignments(&rows).await?;
        Ok(PostOutcome::Classified {
            assignments: written,
            strategy: Strategy::Llm,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
