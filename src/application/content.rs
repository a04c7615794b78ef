//! Cached reads and invalidating writes for blog content.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    application::repos::{ContentRepo, RepoError},
    cache::{CacheKey, CacheOutcome, CacheStore, collection_pattern},
    domain::{
        blog::{BlogPage, BlogQuery, BlogRecord, BlogUpdate, NewBlog},
        error::DomainError,
    },
};

pub const BLOG_COLLECTION: &str = "blogs";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("blog not found")]
    NotFound,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Cache-aside facade over a [`ContentRepo`].
///
/// Reads go through the shared cache; every write purges the whole
/// `blogs:*` namespace, response cache entries included.
#[derive(Clone)]
pub struct ContentService {
    repo: Arc<dyn ContentRepo>,
    cache: CacheStore,
}

impl ContentService {
    pub fn new(repo: Arc<dyn ContentRepo>, cache: CacheStore) -> Self {
        Self { repo, cache }
    }

    pub async fn list(&self, query: BlogQuery) -> Result<(BlogPage, CacheOutcome), ContentError> {
        let key = CacheKey::find(BLOG_COLLECTION, &query.canonical()).to_string();
        let config = self.cache.config();
        let ttl = if query.is_default_listing() {
            config.listing_ttl_secs
        } else {
            config.default_ttl_secs
        };

        self.cache
            .get_or_fetch(&key, ttl, || async {
                self.repo
                    .list_blogs(&query)
                    .await
                    .map_err(ContentError::from)
            })
            .await
    }

    pub async fn find_by_slug(
        &self,
        slug: &str,
    ) -> Result<(BlogRecord, CacheOutcome), ContentError> {
        let key = CacheKey::find_by_slug(BLOG_COLLECTION, slug).to_string();
        self.cache
            .get_or_fetch(&key, self.cache.config().default_ttl_secs, || async {
                self.repo
                    .find_blog_by_slug(slug)
                    .await
                    .map_err(ContentError::from)
                    .and_then(|found| found.ok_or(ContentError::NotFound))
            })
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<(BlogRecord, CacheOutcome), ContentError> {
        let key = CacheKey::find_by_id(BLOG_COLLECTION, id).to_string();
        self.cache
            .get_or_fetch(&key, self.cache.config().default_ttl_secs, || async {
                self.repo
                    .find_blog_by_id(id)
                    .await
                    .map_err(ContentError::from)
                    .and_then(|found| found.ok_or(ContentError::NotFound))
            })
            .await
    }

    pub async fn create(&self, blog: NewBlog) -> Result<BlogRecord, ContentError> {
        blog.validate()?;
        let record = self.repo.create_blog(blog).await?;
        info!(
            target = "cachet::content",
            id = %record.id,
            slug = %record.slug,
            "Blog created"
        );
        self.invalidate().await;
        Ok(record)
    }

    pub async fn update(&self, id: Uuid, update: BlogUpdate) -> Result<BlogRecord, ContentError> {
        update.validate()?;
        let record = self.repo.update_blog(id, update).await.map_err(not_found)?;
        info!(
            target = "cachet::content",
            id = %record.id,
            slug = %record.slug,
            "Blog updated"
        );
        self.invalidate().await;
        Ok(record)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ContentError> {
        self.repo.delete_blog(id).await.map_err(not_found)?;
        info!(target = "cachet::content", id = %id, "Blog deleted");
        self.invalidate().await;
        Ok(())
    }

    async fn invalidate(&self) {
        let pattern = collection_pattern(BLOG_COLLECTION);
        if !self.cache.delete_by_pattern(&pattern).await {
            debug!(
                target = "cachet::content",
                pattern = %pattern,
                "Cache invalidation skipped; entries expire by TTL"
            );
        }
    }
}

fn not_found(err: RepoError) -> ContentError {
    match err {
        RepoError::NotFound => ContentError::NotFound,
        other => ContentError::Repo(other),
    }
}
