//! In-memory content repository, optionally seeded from TOML.
//!
//! ```toml
//! [[blogs]]
//! title = "Caching at the edge"
//! author = "ada"
//! published_at = "2025-03-01T09:00:00Z"
//! ```

use std::{cmp::Ordering, collections::HashMap, path::Path};

use async_trait::async_trait;
use serde::Deserialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::{
    application::repos::{ContentRepo, RepoError},
    domain::{
        blog::{BlogPage, BlogQuery, BlogRecord, BlogSort, BlogUpdate, NewBlog, SortField},
        slug::generate_unique_slug,
    },
    infra::error::InfraError,
};

const SLUG_CONSTRAINT: &str = "blogs_slug_key";

#[derive(Debug, Default)]
pub struct MemoryContentRepo {
    blogs: RwLock<HashMap<Uuid, BlogRecord>>,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    blogs: Vec<SeedBlog>,
}

#[derive(Debug, Deserialize)]
struct SeedBlog {
    title: String,
    #[serde(default)]
    slug: Option<String>,
    author: String,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    featured_image: Option<String>,
}

impl MemoryContentRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load documents from a TOML seed file.
    pub async fn from_seed_file(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let shown = path.display().to_string();
        let repo = Self::from_seed_str(&raw)
            .await
            .map_err(|message| InfraError::seed(&shown, message))?;
        info!(
            target = "cachet::content",
            path = %shown,
            blogs = repo.blogs.read().await.len(),
            "Loaded content seed"
        );
        Ok(repo)
    }

    async fn from_seed_str(raw: &str) -> Result<Self, String> {
        let seed: SeedFile = toml::from_str(raw).map_err(|err| err.to_string())?;
        let repo = Self::new();
        for (index, entry) in seed.blogs.into_iter().enumerate() {
            let published_at = entry
                .published_at
                .as_deref()
                .map(|value| OffsetDateTime::parse(value, &Rfc3339))
                .transpose()
                .map_err(|err| format!("blogs[{index}].published_at: {err}"))?;
            let blog = NewBlog {
                title: entry.title,
                slug: entry.slug,
                author: entry.author,
                published_at,
                featured_image: entry.featured_image,
            };
            blog
                .validate()
                .map_err(|err| format!("blogs[{index}]: {err}"))?;
            repo.create_blog(blog)
                .await
                .map_err(|err| format!("blogs[{index}]: {err}"))?;
        }
        Ok(repo)
    }
}

fn compare(a: &BlogRecord, b: &BlogRecord, sort: BlogSort) -> Ordering {
    let ordering = match sort.field {
        SortField::PublishedAt => a.published_at.cmp(&b.published_at),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Title => a.title.cmp(&b.title),
    };
    let ordering = if sort.descending {
        ordering.reverse()
    } else {
        ordering
    };
    ordering.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl ContentRepo for MemoryContentRepo {
    async fn list_blogs(&self, query: &BlogQuery) -> Result<BlogPage, RepoError> {
        let blogs = self.blogs.read().await;
        let mut all: Vec<&BlogRecord> = blogs.values().collect();
        all.sort_by(|a, b| compare(a, b, query.sort));

        let docs = all
            .into_iter()
            .skip(query.offset())
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(BlogPage::new(docs, blogs.len() as u64, query))
    }

    async fn find_blog_by_slug(&self, slug: &str) -> Result<Option<BlogRecord>, RepoError> {
        let blogs = self.blogs.read().await;
        Ok(blogs.values().find(|blog| blog.slug == slug).cloned())
    }

    async fn find_blog_by_id(&self, id: Uuid) -> Result<Option<BlogRecord>, RepoError> {
        Ok(self.blogs.read().await.get(&id).cloned())
    }

    async fn create_blog(&self, blog: NewBlog) -> Result<BlogRecord, RepoError> {
        let mut blogs = self.blogs.write().await;
        let taken = |candidate: &str| blogs.values().any(|existing| existing.slug == candidate);

        let slug = match blog.slug {
            Some(slug) if taken(&slug) => {
                return Err(RepoError::Duplicate {
                    constraint: SLUG_CONSTRAINT.to_string(),
                });
            }
            Some(slug) => slug,
            None => generate_unique_slug(&blog.title, |candidate| !taken(candidate))
                .map_err(|err| RepoError::invalid_input(err.to_string()))?,
        };

        let now = OffsetDateTime::now_utc();
        let record = BlogRecord {
            id: Uuid::new_v4(),
            title: blog.title,
            slug,
            author: blog.author,
            published_at: blog.published_at,
            featured_image: blog.featured_image,
            created_at: now,
            updated_at: now,
        };
        blogs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_blog(&self, id: Uuid, update: BlogUpdate) -> Result<BlogRecord, RepoError> {
        let mut blogs = self.blogs.write().await;
        if let Some(slug) = &update.slug {
            let clash = blogs
                .values()
                .any(|existing| existing.id != id && &existing.slug == slug);
            if clash {
                return Err(RepoError::Duplicate {
                    constraint: SLUG_CONSTRAINT.to_string(),
                });
            }
        }

        let record = blogs.get_mut(&id).ok_or(RepoError::NotFound)?;
        update.apply(record, OffsetDateTime::now_utc());
        Ok(record.clone())
    }

    async fn delete_blog(&self, id: Uuid) -> Result<(), RepoError> {
        self.blogs
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}
