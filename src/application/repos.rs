//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::blog::{BlogPage, BlogQuery, BlogRecord, BlogUpdate, NewBlog};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Source of truth for blog documents.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn list_blogs(&self, query: &BlogQuery) -> Result<BlogPage, RepoError>;

    async fn find_blog_by_slug(&self, slug: &str) -> Result<Option<BlogRecord>, RepoError>;

    async fn find_blog_by_id(&self, id: Uuid) -> Result<Option<BlogRecord>, RepoError>;

    async fn create_blog(&self, blog: NewBlog) -> Result<BlogRecord, RepoError>;

    async fn update_blog(&self, id: Uuid, update: BlogUpdate) -> Result<BlogRecord, RepoError>;

    async fn delete_blog(&self, id: Uuid) -> Result<(), RepoError>;
}
