//! Blog documents and listing queries.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{error::DomainError, slug::validate_slug};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogRecord {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub author: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub featured_image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields supplied when creating a document. A missing slug is derived from
/// the title.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlog {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub author: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub featured_image: Option<String>,
}

impl NewBlog {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::missing("title"));
        }
        if self.author.trim().is_empty() {
            return Err(DomainError::missing("author"));
        }
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        Ok(())
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogUpdate {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub author: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub featured_image: Option<String>,
}

impl BlogUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(DomainError::missing("title"));
        }
        if self.author.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(DomainError::missing("author"));
        }
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        Ok(())
    }

    pub fn apply(self, record: &mut BlogRecord, now: OffsetDateTime) {
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(slug) = self.slug {
            record.slug = slug;
        }
        if let Some(author) = self.author {
            record.author = author;
        }
        if self.published_at.is_some() {
            record.published_at = self.published_at;
        }
        if self.featured_image.is_some() {
            record.featured_image = self.featured_image;
        }
        record.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    PublishedAt,
    CreatedAt,
    UpdatedAt,
    Title,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublishedAt => "publishedAt",
            Self::CreatedAt => "createdAt",
            Self::UpdatedAt => "updatedAt",
            Self::Title => "title",
        }
    }
}

/// `field` ascending or `-field` descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlogSort {
    pub field: SortField,
    pub descending: bool,
}

impl Default for BlogSort {
    fn default() -> Self {
        Self {
            field: SortField::PublishedAt,
            descending: true,
        }
    }
}

impl fmt::Display for BlogSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            f.write_str("-")?;
        }
        f.write_str(self.field.as_str())
    }
}

impl FromStr for BlogSort {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (descending, name) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let field = match name {
            "publishedAt" => SortField::PublishedAt,
            "createdAt" => SortField::CreatedAt,
            "updatedAt" => SortField::UpdatedAt,
            "title" => SortField::Title,
            other => {
                return Err(DomainError::validation(format!(
                    "unsupported sort field `{other}`"
                )));
            }
        };
        Ok(Self { field, descending })
    }
}

/// Normalized listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlogQuery {
    pub limit: u32,
    pub page: u32,
    pub sort: BlogSort,
}

impl Default for BlogQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            page: 1,
            sort: BlogSort::default(),
        }
    }
}

impl BlogQuery {
    /// Clamp `limit` to `1..=100` and `page` to at least 1.
    pub fn new(limit: Option<u32>, page: Option<u32>, sort: BlogSort) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            page: page.unwrap_or(1).max(1),
            sort,
        }
    }

    /// Stable textual form used to key cached results.
    pub fn canonical(&self) -> String {
        format!("limit={}&page={}&sort={}", self.limit, self.page, self.sort)
    }

    pub fn is_default_listing(&self) -> bool {
        *self == Self::default()
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

/// One page of documents with totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPage {
    pub docs: Vec<BlogRecord>,
    pub total_docs: u64,
    pub limit: u32,
    pub page: u32,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl BlogPage {
    pub fn new(docs: Vec<BlogRecord>, total_docs: u64, query: &BlogQuery) -> Self {
        let total_pages = total_docs.div_ceil(u64::from(query.limit)) as u32;
        Self {
            docs,
            total_docs,
            limit: query.limit,
            page: query.page,
            total_pages,
            has_next_page: query.page < total_pages,
            has_prev_page: query.page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn record(slug: &str) -> BlogRecord {
        BlogRecord {
            id: Uuid::new_v4(),
            title: "Title".into(),
            slug: slug.into(),
            author: "ada".into(),
            published_at: Some(datetime!(2025-03-01 09:00 UTC)),
            featured_image: None,
            created_at: datetime!(2025-02-28 12:00 UTC),
            updated_at: datetime!(2025-02-28 12:00 UTC),
        }
    }

    #[test]
    fn sort_parses_direction_and_field() {
        assert_eq!(
            "-publishedAt".parse::<BlogSort>().expect("sort"),
            BlogSort::default()
        );
        let title: BlogSort = "title".parse().expect("sort");
        assert_eq!(title.field, SortField::Title);
        assert!(!title.descending);
        assert_eq!(title.to_string(), "title");
        assert!("-views".parse::<BlogSort>().is_err());
    }

    #[test]
    fn query_clamps_and_canonicalizes() {
        let query = BlogQuery::new(Some(0), Some(0), BlogSort::default());
        assert_eq!(query.limit, 1);
        assert_eq!(query.page, 1);

        let query = BlogQuery::new(Some(500), None, BlogSort::default());
        assert_eq!(query.limit, MAX_PAGE_LIMIT);

        assert_eq!(
            BlogQuery::default().canonical(),
            "limit=10&page=1&sort=-publishedAt"
        );
        assert!(BlogQuery::new(None, None, BlogSort::default()).is_default_listing());
    }

    #[test]
    fn page_totals() {
        let query = BlogQuery::new(Some(2), Some(2), BlogSort::default());
        let page = BlogPage::new(vec![record("a"), record("b")], 5, &query);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next_page);
        assert!(page.has_prev_page);

        let empty = BlogPage::new(Vec::new(), 0, &BlogQuery::default());
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
        assert!(!empty.has_prev_page);
    }

    #[test]
    fn record_serializes_camel_case() {
        let value = serde_json::to_value(record("hello")).expect("json");
        assert_eq!(value["publishedAt"], "2025-03-01T09:00:00Z");
        assert!(value["featuredImage"].is_null());
        assert_eq!(value["slug"], "hello");
    }

    #[test]
    fn new_blog_validation() {
        let mut blog = NewBlog {
            title: "Hello".into(),
            author: "ada".into(),
            ..Default::default()
        };
        assert!(blog.validate().is_ok());

        blog.slug = Some("Not A Slug".into());
        assert!(matches!(blog.validate(), Err(DomainError::Slug(_))));

        blog.slug = None;
        blog.author = " ".into();
        assert!(matches!(
            blog.validate(),
            Err(DomainError::MissingField { field: "author" })
        ));
    }
}
