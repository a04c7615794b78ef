//! URL slugs for blog documents.
//!
//! A valid slug is exactly what `slug::slugify` produces: lowercase ASCII
//! alphanumerics separated by single hyphens.

use slug::slugify;
use thiserror::Error;

const MAX_SUFFIX_ATTEMPTS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("`{slug}` is not a canonical slug")]
    NotCanonical { slug: String },
    #[error("exhausted attempts to find a unique slug for `{base}`")]
    Exhausted { base: String },
}

/// Derive a slug from a human-readable title.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let candidate = slugify(input);
    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Accept `slug` only when it is already in canonical form.
pub fn validate_slug(slug: &str) -> Result<(), SlugError> {
    if slug.is_empty() {
        return Err(SlugError::EmptyInput);
    }
    if slugify(slug) != slug {
        return Err(SlugError::NotCanonical {
            slug: slug.to_string(),
        });
    }
    Ok(())
}

/// Slug for `input` that `is_unique` accepts, suffixing `-2`, `-3`, ... on collisions.
pub fn generate_unique_slug<F>(input: &str, mut is_unique: F) -> Result<String, SlugError>
where
    F: FnMut(&str) -> bool,
{
    let base = derive_slug(input)?;

    if is_unique(&base) {
        return Ok(base);
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{base}-{attempt}");
        if is_unique(&candidate) {
            return Ok(candidate);
        }
    }

    Err(SlugError::Exhausted { base })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_slug_normalizes_titles() {
        assert_eq!(
            derive_slug("Caching at the Edge!").expect("slug"),
            "caching-at-the-edge"
        );
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
        assert!(matches!(
            derive_slug("!!!"),
            Err(SlugError::Unrepresentable { .. })
        ));
    }

    #[test]
    fn validate_slug_rejects_non_canonical() {
        assert!(validate_slug("hello-world").is_ok());
        assert!(validate_slug("Hello-World").is_err());
        assert!(validate_slug("hello world").is_err());
        assert!(validate_slug("hello--world").is_err());
        assert_eq!(validate_slug(""), Err(SlugError::EmptyInput));
    }

    #[test]
    fn generate_unique_slug_appends_counter() {
        let mut existing = vec!["rate-limits".to_string()];
        let slug = generate_unique_slug("Rate Limits", |candidate| {
            if existing.iter().any(|taken| taken == candidate) {
                false
            } else {
                existing.push(candidate.to_string());
                true
            }
        })
        .expect("unique slug");

        assert_eq!(slug, "rate-limits-2");
    }

    #[test]
    fn generate_unique_slug_exhausted() {
        let result = generate_unique_slug("Example", |_| false).expect_err("should exhaust");
        assert_eq!(
            result,
            SlugError::Exhausted {
                base: "example".to_string()
            }
        );
    }
}
