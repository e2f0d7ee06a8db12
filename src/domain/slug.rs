//! Slug derivation for reference data (countries, cities, FAQ entries).
//!
//! Slugs are lowercase ASCII with `-` separators; accents are folded by the
//! `slug` crate. Uniqueness is checked by a caller-supplied predicate so the
//! derivation itself stays free of persistence.

use std::future::Future;

use slug::slugify;
use thiserror::Error;

const MAX_SUFFIX_ATTEMPTS: usize = 32;

/// Errors that can occur while generating a slug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("exhausted attempts to find a unique slug for `{base}`")]
    Exhausted { base: String },
}

/// Errors that can occur while generating a slug via an async uniqueness check.
#[derive(Debug, Error)]
pub enum SlugAsyncError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Predicate(E),
}

/// Derive a base slug from human-readable text, e.g. `"São Paulo"` -> `"sao-paulo"`.
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

/// Produce a slug the async predicate accepts, suffixing `-2`, `-3`, ... on collision.
///
/// `is_unique` must resolve to `true` when the candidate is free.
pub async fn generate_unique_slug_async<F, Fut, E>(
    input: &str,
    mut is_unique: F,
) -> Result<String, SlugAsyncError<E>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let base = derive_slug(input)?;

    if is_unique(base.clone())
        .await
        .map_err(SlugAsyncError::Predicate)?
    {
        return Ok(base);
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{base}-{attempt}");
        if is_unique(candidate.clone())
            .await
            .map_err(SlugAsyncError::Predicate)?
        {
            return Ok(candidate);
        }
    }

    Err(SlugAsyncError::Slug(SlugError::Exhausted { base }))
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    #[test]
    fn folds_accents_and_punctuation() {
        assert_eq!(derive_slug("São Paulo").unwrap(), "sao-paulo");
        assert_eq!(
            derive_slug("How do I reset my VPN?").unwrap(),
            "how-do-i-reset-my-vpn"
        );
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
        assert!(matches!(
            derive_slug("!!!"),
            Err(SlugError::Unrepresentable { .. })
        ));
    }

    #[tokio::test]
    async fn suffixes_until_unique() {
        let taken = ["reset-vpn", "reset-vpn-2"];
        let slug = generate_unique_slug_async("Reset VPN", |candidate| async move {
            Ok::<_, Infallible>(!taken.contains(&candidate.as_str()))
        })
        .await
        .unwrap();
        assert_eq!(slug, "reset-vpn-3");
    }
}
