use std::sync::Arc;

use serde::Serialize;

use crate::application::admin::{AdminError, COUNTRIES, normalize_optional, now};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{DEFAULT_SEARCH_LIMIT, Listing, PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, SortKey};
use crate::cache::{Namespace, VersionedCache};
use crate::domain::entities::CountryRecord;
use crate::domain::error::{DomainError, require_text};
use crate::domain::slug::derive_slug;

const COUNTRY_EXISTS: &str = "country already exists";

impl Document for CountryRecord {
    const NAMESPACE: Namespace = COUNTRIES;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone)]
pub struct CreateCountryCommand {
    /// ISO 3166-1 alpha-2 code; becomes the id.
    pub country_code: String,
    pub name: String,
    /// Derived from `name` when absent.
    pub slug: Option<String>,
    pub flag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateCountryCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
}

#[derive(Clone)]
pub struct AdminCountryService {
    countries: CachedCollection<CountryRecord>,
}

impl AdminCountryService {
    pub fn new(repo: Arc<dyn DocumentRepo<CountryRecord>>, cache: VersionedCache) -> Self {
        Self {
            countries: CachedCollection::new(repo, cache),
        }
    }

    pub async fn list(&self, page: PageRequest) -> Result<Paginated<CountryRecord>, AdminError> {
        Ok(self
            .countries
            .list("list", &Filter::new(), &[SortKey::asc("slug")], page)
            .await?)
    }

    /// Prefix search over slug, name and ISO code.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> Result<Listing<CountryRecord>, AdminError> {
        let query = query.trim();
        let mut alternatives = vec![
            Filter::new().starts_with("name", query, true),
            Filter::new().starts_with("id", query, true),
        ];
        if let Ok(normalized) = derive_slug(query) {
            alternatives.push(Filter::new().starts_with("slug", &normalized, false));
        }

        Ok(self
            .countries
            .search(
                "search",
                &Filter::new().any(alternatives),
                &[SortKey::asc("slug")],
                limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1),
            )
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<CountryRecord>, AdminError> {
        Ok(self.countries.get(&id.trim().to_uppercase()).await?)
    }

    pub async fn create(&self, command: CreateCountryCommand) -> Result<CountryRecord, AdminError> {
        let id = require_text("country_code", &command.country_code)?.to_uppercase();
        if id.len() != 2 || !id.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation("country_code", "must be a two-letter ISO code").into());
        }
        let name = require_text("name", &command.name)?;
        let slug = match normalize_optional(command.slug) {
            Some(slug) => slug.to_lowercase(),
            None => derive_slug(&name)?,
        };

        let timestamp = now();
        let record = CountryRecord {
            country_code: Some(id.clone()),
            id,
            name,
            slug,
            flag: normalize_optional(command.flag),
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.countries
            .create(record)
            .await
            .map_err(super::conflict_on_duplicate(COUNTRY_EXISTS))
    }

    /// The id is immutable; only descriptive fields change.
    pub async fn update(
        &self,
        id: &str,
        mut command: UpdateCountryCommand,
    ) -> Result<Option<CountryRecord>, AdminError> {
        if let Some(name) = command.name.as_deref() {
            command.name = Some(require_text("name", name)?);
        }
        command.slug = normalize_optional(command.slug).map(|slug| slug.to_lowercase());

        let patch = Patch::from_partial(&command)?;
        if patch.is_empty() {
            return self.get(id).await;
        }
        self.countries
            .update(&id.trim().to_uppercase(), &patch)
            .await
            .map_err(super::conflict_on_duplicate(COUNTRY_EXISTS))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.countries.delete(&id.trim().to_uppercase()).await?)
    }
}
