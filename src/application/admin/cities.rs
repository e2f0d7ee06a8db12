use std::sync::Arc;

use serde::Serialize;

use crate::application::admin::{AdminError, CITIES, new_id, normalize_optional, now};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{DEFAULT_SEARCH_LIMIT, Listing, PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, SortKey};
use crate::cache::{Namespace, VersionedCache};
use crate::domain::entities::CityRecord;
use crate::domain::error::require_text;
use crate::domain::slug::derive_slug;

const CITY_EXISTS: &str = "city already exists in this country";

impl Document for CityRecord {
    const NAMESPACE: Namespace = CITIES;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct CityListFilter {
    pub country: Option<String>,
    pub state: Option<String>,
}

impl CityListFilter {
    fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(country) = upper(self.country.clone()) {
            filter = filter.eq("country", country);
        }
        if let Some(state) = upper(self.state.clone()) {
            filter = filter.eq("state", state);
        }
        filter
    }
}

fn upper(value: Option<String>) -> Option<String> {
    normalize_optional(value).map(|value| value.to_uppercase())
}

fn default_sort() -> [SortKey; 3] {
    [
        SortKey::asc("country"),
        SortKey::asc("state"),
        SortKey::asc("slug"),
    ]
}

#[derive(Debug, Clone)]
pub struct CreateCityCommand {
    pub name: String,
    /// Derived from `name` when absent.
    pub slug: Option<String>,
    pub state: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateCityCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

#[derive(Clone)]
pub struct AdminCityService {
    cities: CachedCollection<CityRecord>,
}

impl AdminCityService {
    pub fn new(repo: Arc<dyn DocumentRepo<CityRecord>>, cache: VersionedCache) -> Self {
        Self {
            cities: CachedCollection::new(repo, cache),
        }
    }

    pub async fn list(
        &self,
        filter: &CityListFilter,
        page: PageRequest,
    ) -> Result<Paginated<CityRecord>, AdminError> {
        Ok(self
            .cities
            .list("list", &filter.to_filter(), &default_sort(), page)
            .await?)
    }

    /// Cities whose slug starts with the slugged query or whose name starts with it.
    pub async fn search(
        &self,
        query: &str,
        within: &CityListFilter,
        limit: Option<u32>,
    ) -> Result<Listing<CityRecord>, AdminError> {
        let query = query.trim();
        let mut alternatives = vec![Filter::new().starts_with("name", query, true)];
        if let Ok(normalized) = derive_slug(query) {
            alternatives.push(Filter::new().starts_with("slug", &normalized, false));
        }

        Ok(self
            .cities
            .search(
                "search",
                &within.to_filter().any(alternatives),
                &default_sort(),
                limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1),
            )
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<CityRecord>, AdminError> {
        Ok(self.cities.get(id).await?)
    }

    pub async fn create(&self, command: CreateCityCommand) -> Result<CityRecord, AdminError> {
        let name = require_text("name", &command.name)?;
        let slug = match normalize_optional(command.slug) {
            Some(slug) => slug.to_lowercase(),
            None => derive_slug(&name)?,
        };

        let timestamp = now();
        let record = CityRecord {
            id: new_id(),
            name,
            slug,
            state: require_text("state", &command.state)?.to_uppercase(),
            country: require_text("country", &command.country)?.to_uppercase(),
            latitude: command.latitude,
            longitude: command.longitude,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.cities
            .create(record)
            .await
            .map_err(super::conflict_on_duplicate(CITY_EXISTS))
    }

    pub async fn update(
        &self,
        id: &str,
        mut command: UpdateCityCommand,
    ) -> Result<Option<CityRecord>, AdminError> {
        if let Some(name) = command.name.as_deref() {
            command.name = Some(require_text("name", name)?);
        }
        command.slug = normalize_optional(command.slug).map(|slug| slug.to_lowercase());
        command.state = upper(command.state);
        command.country = upper(command.country);

        let patch = Patch::from_partial(&command)?;
        if patch.is_empty() {
            return self.get(id).await;
        }
        self.cities
            .update(id, &patch)
            .await
            .map_err(super::conflict_on_duplicate(CITY_EXISTS))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.cities.delete(id).await?)
    }
}
