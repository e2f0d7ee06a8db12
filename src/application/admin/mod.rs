//! Application services for the administrative surface.
//!
//! One service per collection, each caching under its own namespace. Every
//! write goes through [`crate::application::collection::CachedCollection`], so
//! cache invalidation follows the same rules everywhere.

pub mod ads;
pub mod cities;
pub mod connectivity;
pub mod countries;
pub mod dashboard;
pub mod dropdowns;
pub mod faqs;
pub mod feedback;
pub mod pages;
pub mod servers;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{RepoError, Repositories};
use crate::cache::{AggregateCache, Namespace, VersionedCache};
use crate::domain::error::DomainError;
use crate::domain::slug::SlugError;

pub use ads::AdminAdService;
pub use cities::AdminCityService;
pub use connectivity::AdminConnectivityService;
pub use countries::AdminCountryService;
pub use dashboard::AdminDashboardService;
pub use dropdowns::AdminDropdownService;
pub use faqs::AdminFaqService;
pub use feedback::AdminFeedbackService;
pub use pages::AdminPageService;
pub use servers::AdminServerService;

pub const ADS: Namespace = Namespace::new("v1:ads");
pub const COUNTRIES: Namespace = Namespace::new("v1:countries");
pub const CITIES: Namespace = Namespace::new("v1:cities");
pub const FAQS: Namespace = Namespace::new("v1:faqs");
pub const FEEDBACK: Namespace = Namespace::new("v1:feedback");
pub const DROPDOWNS: Namespace = Namespace::new("v1:dropdowns");
pub const PAGES: Namespace = Namespace::new("v1:pages");
pub const SERVERS: Namespace = Namespace::new("v1:servers");
pub const CONNECTIVITY: Namespace = Namespace::new("v1:connectivity");
pub const DASHBOARD: Namespace = Namespace::new("v1:dashboard");

/// Namespaces that carry a generation counter.
pub const VERSIONED_NAMESPACES: [Namespace; 9] = [
    ADS,
    COUNTRIES,
    CITIES,
    FAQS,
    FEEDBACK,
    DROPDOWNS,
    PAGES,
    SERVERS,
    CONNECTIVITY,
];

/// Resolve a namespace name given on the command line.
pub fn namespace_by_name(name: &str) -> Option<Namespace> {
    VERSIONED_NAMESPACES
        .into_iter()
        .find(|namespace| namespace.as_str() == name)
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(RepoError),
}

impl AdminError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl From<SlugError> for AdminError {
    fn from(error: SlugError) -> Self {
        Self::Domain(DomainError::from(error))
    }
}

impl From<RepoError> for AdminError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::Duplicate { constraint } => {
                Self::Conflict(format!("duplicate value violates `{constraint}`"))
            }
            other => Self::Repo(other),
        }
    }
}

/// Map a unique-index violation to a conflict carrying `message`.
pub(crate) fn conflict_on_duplicate(message: &'static str) -> impl Fn(RepoError) -> AdminError {
    move |error| match error {
        RepoError::Duplicate { .. } => AdminError::conflict(message),
        other => AdminError::Repo(other),
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Timestamp filter operand, serialized the way stored documents carry it.
#[derive(Serialize)]
pub(crate) struct Rfc3339Time(#[serde(with = "time::serde::rfc3339")] pub(crate) OffsetDateTime);

/// Trim optional text, treating blank input as unset.
pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Every admin service, wired to one repository bundle and one cache.
#[derive(Clone)]
pub struct AdminServices {
    pub ads: AdminAdService,
    pub countries: AdminCountryService,
    pub cities: AdminCityService,
    pub faqs: AdminFaqService,
    pub feedback: AdminFeedbackService,
    pub dropdowns: AdminDropdownService,
    pub pages: AdminPageService,
    pub servers: AdminServerService,
    pub connectivity: AdminConnectivityService,
    pub dashboard: AdminDashboardService,
}

impl AdminServices {
    pub fn new(repos: &Repositories, cache: VersionedCache) -> Self {
        let aggregate_ttl = cache.config().aggregate_ttl();
        let session_stats = AggregateCache::new(cache.client().clone(), CONNECTIVITY, aggregate_ttl);
        let dashboard_stats = AggregateCache::new(cache.client().clone(), DASHBOARD, aggregate_ttl);

        Self {
            ads: AdminAdService::new(repos.ads.clone(), cache.clone()),
            countries: AdminCountryService::new(repos.countries.clone(), cache.clone()),
            cities: AdminCityService::new(repos.cities.clone(), cache.clone()),
            faqs: AdminFaqService::new(repos.faqs.clone(), cache.clone()),
            feedback: AdminFeedbackService::new(repos.feedback.clone(), cache.clone()),
            dropdowns: AdminDropdownService::new(repos.dropdowns.clone(), cache.clone()),
            pages: AdminPageService::new(repos.pages.clone(), cache.clone()),
            servers: AdminServerService::new(
                repos.servers.clone(),
                repos.countries.clone(),
                repos.cities.clone(),
                cache.clone(),
            ),
            connectivity: AdminConnectivityService::new(
                repos.connectivity.clone(),
                repos.servers.clone(),
                repos.countries.clone(),
                repos.cities.clone(),
                cache,
                session_stats,
            ),
            dashboard: AdminDashboardService::new(repos.clone(), dashboard_stats),
        }
    }
}
