use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::application::admin::{
    AdminError, CONNECTIVITY, Rfc3339Time, new_id, normalize_optional, now,
};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, RepoError, SortKey};
use crate::cache::{AggregateCache, Namespace, PointKey, VersionedCache};
use crate::domain::entities::{CityRecord, ConnectivityRecord, CountryRecord, ServerRecord};
use crate::domain::error::require_text;
use crate::domain::types::OsType;

const SESSION_OPEN: &str = "A session for this user and server is already open.";
const STATS_SCOPE: &str = "servers-with-connection-stats";

impl Document for ConnectivityRecord {
    const NAMESPACE: Namespace = CONNECTIVITY;

    fn id(&self) -> &str {
        &self.id
    }

    fn lookup_keys(&self) -> Vec<PointKey> {
        vec![PointKey::open_pair(&self.user_id, &self.server_id)]
    }
}

/// Listing filter. `from`/`to` bound `connected_at` inclusively.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityListFilter {
    pub user_id: Option<String>,
    pub server_id: Option<String>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl ConnectivityListFilter {
    fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(user_id) = normalize_optional(self.user_id.clone()) {
            filter = filter.eq("user_id", user_id);
        }
        if let Some(server_id) = normalize_optional(self.server_id.clone()) {
            filter = filter.eq("server_id", server_id);
        }
        if let Some(from) = self.from {
            filter = filter.gte("connected_at", Rfc3339Time(from));
        }
        if let Some(to) = self.to {
            filter = filter.lte("connected_at", Rfc3339Time(to));
        }
        filter
    }
}

/// A user and the server they connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPair {
    pub user_id: String,
    pub server_id: String,
}

impl SessionPair {
    pub fn new(user_id: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            server_id: server_id.into(),
        }
    }

    fn point(&self) -> PointKey {
        PointKey::open_pair(&self.user_id, &self.server_id)
    }

    fn open_filter(&self) -> Filter {
        Filter::new()
            .eq("user_id", &self.user_id)
            .eq("server_id", &self.server_id)
            .absent("disconnected_at")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerStatsFilter {
    pub os_type: Option<OsType>,
    /// Case-insensitive match on server, city or country name.
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub id: String,
    pub name: String,
    pub country: String,
    pub city: String,
    pub os_type: OsType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCounts {
    pub total: u64,
    /// Sessions still open.
    pub active: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConnectionStats {
    pub server: ServerSummary,
    pub connections: ConnectionCounts,
}

#[derive(Serialize)]
struct StatsParams<'a> {
    os_type: Option<OsType>,
    search: Option<&'a str>,
    page: PageRequest,
}

#[derive(Clone)]
pub struct AdminConnectivityService {
    sessions: CachedCollection<ConnectivityRecord>,
    servers: Arc<dyn DocumentRepo<ServerRecord>>,
    countries: Arc<dyn DocumentRepo<CountryRecord>>,
    cities: Arc<dyn DocumentRepo<CityRecord>>,
    stats: AggregateCache,
}

impl AdminConnectivityService {
    pub fn new(
        sessions: Arc<dyn DocumentRepo<ConnectivityRecord>>,
        servers: Arc<dyn DocumentRepo<ServerRecord>>,
        countries: Arc<dyn DocumentRepo<CountryRecord>>,
        cities: Arc<dyn DocumentRepo<CityRecord>>,
        cache: VersionedCache,
        stats: AggregateCache,
    ) -> Self {
        Self {
            sessions: CachedCollection::new(sessions, cache),
            servers,
            countries,
            cities,
            stats,
        }
    }

    pub async fn list(
        &self,
        filter: &ConnectivityListFilter,
        page: PageRequest,
    ) -> Result<Paginated<ConnectivityRecord>, AdminError> {
        Ok(self
            .sessions
            .list("list", &filter.to_filter(), &[SortKey::desc("connected_at")], page)
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConnectivityRecord>, AdminError> {
        Ok(self.sessions.get(id).await?)
    }

    /// The open session for `pair`, if any. Absence is cached briefly too.
    pub async fn open_by_pair(
        &self,
        pair: &SessionPair,
    ) -> Result<Option<ConnectivityRecord>, AdminError> {
        Ok(self
            .sessions
            .lookup(pair.point(), &pair.open_filter())
            .await?)
    }

    /// Open a session. Fails with a conflict while one is already open for the pair.
    pub async fn connect(&self, pair: &SessionPair) -> Result<ConnectivityRecord, AdminError> {
        let user_id = require_text("user_id", &pair.user_id)?;
        let server_id = require_text("server_id", &pair.server_id)?;
        let pair = SessionPair::new(user_id, server_id);

        // Checked against the store, not the cached lookup.
        if self
            .sessions
            .repo()
            .find_one(&pair.open_filter())
            .await?
            .is_some()
        {
            return Err(AdminError::conflict(SESSION_OPEN));
        }

        let timestamp = now();
        let record = ConnectivityRecord {
            id: new_id(),
            user_id: pair.user_id.clone(),
            server_id: pair.server_id.clone(),
            connected_at: timestamp,
            disconnected_at: None,
            created_at: timestamp,
            updated_at: timestamp,
        };

        let created = self
            .sessions
            .create_with(record, &[pair.point()])
            .await
            .map_err(super::conflict_on_duplicate(SESSION_OPEN))?;
        debug!(
            target = "vynox::admin::connectivity",
            session = %created.id,
            user = %created.user_id,
            server = %created.server_id,
            "Session opened"
        );
        Ok(created)
    }

    /// Close the open session for `pair`. `None` when nothing was open.
    pub async fn disconnect(
        &self,
        pair: &SessionPair,
    ) -> Result<Option<ConnectivityRecord>, AdminError> {
        let closed_at = now();
        let filter = pair
            .open_filter()
            .lte("connected_at", Rfc3339Time(closed_at));
        let patch = Patch::new().set("disconnected_at", Rfc3339Time(closed_at));
        Ok(self.sessions.update_where(&filter, &patch).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.sessions.delete(id).await?)
    }

    /// Per-server session totals, sorted by server name. Served from the
    /// short-lived aggregate cache.
    pub async fn servers_with_connection_stats(
        &self,
        filter: &ServerStatsFilter,
        page: PageRequest,
    ) -> Result<Paginated<ServerConnectionStats>, AdminError> {
        let search = normalize_optional(filter.search.clone());
        let params = StatsParams {
            os_type: filter.os_type,
            search: search.as_deref(),
            page,
        };

        Ok(self
            .stats
            .read_through(STATS_SCOPE, &params, || {
                self.compute_stats(filter.os_type, search.as_deref(), page)
            })
            .await?)
    }

    async fn compute_stats(
        &self,
        os_type: Option<OsType>,
        search: Option<&str>,
        page: PageRequest,
    ) -> Result<Paginated<ServerConnectionStats>, RepoError> {
        let mut server_filter = Filter::new();
        if let Some(os_type) = os_type {
            server_filter = server_filter.eq("general.os_type", os_type);
        }
        let servers = self
            .servers
            .find_page(&server_filter, &[], 0, u64::MAX)
            .await?
            .items;

        let country_ids: Vec<&str> = servers.iter().map(|s| s.general.country_id.as_str()).collect();
        let city_ids: Vec<&str> = servers.iter().map(|s| s.general.city_id.as_str()).collect();
        let countries: HashMap<String, String> = self
            .countries
            .find_page(&Filter::new().is_in("id", &country_ids), &[], 0, u64::MAX)
            .await?
            .items
            .into_iter()
            .map(|country| (country.id, country.name))
            .collect();
        let cities: HashMap<String, String> = self
            .cities
            .find_page(&Filter::new().is_in("id", &city_ids), &[], 0, u64::MAX)
            .await?
            .items
            .into_iter()
            .map(|city| (city.id, city.name))
            .collect();

        let needle = search.map(str::to_lowercase);
        let mut summaries: Vec<ServerSummary> = servers
            .into_iter()
            .filter_map(|server| {
                let country = countries.get(&server.general.country_id)?.clone();
                let city = cities.get(&server.general.city_id)?.clone();
                Some(ServerSummary {
                    id: server.id,
                    name: server.general.name,
                    country,
                    city,
                    os_type: server.general.os_type,
                })
            })
            .filter(|summary| {
                needle.as_deref().is_none_or(|needle| {
                    [&summary.name, &summary.city, &summary.country]
                        .iter()
                        .any(|text| text.to_lowercase().contains(needle))
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));

        let total = summaries.len() as u64;
        let visible: Vec<ServerSummary> = summaries
            .into_iter()
            .skip(usize::try_from(page.skip()).unwrap_or(usize::MAX))
            .take(page.limit() as usize)
            .collect();

        let server_ids: Vec<&str> = visible.iter().map(|summary| summary.id.as_str()).collect();
        let sessions = self
            .sessions
            .repo()
            .find_page(&Filter::new().is_in("server_id", &server_ids), &[], 0, u64::MAX)
            .await?
            .items;
        let mut counts: HashMap<&str, ConnectionCounts> = HashMap::new();
        for session in &sessions {
            let entry = counts.entry(session.server_id.as_str()).or_default();
            entry.total += 1;
            if session.is_open() {
                entry.active += 1;
            }
        }

        let data = visible
            .iter()
            .map(|summary| ServerConnectionStats {
                connections: counts.get(summary.id.as_str()).copied().unwrap_or_default(),
                server: summary.clone(),
            })
            .collect();
        Ok(Paginated::new(page, total, data))
    }
}
