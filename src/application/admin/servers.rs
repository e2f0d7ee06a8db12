use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::application::admin::{
    AdminError, CITIES, COUNTRIES, SERVERS, new_id, normalize_optional, now,
};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, RepoError, SortKey};
use crate::cache::{Namespace, VersionedCache};
use crate::domain::entities::{
    CityRecord, CountryRecord, OpenVpnConfig, ServerGeneral, ServerRecord, WireguardConfig,
    XrayConfig,
};
use crate::domain::error::require_text;
use crate::domain::types::{OsType, Protocol, ServerCategory, ServerMode};

const IP_IN_USE: &str = "IP already in use for this os_type";

impl Document for ServerRecord {
    const NAMESPACE: Namespace = SERVERS;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerListFilter {
    pub os_type: Option<OsType>,
    /// `Test` lists servers in every mode.
    pub mode: Option<ServerMode>,
    pub protocol: Option<Protocol>,
    /// Case-insensitive match on name, IP, city name or country name.
    pub search: Option<String>,
}

impl ServerListFilter {
    /// Collections a search term is resolved against.
    fn upstream(&self) -> &'static [Namespace] {
        if self.search.is_some() {
            &[COUNTRIES, CITIES]
        } else {
            &[]
        }
    }
}

/// Servers whose derived protocol is `protocol`: its block is filled and no
/// block ahead of it in precedence is.
fn protocol_filter(mut filter: Filter, protocol: Protocol) -> Filter {
    for ahead in Protocol::PRECEDENCE
        .into_iter()
        .take_while(|candidate| *candidate != protocol)
    {
        filter = filter.absent(ahead.config_field());
    }
    filter.present(protocol.config_field())
}

#[derive(Debug, Clone)]
pub struct CreateServerCommand {
    pub general: ServerGeneral,
    pub openvpn_config: Option<OpenVpnConfig>,
    pub wireguard_config: Option<WireguardConfig>,
    pub xray_config: Option<XrayConfig>,
}

/// Field-level update of `general`; the rest of the block is left untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateServerGeneral {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<ServerCategory>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pro: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ServerMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<OsType>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateServerCommand {
    pub general: UpdateServerGeneral,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenVpnConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WireguardConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct XrayConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadowsocks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vless: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmess: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trojan: Option<String>,
}

/// Servers of one country, as returned by [`AdminServerService::list_grouped`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryServers {
    pub country: String,
    pub country_code: String,
    pub flag: Option<String>,
    pub servers: Vec<ServerRecord>,
}

#[derive(Serialize)]
struct GroupedQuery<'a> {
    filter: &'a Filter,
    page: PageRequest,
}

fn newest_first() -> [SortKey; 1] {
    [SortKey::desc("created_at")]
}

#[derive(Clone)]
pub struct AdminServerService {
    servers: CachedCollection<ServerRecord>,
    countries: Arc<dyn DocumentRepo<CountryRecord>>,
    cities: Arc<dyn DocumentRepo<CityRecord>>,
}

impl AdminServerService {
    pub fn new(
        servers: Arc<dyn DocumentRepo<ServerRecord>>,
        countries: Arc<dyn DocumentRepo<CountryRecord>>,
        cities: Arc<dyn DocumentRepo<CityRecord>>,
        cache: VersionedCache,
    ) -> Self {
        Self {
            servers: CachedCollection::new(servers, cache),
            countries,
            cities,
        }
    }

    pub async fn list(
        &self,
        filter: &ServerListFilter,
        page: PageRequest,
    ) -> Result<Paginated<ServerRecord>, AdminError> {
        let query = self.resolve_filter(filter).await?;
        Ok(self
            .servers
            .list_spanning("list", filter.upstream(), &query, &newest_first(), page)
            .await?)
    }

    /// Matching servers grouped by country, paginated over countries.
    ///
    /// Each group carries the country's name and flag, so country writes
    /// retire these entries as well.
    pub async fn list_grouped(
        &self,
        filter: &ServerListFilter,
        page: PageRequest,
    ) -> Result<Paginated<CountryServers>, AdminError> {
        let query = self.resolve_filter(filter).await?;
        let params = GroupedQuery {
            filter: &query,
            page,
        };

        Ok(self
            .servers
            .list_with("grouped", &[COUNTRIES, CITIES], &params, || async {
                let servers = self
                    .servers
                    .repo()
                    .find_page(&query, &newest_first(), 0, u64::MAX)
                    .await?
                    .items;
                let groups = self.group_by_country(servers).await?;

                let total = groups.len() as u64;
                let data = groups
                    .into_iter()
                    .skip(usize::try_from(page.skip()).unwrap_or(usize::MAX))
                    .take(page.limit() as usize)
                    .collect();
                Ok::<_, RepoError>(Paginated::new(page, total, data))
            })
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ServerRecord>, AdminError> {
        Ok(self.servers.get(id).await?)
    }

    pub async fn create(&self, command: CreateServerCommand) -> Result<ServerRecord, AdminError> {
        let mut general = command.general;
        general.name = require_text("general.name", &general.name)?;
        general.ip = require_text("general.ip", &general.ip)?;
        general.country_id = require_text("general.country_id", &general.country_id)?.to_uppercase();
        general.city_id = require_text("general.city_id", &general.city_id)?;
        self.ensure_ip_free(&general.ip, general.os_type, None).await?;

        let timestamp = now();
        let record = ServerRecord {
            id: new_id(),
            general,
            openvpn_config: command.openvpn_config,
            wireguard_config: command.wireguard_config,
            xray_config: command.xray_config,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.servers
            .create(record)
            .await
            .map_err(super::conflict_on_duplicate(IP_IN_USE))
    }

    pub async fn update(
        &self,
        id: &str,
        mut command: UpdateServerCommand,
    ) -> Result<Option<ServerRecord>, AdminError> {
        let general = &mut command.general;
        if let Some(name) = general.name.as_deref() {
            general.name = Some(require_text("general.name", name)?);
        }
        general.ip = normalize_optional(general.ip.take());
        general.country_id = normalize_optional(general.country_id.take()).map(|id| id.to_uppercase());

        if general.ip.is_some() || general.os_type.is_some() {
            let Some(current) = self.servers.repo().find_by_id(id).await? else {
                return Ok(None);
            };
            let ip = general.ip.as_deref().unwrap_or(&current.general.ip);
            let os_type = general.os_type.unwrap_or(current.general.os_type);
            self.ensure_ip_free(ip, os_type, Some(id)).await?;
        }

        let patch = Patch::from_partial(&command)?;
        self.apply(id, patch).await
    }

    pub async fn set_mode(&self, id: &str, mode: ServerMode) -> Result<Option<ServerRecord>, AdminError> {
        self.apply(id, Patch::new().set("general.mode", mode)).await
    }

    pub async fn set_is_pro(&self, id: &str, is_pro: bool) -> Result<Option<ServerRecord>, AdminError> {
        self.apply(id, Patch::new().set("general.is_pro", is_pro))
            .await
    }

    pub async fn update_openvpn_config(
        &self,
        id: &str,
        config: &OpenVpnConfigUpdate,
    ) -> Result<Option<ServerRecord>, AdminError> {
        self.apply(id, config_patch(Protocol::Openvpn, config)?)
            .await
    }

    pub async fn update_wireguard_config(
        &self,
        id: &str,
        config: &WireguardConfigUpdate,
    ) -> Result<Option<ServerRecord>, AdminError> {
        self.apply(id, config_patch(Protocol::Wireguard, config)?)
            .await
    }

    pub async fn update_xray_config(
        &self,
        id: &str,
        config: &XrayConfigUpdate,
    ) -> Result<Option<ServerRecord>, AdminError> {
        self.apply(id, config_patch(Protocol::Xray, config)?).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.servers.delete(id).await?)
    }

    /// Bulk removal with a single invalidation. Returns the number removed.
    pub async fn delete_many(&self, ids: &[String]) -> Result<u64, AdminError> {
        Ok(self.servers.delete_many(ids).await?)
    }

    async fn apply(&self, id: &str, patch: Patch) -> Result<Option<ServerRecord>, AdminError> {
        if patch.is_empty() {
            return self.get(id).await;
        }
        self.servers
            .update(id, &patch)
            .await
            .map_err(super::conflict_on_duplicate(IP_IN_USE))
    }

    async fn ensure_ip_free(
        &self,
        ip: &str,
        os_type: OsType,
        owner: Option<&str>,
    ) -> Result<(), AdminError> {
        let mut filter = Filter::new()
            .eq("general.ip", ip)
            .eq("general.os_type", os_type);
        if let Some(owner) = owner {
            filter = filter.ne("id", owner);
        }
        if self.servers.repo().find_one(&filter).await?.is_some() {
            return Err(AdminError::conflict(IP_IN_USE));
        }
        Ok(())
    }

    /// Translate the listing filter into a store filter. Country and city
    /// names are resolved to ids up front so the search stays one query.
    async fn resolve_filter(&self, filter: &ServerListFilter) -> Result<Filter, AdminError> {
        let mut query = Filter::new();
        if let Some(os_type) = filter.os_type {
            query = query.eq("general.os_type", os_type);
        }
        match filter.mode {
            Some(ServerMode::Test) | None => {}
            Some(mode) => query = query.eq("general.mode", mode),
        }
        if let Some(protocol) = filter.protocol {
            query = protocol_filter(query, protocol);
        }

        if let Some(search) = normalize_optional(filter.search.clone()) {
            let mut alternatives = vec![
                Filter::new().contains("general.name", &search),
                Filter::new().contains("general.ip", &search),
            ];
            let by_name = Filter::new().contains("name", &search);
            let countries = self.countries.find_page(&by_name, &[], 0, u64::MAX).await?;
            if !countries.items.is_empty() {
                let ids = countries.items.into_iter().map(|country| country.id);
                alternatives.push(Filter::new().is_in("general.country_id", ids));
            }
            let cities = self.cities.find_page(&by_name, &[], 0, u64::MAX).await?;
            if !cities.items.is_empty() {
                let ids = cities.items.into_iter().map(|city| city.id);
                alternatives.push(Filter::new().is_in("general.city_id", ids));
            }
            query = query.any(alternatives);
        }

        Ok(query)
    }

    /// Group servers by country in first-seen order. Servers whose country is
    /// unknown are left out.
    async fn group_by_country(
        &self,
        servers: Vec<ServerRecord>,
    ) -> Result<Vec<CountryServers>, RepoError> {
        let mut ids: Vec<&str> = Vec::new();
        for server in &servers {
            if !ids.contains(&server.general.country_id.as_str()) {
                ids.push(&server.general.country_id);
            }
        }
        let countries = self
            .countries
            .find_page(&Filter::new().is_in("id", &ids), &[], 0, u64::MAX)
            .await?
            .items;

        let mut groups: Vec<CountryServers> = Vec::new();
        for server in servers {
            let Some(country) = countries
                .iter()
                .find(|country| country.id == server.general.country_id)
            else {
                continue;
            };
            match groups
                .iter_mut()
                .find(|group| group.country_code == country.id)
            {
                Some(group) => group.servers.push(server),
                None => groups.push(CountryServers {
                    country: country.name.clone(),
                    country_code: country.id.clone(),
                    flag: country.flag.clone(),
                    servers: vec![server],
                }),
            }
        }
        Ok(groups)
    }
}

/// Patch addressing fields inside one protocol block, e.g. `xray_config.vless`.
fn config_patch(protocol: Protocol, config: &impl Serialize) -> Result<Patch, AdminError> {
    let block = serde_json::to_value(config)
        .map_err(|err| RepoError::invalid_input(err.to_string()))?;
    let mut wrapper = Map::new();
    wrapper.insert(protocol.config_field().to_string(), block);
    Ok(Patch::from_partial(&Value::Object(wrapper))?)
}
