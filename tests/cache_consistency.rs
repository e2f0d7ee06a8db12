//! Read-after-write behaviour of the admin services over the in-process stores.
//!
//! Each test reaches around the cached services through the raw repositories
//! to prove which reads were served from the cache and which were recomputed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use time::OffsetDateTime;
use vynox::application::admin::ads::{AdListFilter, CreateAdCommand, UpdateAdCommand};
use vynox::application::admin::connectivity::SessionPair;
use vynox::application::admin::cities::CreateCityCommand;
use vynox::application::admin::countries::{CreateCountryCommand, UpdateCountryCommand};
use vynox::application::admin::servers::{CreateServerCommand, ServerListFilter};
use vynox::application::admin::{ADS, AdminServices, CONNECTIVITY, COUNTRIES};
use vynox::application::pagination::PageRequest;
use vynox::application::repos::{DocumentRepo, Patch, Repositories};
use vynox::cache::{
    CacheClient, CacheConfig, KvError, KvStore, MemoryStore, PointKey, VersionedCache,
};
use vynox::domain::entities::{AdRecord, ServerGeneral, WireguardConfig};
use vynox::domain::types::{AdPosition, AdType, OsType, ServerMode};
use vynox::infra::db::memory_repositories;

struct Harness {
    repos: Repositories,
    store: Arc<MemoryStore>,
    services: AdminServices,
}

fn harness() -> Harness {
    let repos = memory_repositories();
    let store = Arc::new(MemoryStore::default());
    let cache = VersionedCache::new(CacheClient::new(store.clone()), CacheConfig::default());
    let services = AdminServices::new(&repos, cache);
    Harness {
        repos,
        store,
        services,
    }
}

fn banner(ad_id: &str) -> CreateAdCommand {
    CreateAdCommand {
        ad_type: AdType::Banner,
        position: AdPosition::Home,
        status: true,
        ad_id: Some(ad_id.to_string()),
        os_type: OsType::Android,
    }
}

fn raw_ad(id: &str) -> AdRecord {
    let now = OffsetDateTime::now_utc();
    AdRecord {
        id: id.to_string(),
        ad_type: AdType::Reward,
        position: AdPosition::Splash,
        status: true,
        ad_id: None,
        os_type: OsType::Ios,
        created_at: now,
        updated_at: now,
    }
}

async fn stored(store: &MemoryStore, key: String) -> Option<String> {
    store.get(&key).await.expect("memory store never fails")
}

#[tokio::test]
async fn list_reflects_a_create_on_the_next_read() {
    let h = harness();
    let all = AdListFilter::default();

    let before = h.services.ads.list(&all, PageRequest::default()).await.expect("list");
    assert_eq!(before.pagination.total, 0);
    assert_eq!(stored(&h.store, ADS.version_key()).await.as_deref(), Some("1"));

    h.services.ads.create(banner("ca-app-1")).await.expect("create");

    let after = h.services.ads.list(&all, PageRequest::default()).await.expect("list");
    assert_eq!(after.pagination.total, 1);
    assert_eq!(stored(&h.store, ADS.version_key()).await.as_deref(), Some("2"));
}

#[tokio::test]
async fn cached_list_hides_writes_that_bypass_the_service() {
    let h = harness();
    let all = AdListFilter::default();

    assert_eq!(
        h.services.ads.list(&all, PageRequest::default()).await.expect("list").pagination.total,
        0
    );

    h.repos.ads.insert(raw_ad("raw-1")).await.expect("raw insert");
    let stale = h.services.ads.list(&all, PageRequest::default()).await.expect("list");
    assert_eq!(stale.pagination.total, 0, "second read must be a cache hit");

    h.services.ads.create(banner("ca-app-2")).await.expect("create");
    let fresh = h.services.ads.list(&all, PageRequest::default()).await.expect("list");
    assert_eq!(fresh.pagination.total, 2);
}

#[tokio::test]
async fn point_entry_is_dropped_by_an_update() {
    let h = harness();
    let created = h.services.ads.create(banner("ca-app-3")).await.expect("create");

    let cached = h.services.ads.get(&created.id).await.expect("get").expect("present");
    assert!(cached.status);

    h.repos
        .ads
        .update(&created.id, &Patch::new().set("status", false))
        .await
        .expect("raw update");
    let stale = h.services.ads.get(&created.id).await.expect("get").expect("present");
    assert!(stale.status, "point read must come from the cache");

    h.services
        .ads
        .update(
            &created.id,
            UpdateAdCommand {
                position: Some(AdPosition::Report),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("present");

    let fresh = h.services.ads.get(&created.id).await.expect("get").expect("present");
    assert!(!fresh.status);
    assert_eq!(fresh.position, AdPosition::Report);
}

#[tokio::test]
async fn writes_only_advance_their_own_namespace() {
    let h = harness();
    h.services.countries.list(PageRequest::default()).await.expect("list");
    h.services.ads.list(&AdListFilter::default(), PageRequest::default()).await.expect("list");

    h.services.ads.create(banner("ca-app-4")).await.expect("create");

    assert_eq!(stored(&h.store, ADS.version_key()).await.as_deref(), Some("2"));
    assert_eq!(stored(&h.store, COUNTRIES.version_key()).await.as_deref(), Some("1"));
}

#[tokio::test]
async fn concurrent_writes_each_advance_the_generation_once() {
    let h = harness();
    h.services.ads.list(&AdListFilter::default(), PageRequest::default()).await.expect("list");

    let writes = (0..10).map(|n| {
        let ads = h.services.ads.clone();
        async move { ads.create(banner(&format!("ca-app-burst-{n}"))).await }
    });
    for result in join_all(writes).await {
        result.expect("create");
    }

    assert_eq!(stored(&h.store, ADS.version_key()).await.as_deref(), Some("11"));
    let listed = h
        .services
        .ads
        .list(&AdListFilter::default(), PageRequest::new(1, 50))
        .await
        .expect("list");
    assert_eq!(listed.pagination.total, 10);
}

#[tokio::test]
async fn racing_updates_settle_on_the_stored_value() {
    let h = harness();
    let created = h.services.ads.create(banner("ca-app-race")).await.expect("create");

    for _ in 0..20 {
        h.services.ads.get(&created.id).await.expect("get");
        let to = |position| UpdateAdCommand {
            position: Some(position),
            ..Default::default()
        };
        let (left, right) = tokio::join!(
            h.services.ads.update(&created.id, to(AdPosition::Home)),
            h.services.ads.update(&created.id, to(AdPosition::Report)),
        );
        left.expect("update");
        right.expect("update");

        let stored = h
            .repos
            .ads
            .find_by_id(&created.id)
            .await
            .expect("raw read")
            .expect("present");
        let served = h.services.ads.get(&created.id).await.expect("get").expect("present");
        assert_eq!(served.position, stored.position);
    }
}

#[tokio::test]
async fn open_session_lookup_caches_absence_until_connect() {
    let h = harness();
    let pair = SessionPair::new("user-1", "server-1");

    assert!(h.services.connectivity.open_by_pair(&pair).await.expect("lookup").is_none());
    let key = CONNECTIVITY.point_key(&PointKey::open_pair("user-1", "server-1"));
    assert_eq!(stored(&h.store, key.clone()).await.as_deref(), Some("null"));

    let opened = h.services.connectivity.connect(&pair).await.expect("connect");
    let found = h.services.connectivity.open_by_pair(&pair).await.expect("lookup");
    assert_eq!(found.map(|session| session.id), Some(opened.id.clone()));

    h.services
        .connectivity
        .disconnect(&pair)
        .await
        .expect("disconnect")
        .expect("was open");
    assert!(h.services.connectivity.open_by_pair(&pair).await.expect("lookup").is_none());
}

#[tokio::test]
async fn disabled_cache_reads_straight_through() {
    let repos = memory_repositories();
    let services = AdminServices::new(&repos, VersionedCache::disabled());

    services
        .countries
        .create(CreateCountryCommand {
            country_code: "de".into(),
            name: "Germany".into(),
            slug: None,
            flag: None,
        })
        .await
        .expect("create");
    assert_eq!(
        services.countries.list(PageRequest::default()).await.expect("list").pagination.total,
        1
    );

    repos
        .countries
        .update("DE", &Patch::new().set("name", "Deutschland"))
        .await
        .expect("raw update");
    let country = services.countries.get("de").await.expect("get").expect("present");
    assert_eq!(country.name, "Deutschland");
}

/// Store that fails every operation.
struct BrokenStore;

#[async_trait]
impl KvStore for BrokenStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(KvError::unavailable("connection refused"))
    }

    async fn set(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<std::time::Duration>,
    ) -> Result<(), KvError> {
        Err(KvError::unavailable("connection refused"))
    }

    async fn set_if_absent(&self, _key: &str, _value: &str) -> Result<bool, KvError> {
        Err(KvError::unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<(), KvError> {
        Err(KvError::Timeout)
    }

    async fn increment(&self, _key: &str) -> Result<i64, KvError> {
        Err(KvError::Timeout)
    }

    async fn flush(&self) -> Result<(), KvError> {
        Err(KvError::Timeout)
    }

    async fn ping(&self) -> Result<(), KvError> {
        Err(KvError::Timeout)
    }
}

#[tokio::test]
async fn failing_store_degrades_to_the_repository() {
    let repos = memory_repositories();
    let cache = VersionedCache::new(
        CacheClient::new(Arc::new(BrokenStore)),
        CacheConfig::default(),
    );
    let services = AdminServices::new(&repos, cache.clone());

    let created = services.ads.create(banner("ca-app-5")).await.expect("create");
    let listed = services
        .ads
        .list(&AdListFilter::default(), PageRequest::default())
        .await
        .expect("list");
    assert_eq!(listed.pagination.total, 1);
    assert!(services.ads.get(&created.id).await.expect("get").is_some());
    assert!(services.ads.delete(&created.id).await.expect("delete"));
    assert!(services.ads.get(&created.id).await.expect("get").is_none());

    assert!(cache.client().ping().await.is_err());
}

/// Seed one country, one city and one server placed in them.
async fn seed_server(services: &AdminServices) {
    let country = services
        .countries
        .create(CreateCountryCommand {
            country_code: "DE".into(),
            name: "Germany".into(),
            slug: None,
            flag: None,
        })
        .await
        .expect("country");
    let city = services
        .cities
        .create(CreateCityCommand {
            name: "Berlin".into(),
            slug: None,
            state: "be".into(),
            country: country.id.clone(),
            latitude: 52.52,
            longitude: 13.40,
        })
        .await
        .expect("city");
    services
        .servers
        .create(CreateServerCommand {
            general: ServerGeneral {
                name: "de-ber-01".into(),
                categories: Vec::new(),
                country_id: country.id,
                city_id: city.id,
                is_pro: false,
                mode: ServerMode::Live,
                ip: "10.0.1.1".into(),
                latitude: 52.52,
                longitude: 13.40,
                os_type: OsType::Android,
            },
            openvpn_config: None,
            wireguard_config: Some(WireguardConfig {
                url: Some("https://wg.example.net".into()),
                api_token: None,
            }),
            xray_config: None,
        })
        .await
        .expect("server");
}

fn rename(name: &str) -> UpdateCountryCommand {
    UpdateCountryCommand {
        name: Some(name.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn grouped_servers_follow_a_country_rename() {
    let h = harness();
    seed_server(&h.services).await;
    let all = ServerListFilter::default();

    let before = h
        .services
        .servers
        .list_grouped(&all, PageRequest::default())
        .await
        .expect("grouped");
    assert_eq!(before.data[0].country, "Germany");

    h.services
        .countries
        .update("DE", rename("Deutschland"))
        .await
        .expect("rename")
        .expect("present");

    let after = h
        .services
        .servers
        .list_grouped(&all, PageRequest::default())
        .await
        .expect("grouped");
    assert_eq!(after.data[0].country, "Deutschland");

    assert!(h.services.countries.delete("DE").await.expect("delete"));
    let orphaned = h
        .services
        .servers
        .list_grouped(&all, PageRequest::default())
        .await
        .expect("grouped");
    assert_eq!(orphaned.pagination.total, 0);
}

#[tokio::test]
async fn server_search_follows_a_country_rename() {
    let h = harness();
    seed_server(&h.services).await;
    let by_country = ServerListFilter {
        search: Some("deutsch".into()),
        ..Default::default()
    };

    let before = h
        .services
        .servers
        .list(&by_country, PageRequest::default())
        .await
        .expect("list");
    assert_eq!(before.pagination.total, 0);

    h.services
        .countries
        .update("DE", rename("Deutschland"))
        .await
        .expect("rename")
        .expect("present");

    let after = h
        .services
        .servers
        .list(&by_country, PageRequest::default())
        .await
        .expect("list");
    assert_eq!(after.pagination.total, 1);
}

/// Memory store whose generation counter reads can be made to fail.
#[derive(Default)]
struct FlakyCounters {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl KvStore for FlakyCounters {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        if key.ends_with(":ver") && self.failing.load(Ordering::SeqCst) {
            return Err(KvError::Timeout);
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, KvError> {
        self.inner.set_if_absent(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.delete(key).await
    }

    async fn increment(&self, key: &str) -> Result<i64, KvError> {
        self.inner.increment(key).await
    }

    async fn flush(&self) -> Result<(), KvError> {
        self.inner.flush().await
    }

    async fn ping(&self) -> Result<(), KvError> {
        self.inner.ping().await
    }
}

#[tokio::test]
async fn unreadable_generation_bypasses_cached_lists() {
    let repos = memory_repositories();
    let store = Arc::new(FlakyCounters::default());
    let cache = VersionedCache::new(CacheClient::new(store.clone()), CacheConfig::default());
    let services = AdminServices::new(&repos, cache);
    let all = AdListFilter::default();

    let empty = services.ads.list(&all, PageRequest::default()).await.expect("list");
    assert_eq!(empty.pagination.total, 0);

    services.ads.create(banner("ca-app-flaky")).await.expect("create");
    store.failing.store(true, Ordering::SeqCst);

    let listed = services.ads.list(&all, PageRequest::default()).await.expect("list");
    assert_eq!(listed.pagination.total, 1);

    store.failing.store(false, Ordering::SeqCst);
    let recovered = services.ads.list(&all, PageRequest::default()).await.expect("list");
    assert_eq!(recovered.pagination.total, 1);
}
