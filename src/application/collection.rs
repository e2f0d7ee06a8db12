//! Generic cached collection: the read-through and invalidation rules every
//! admin service shares.
//!
//! Writes go to the repository first; cache invalidation only runs once the
//! repository reports success, and it completes before the write returns.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::application::pagination::{Listing, PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, RepoError, SortKey};
use crate::cache::{Namespace, PointKey, TtlPolicy, VersionedCache};

/// An entity stored in its own collection and cached under its own namespace.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const NAMESPACE: Namespace;

    fn id(&self) -> &str;

    /// Secondary point keys this entity may be cached under (`name:`, `type:`).
    fn lookup_keys(&self) -> Vec<PointKey> {
        Vec::new()
    }
}

/// Everything that shapes a list result; fingerprinted into the list key.
#[derive(Serialize)]
struct ListQuery<'a> {
    scope: &'a str,
    filter: &'a Filter,
    /// Sort order is significant, so it is keyed as text rather than as an array.
    sort: String,
    page: Option<u32>,
    limit: u32,
}

fn sort_signature(sort: &[SortKey]) -> String {
    sort.iter()
        .map(|key| format!("{}:{:?}", key.field, key.direction))
        .collect::<Vec<_>>()
        .join(",")
}

pub struct CachedCollection<T: Document> {
    repo: Arc<dyn DocumentRepo<T>>,
    cache: VersionedCache,
    ttl: TtlPolicy,
}

impl<T: Document> Clone for CachedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            cache: self.cache.clone(),
            ttl: self.ttl,
        }
    }
}

impl<T: Document> CachedCollection<T> {
    pub fn new(repo: Arc<dyn DocumentRepo<T>>, cache: VersionedCache) -> Self {
        let ttl = cache.ttl_policy(T::NAMESPACE);
        Self { repo, cache, ttl }
    }

    pub fn repo(&self) -> &Arc<dyn DocumentRepo<T>> {
        &self.repo
    }

    pub fn cache(&self) -> &VersionedCache {
        &self.cache
    }

    /// Paginated listing through the generation-stamped list cache.
    ///
    /// `scope` separates listings of the same collection that differ in more
    /// than their filter (search vs. list, differently shaped results).
    pub async fn list(
        &self,
        scope: &str,
        filter: &Filter,
        sort: &[SortKey],
        page: PageRequest,
    ) -> Result<Paginated<T>, RepoError> {
        self.list_spanning(scope, &[], filter, sort, page).await
    }

    /// Like [`Self::list`], for filters resolved from other collections
    /// (`upstream`); writes to those retire the entry too.
    pub async fn list_spanning(
        &self,
        scope: &str,
        upstream: &[Namespace],
        filter: &Filter,
        sort: &[SortKey],
        page: PageRequest,
    ) -> Result<Paginated<T>, RepoError> {
        let query = ListQuery {
            scope,
            filter,
            sort: sort_signature(sort),
            page: Some(page.page()),
            limit: page.limit(),
        };

        self.cache
            .read_through_list_spanning(T::NAMESPACE, upstream, &query, self.ttl.list, || async {
                let found = self
                    .repo
                    .find_page(filter, sort, page.skip(), u64::from(page.limit()))
                    .await?;
                Ok::<_, RepoError>(Paginated::new(page, found.total, found.items))
            })
            .await
    }

    /// First `limit` matches, unpaginated, through the list cache.
    pub async fn search(
        &self,
        scope: &str,
        filter: &Filter,
        sort: &[SortKey],
        limit: u32,
    ) -> Result<Listing<T>, RepoError> {
        let query = ListQuery {
            scope,
            filter,
            sort: sort_signature(sort),
            page: None,
            limit,
        };

        self.cache
            .read_through_list(T::NAMESPACE, &query, self.ttl.list, || async {
                let found = self
                    .repo
                    .find_page(filter, sort, 0, u64::from(limit))
                    .await?;
                Ok::<_, RepoError>(Listing::new(found.items))
            })
            .await
    }

    /// Cached listing with a caller-shaped result (joins, projections).
    ///
    /// `upstream` names every other collection `compute` reads.
    pub async fn list_with<P, R, F, Fut>(
        &self,
        scope: &str,
        upstream: &[Namespace],
        params: &P,
        compute: F,
    ) -> Result<R, RepoError>
    where
        P: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, RepoError>>,
    {
        #[derive(Serialize)]
        struct Shaped<'a, P: ?Sized> {
            scope: &'a str,
            params: &'a P,
        }

        self.cache
            .read_through_list_spanning(
                T::NAMESPACE,
                upstream,
                &Shaped { scope, params },
                self.ttl.list,
                compute,
            )
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>, RepoError> {
        self.cache
            .read_through_point(T::NAMESPACE, &PointKey::id(id), self.ttl.point, || {
                self.repo.find_by_id(id)
            })
            .await
    }

    /// Single entity by a secondary natural key. `filter` must select by that same key.
    pub async fn find_by(&self, point: PointKey, filter: &Filter) -> Result<Option<T>, RepoError> {
        self.cache
            .read_through_point(T::NAMESPACE, &point, self.ttl.point, || {
                self.repo.find_one(filter)
            })
            .await
    }

    /// Existence-style lookup that also caches "absent", bounded by the lookup lifetime.
    pub async fn lookup(&self, point: PointKey, filter: &Filter) -> Result<Option<T>, RepoError> {
        self.cache
            .read_through_lookup(T::NAMESPACE, &point, self.ttl.lookup, || {
                self.repo.find_one(filter)
            })
            .await
    }

    /// Uncached count, for aggregates that carry their own TTL cache.
    pub async fn count(&self, filter: &Filter) -> Result<u64, RepoError> {
        self.repo.count(filter).await
    }

    /// Insert and retire cached lists. No point key can hold the new entity yet.
    pub async fn create(&self, document: T) -> Result<T, RepoError> {
        self.create_with(document, &[]).await
    }

    /// Insert, then delete `points` and retire cached lists.
    pub async fn create_with(&self, document: T, points: &[PointKey]) -> Result<T, RepoError> {
        let created = self.repo.insert(document).await?;
        self.cache.invalidate_on_write(T::NAMESPACE, points).await;
        Ok(created)
    }

    /// Apply `patch` to `id`. Point keys of both the old and the new revision are dropped.
    pub async fn update(&self, id: &str, patch: &Patch) -> Result<Option<T>, RepoError> {
        let Some(revision) = self.repo.update(id, patch).await? else {
            return Ok(None);
        };

        let mut points = vec![PointKey::id(id)];
        points.extend(revision.before.lookup_keys());
        points.extend(revision.after.lookup_keys());
        self.cache.invalidate_on_write(T::NAMESPACE, &points).await;
        Ok(Some(revision.after))
    }

    /// Apply `patch` to the first entity matching `filter`.
    pub async fn update_where(&self, filter: &Filter, patch: &Patch) -> Result<Option<T>, RepoError> {
        let Some(revision) = self.repo.update_one(filter, patch).await? else {
            return Ok(None);
        };

        let mut points = vec![PointKey::id(revision.after.id())];
        points.extend(revision.before.lookup_keys());
        points.extend(revision.after.lookup_keys());
        self.cache.invalidate_on_write(T::NAMESPACE, &points).await;
        Ok(Some(revision.after))
    }

    /// Remove `id`. Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, RepoError> {
        let Some(removed) = self.repo.delete(id).await? else {
            return Ok(false);
        };

        let mut points = vec![PointKey::id(id)];
        points.extend(removed.lookup_keys());
        self.cache.invalidate_on_write(T::NAMESPACE, &points).await;
        Ok(true)
    }

    /// Remove every id in `ids` with a single generation bump. Returns the number removed.
    pub async fn delete_many(&self, ids: &[String]) -> Result<u64, RepoError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let removed = self
            .repo
            .delete_many(&Filter::new().is_in("id", ids))
            .await?;
        if removed.is_empty() {
            return Ok(0);
        }

        let points: Vec<PointKey> = removed
            .iter()
            .flat_map(|document| {
                std::iter::once(PointKey::id(document.id())).chain(document.lookup_keys())
            })
            .collect();
        self.cache.invalidate_on_write(T::NAMESPACE, &points).await;
        Ok(removed.len() as u64)
    }
}
