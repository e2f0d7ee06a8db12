use std::sync::Arc;

use serde::Serialize;

use crate::application::admin::{ADS, AdminError, new_id, normalize_optional, now};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, SortKey};
use crate::cache::{Namespace, VersionedCache};
use crate::domain::entities::AdRecord;
use crate::domain::types::{AdPosition, AdType, OsType};

const AD_ID_IN_USE: &str = "ad_id already in use";

impl Document for AdRecord {
    const NAMESPACE: Namespace = ADS;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdListFilter {
    pub os_type: Option<OsType>,
    pub ad_type: Option<AdType>,
    pub position: Option<AdPosition>,
    pub status: Option<bool>,
}

impl AdListFilter {
    fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(os_type) = self.os_type {
            filter = filter.eq("os_type", os_type);
        }
        if let Some(ad_type) = self.ad_type {
            filter = filter.eq("type", ad_type);
        }
        if let Some(position) = self.position {
            filter = filter.eq("position", position);
        }
        if let Some(status) = self.status {
            filter = filter.eq("status", status);
        }
        filter
    }
}

#[derive(Debug, Clone)]
pub struct CreateAdCommand {
    pub ad_type: AdType,
    pub position: AdPosition,
    pub status: bool,
    pub ad_id: Option<String>,
    pub os_type: OsType,
}

/// Partial update; unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateAdCommand {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ad_type: Option<AdType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<AdPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<OsType>,
}

#[derive(Clone)]
pub struct AdminAdService {
    ads: CachedCollection<AdRecord>,
}

impl AdminAdService {
    pub fn new(repo: Arc<dyn DocumentRepo<AdRecord>>, cache: VersionedCache) -> Self {
        Self {
            ads: CachedCollection::new(repo, cache),
        }
    }

    pub async fn list(
        &self,
        filter: &AdListFilter,
        page: PageRequest,
    ) -> Result<Paginated<AdRecord>, AdminError> {
        let sort = [SortKey::asc("position"), SortKey::desc("created_at")];
        Ok(self
            .ads
            .list("list", &filter.to_filter(), &sort, page)
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AdRecord>, AdminError> {
        Ok(self.ads.get(id).await?)
    }

    pub async fn create(&self, command: CreateAdCommand) -> Result<AdRecord, AdminError> {
        let ad_id = normalize_optional(command.ad_id);
        if let Some(ad_id) = ad_id.as_deref() {
            self.ensure_ad_id_free(ad_id, None).await?;
        }

        let timestamp = now();
        let record = AdRecord {
            id: new_id(),
            ad_type: command.ad_type,
            position: command.position,
            status: command.status,
            ad_id,
            os_type: command.os_type,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.ads
            .create(record)
            .await
            .map_err(super::conflict_on_duplicate(AD_ID_IN_USE))
    }

    pub async fn update(
        &self,
        id: &str,
        mut command: UpdateAdCommand,
    ) -> Result<Option<AdRecord>, AdminError> {
        command.ad_id = normalize_optional(command.ad_id);
        if let Some(ad_id) = command.ad_id.as_deref() {
            self.ensure_ad_id_free(ad_id, Some(id)).await?;
        }

        let patch = Patch::from_partial(&command)?;
        if patch.is_empty() {
            return self.get(id).await;
        }
        self.ads
            .update(id, &patch)
            .await
            .map_err(super::conflict_on_duplicate(AD_ID_IN_USE))
    }

    pub async fn set_status(&self, id: &str, status: bool) -> Result<Option<AdRecord>, AdminError> {
        Ok(self
            .ads
            .update(id, &Patch::new().set("status", status))
            .await?)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.ads.delete(id).await?)
    }

    async fn ensure_ad_id_free(&self, ad_id: &str, owner: Option<&str>) -> Result<(), AdminError> {
        let mut filter = Filter::new().eq("ad_id", ad_id);
        if let Some(owner) = owner {
            filter = filter.ne("id", owner);
        }
        if self.ads.repo().find_one(&filter).await?.is_some() {
            return Err(AdminError::conflict(AD_ID_IN_USE));
        }
        Ok(())
    }
}
