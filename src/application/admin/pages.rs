use std::sync::Arc;

use serde::Serialize;

use crate::application::admin::{AdminError, PAGES, new_id, normalize_optional, now};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, SortKey};
use crate::cache::{Namespace, PointKey, VersionedCache};
use crate::domain::entities::PageRecord;
use crate::domain::error::require_text;

const TYPE_TAKEN: &str = "A page with this type already exists.";

impl Document for PageRecord {
    const NAMESPACE: Namespace = PAGES;

    fn id(&self) -> &str {
        &self.id
    }

    fn lookup_keys(&self) -> Vec<PointKey> {
        vec![PointKey::Type(self.page_type.clone())]
    }
}

fn normalize_type(value: &str) -> Result<String, AdminError> {
    Ok(require_text("type", value)?.to_lowercase())
}

#[derive(Debug, Clone, Default)]
pub struct PageListFilter {
    pub page_type: Option<String>,
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    /// Case-insensitive substring of type, title or description.
    pub q: Option<String>,
}

impl PageListFilter {
    fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(page_type) = normalize_optional(self.page_type.clone()) {
            filter = filter.eq("type", page_type.to_lowercase());
        }
        if let Some(title) = normalize_optional(self.title.clone()) {
            filter = filter.contains("title", &title);
        }
        if let Some(q) = normalize_optional(self.q.clone()) {
            filter = filter.any(vec![
                Filter::new().contains("type", &q),
                Filter::new().contains("title", &q),
                Filter::new().contains("description", &q),
            ]);
        }
        filter
    }
}

#[derive(Debug, Clone)]
pub struct CreatePageCommand {
    pub page_type: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdatePageCommand {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct AdminPageService {
    pages: CachedCollection<PageRecord>,
}

impl AdminPageService {
    pub fn new(repo: Arc<dyn DocumentRepo<PageRecord>>, cache: VersionedCache) -> Self {
        Self {
            pages: CachedCollection::new(repo, cache),
        }
    }

    pub async fn list(
        &self,
        filter: &PageListFilter,
        page: PageRequest,
    ) -> Result<Paginated<PageRecord>, AdminError> {
        let sort = [SortKey::desc("created_at"), SortKey::asc("type")];
        Ok(self
            .pages
            .list("list", &filter.to_filter(), &sort, page)
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<PageRecord>, AdminError> {
        Ok(self.pages.get(id).await?)
    }

    pub async fn get_by_type(&self, page_type: &str) -> Result<Option<PageRecord>, AdminError> {
        let page_type = normalize_type(page_type)?;
        let filter = Filter::new().eq("type", &page_type);
        Ok(self.pages.find_by(PointKey::Type(page_type), &filter).await?)
    }

    pub async fn create(&self, command: CreatePageCommand) -> Result<PageRecord, AdminError> {
        let page_type = normalize_type(&command.page_type)?;
        self.ensure_type_free(&page_type, None).await?;

        let timestamp = now();
        let record = PageRecord {
            id: new_id(),
            page_type,
            title: require_text("title", &command.title)?,
            description: command.description,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.pages
            .create(record)
            .await
            .map_err(super::conflict_on_duplicate(TYPE_TAKEN))
    }

    pub async fn update(
        &self,
        id: &str,
        mut command: UpdatePageCommand,
    ) -> Result<Option<PageRecord>, AdminError> {
        if let Some(page_type) = command.page_type.as_deref() {
            let page_type = normalize_type(page_type)?;
            self.ensure_type_free(&page_type, Some(id)).await?;
            command.page_type = Some(page_type);
        }
        if let Some(title) = command.title.as_deref() {
            command.title = Some(require_text("title", title)?);
        }

        let patch = Patch::from_partial(&command)?;
        if patch.is_empty() {
            return self.get(id).await;
        }
        self.pages
            .update(id, &patch)
            .await
            .map_err(super::conflict_on_duplicate(TYPE_TAKEN))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.pages.delete(id).await?)
    }

    async fn ensure_type_free(&self, page_type: &str, owner: Option<&str>) -> Result<(), AdminError> {
        let mut filter = Filter::new().eq("type", page_type);
        if let Some(owner) = owner {
            filter = filter.ne("id", owner);
        }
        if self.pages.repo().find_one(&filter).await?.is_some() {
            return Err(AdminError::conflict(TYPE_TAKEN));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheClient, CacheConfig, MemoryStore};
    use crate::infra::db::MemoryRepository;

    fn service() -> AdminPageService {
        let cache = VersionedCache::new(
            CacheClient::new(Arc::new(MemoryStore::default())),
            CacheConfig::default(),
        );
        AdminPageService::new(
            Arc::new(MemoryRepository::new("pages").with_unique("pages_type_key", &["type"])),
            cache,
        )
    }

    fn page(page_type: &str, title: &str) -> CreatePageCommand {
        CreatePageCommand {
            page_type: page_type.into(),
            title: title.into(),
            description: format!("{title} body"),
        }
    }

    #[tokio::test]
    async fn type_is_lower_cased_and_unique() {
        let pages = service();
        let created = pages.create(page(" Privacy ", "Privacy Policy")).await.unwrap();
        assert_eq!(created.page_type, "privacy");

        let err = pages.create(page("PRIVACY", "Again")).await.unwrap_err();
        assert!(matches!(err, AdminError::Conflict(ref message) if message == TYPE_TAKEN));
        assert_eq!(pages.get_by_type("Privacy").await.unwrap().unwrap().id, created.id);
    }

    #[tokio::test]
    async fn retyping_moves_the_type_entry() {
        let pages = service();
        let created = pages.create(page("terms", "Terms")).await.unwrap();
        assert!(pages.get_by_type("terms").await.unwrap().is_some());

        pages
            .update(
                &created.id,
                UpdatePageCommand {
                    page_type: Some("Terms-Of-Service".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert!(pages.get_by_type("terms").await.unwrap().is_none());
        assert!(pages.get_by_type("terms-of-service").await.unwrap().is_some());

        let other = pages.create(page("about", "About")).await.unwrap();
        let err = pages
            .update(
                &other.id,
                UpdatePageCommand {
                    page_type: Some("terms-of-service".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_searches_type_title_and_description() {
        let pages = service();
        pages.create(page("privacy", "Privacy Policy")).await.unwrap();
        pages.create(page("terms", "Terms of Use")).await.unwrap();

        let policy = PageListFilter {
            q: Some("policy".into()),
            ..Default::default()
        };
        assert_eq!(pages.list(&policy, PageRequest::default()).await.unwrap().pagination.total, 1);

        let by_title = PageListFilter {
            title: Some("of use".into()),
            ..Default::default()
        };
        let found = pages.list(&by_title, PageRequest::default()).await.unwrap();
        assert_eq!(found.data[0].page_type, "terms");

        assert!(pages.delete(&found.data[0].id).await.unwrap());
        assert!(pages.get_by_type("terms").await.unwrap().is_none());
    }
}
