use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use crate::application::admin::{AdminError, FEEDBACK, Rfc3339Time, new_id, normalize_optional, now};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, SortKey};
use crate::cache::{Namespace, VersionedCache};
use crate::domain::entities::FeedbackRecord;
use crate::domain::error::{require_text, validate_rating};
use crate::domain::types::{NetworkType, OsType};

impl Document for FeedbackRecord {
    const NAMESPACE: Namespace = FEEDBACK;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Listing filter. `from`/`to` bound `datetime` inclusively.
#[derive(Debug, Clone, Default)]
pub struct FeedbackListFilter {
    pub server_id: Option<String>,
    pub reason: Option<String>,
    pub os_type: Option<OsType>,
    pub rating: Option<u8>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl FeedbackListFilter {
    fn to_filter(&self) -> Filter {
        let mut filter = Filter::new();
        if let Some(server_id) = normalize_optional(self.server_id.clone()) {
            filter = filter.eq("server_id", server_id);
        }
        if let Some(reason) = normalize_optional(self.reason.clone()) {
            filter = filter.eq("reason", reason);
        }
        if let Some(os_type) = self.os_type {
            filter = filter.eq("os_type", os_type);
        }
        if let Some(rating) = self.rating {
            filter = filter.eq("rating", rating);
        }
        if let Some(from) = self.from {
            filter = filter.gte("datetime", Rfc3339Time(from));
        }
        if let Some(to) = self.to {
            filter = filter.lte("datetime", Rfc3339Time(to));
        }
        filter
    }
}

#[derive(Debug, Clone)]
pub struct CreateFeedbackCommand {
    pub reason: String,
    pub network_type: Option<NetworkType>,
    pub requested_server: Option<String>,
    pub server_id: Option<String>,
    pub rating: Option<u8>,
    pub review: Option<String>,
    pub additional_data: Option<Value>,
    pub os_type: OsType,
    /// Submission time reported by the client; defaults to now.
    pub datetime: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct AdminFeedbackService {
    feedback: CachedCollection<FeedbackRecord>,
}

impl AdminFeedbackService {
    pub fn new(repo: Arc<dyn DocumentRepo<FeedbackRecord>>, cache: VersionedCache) -> Self {
        Self {
            feedback: CachedCollection::new(repo, cache),
        }
    }

    pub async fn list(
        &self,
        filter: &FeedbackListFilter,
        page: PageRequest,
    ) -> Result<Paginated<FeedbackRecord>, AdminError> {
        Ok(self
            .feedback
            .list("list", &filter.to_filter(), &[SortKey::desc("datetime")], page)
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<FeedbackRecord>, AdminError> {
        Ok(self.feedback.get(id).await?)
    }

    pub async fn create(&self, command: CreateFeedbackCommand) -> Result<FeedbackRecord, AdminError> {
        validate_rating(command.rating)?;
        let timestamp = now();
        let record = FeedbackRecord {
            id: new_id(),
            reason: require_text("reason", &command.reason)?,
            network_type: command.network_type,
            requested_server: normalize_optional(command.requested_server),
            server_id: normalize_optional(command.server_id),
            rating: command.rating,
            review: normalize_optional(command.review),
            additional_data: command.additional_data,
            os_type: command.os_type,
            datetime: command.datetime.unwrap_or(timestamp),
            created_at: timestamp,
            updated_at: timestamp,
        };

        Ok(self.feedback.create(record).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.feedback.delete(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cache::{CacheClient, CacheConfig, MemoryStore};
    use crate::infra::db::MemoryRepository;

    fn service() -> AdminFeedbackService {
        let cache = VersionedCache::new(
            CacheClient::new(Arc::new(MemoryStore::default())),
            CacheConfig::default(),
        );
        AdminFeedbackService::new(Arc::new(MemoryRepository::new("feedback")), cache)
    }

    fn entry(reason: &str, rating: Option<u8>, at: OffsetDateTime) -> CreateFeedbackCommand {
        CreateFeedbackCommand {
            reason: reason.into(),
            network_type: Some(NetworkType::Wifi),
            requested_server: None,
            server_id: Some("s1".into()),
            rating,
            review: None,
            additional_data: None,
            os_type: OsType::Android,
            datetime: Some(at),
        }
    }

    #[tokio::test]
    async fn rejects_out_of_range_rating() {
        let feedback = service();
        let err = feedback
            .create(entry("slow", Some(9), datetime!(2025-03-01 10:00 UTC)))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Domain(_)));
        assert_eq!(
            feedback
                .list(&FeedbackListFilter::default(), PageRequest::default())
                .await
                .unwrap()
                .pagination
                .total,
            0
        );
    }

    #[tokio::test]
    async fn filters_by_window_and_sorts_newest_first() {
        let feedback = service();
        feedback
            .create(entry("slow", Some(2), datetime!(2025-03-01 10:00 UTC)))
            .await
            .unwrap();
        feedback
            .create(entry("drops", Some(1), datetime!(2025-03-05 10:00 UTC)))
            .await
            .unwrap();
        feedback
            .create(entry("slow", None, datetime!(2025-03-09 10:00 UTC)))
            .await
            .unwrap();

        let window = FeedbackListFilter {
            from: Some(datetime!(2025-03-02 0:00 UTC)),
            to: Some(datetime!(2025-03-10 0:00 UTC)),
            ..Default::default()
        };
        let page = feedback.list(&window, PageRequest::default()).await.unwrap();
        let reasons: Vec<_> = page.data.iter().map(|f| f.reason.as_str()).collect();
        assert_eq!(reasons, ["slow", "drops"]);

        let slow = FeedbackListFilter {
            reason: Some("slow".into()),
            rating: Some(2),
            ..Default::default()
        };
        assert_eq!(
            feedback.list(&slow, PageRequest::default()).await.unwrap().pagination.total,
            1
        );
    }

    #[tokio::test]
    async fn delete_drops_point_entry() {
        let feedback = service();
        let created = feedback
            .create(entry("slow", Some(3), datetime!(2025-03-01 10:00 UTC)))
            .await
            .unwrap();
        assert!(feedback.get(&created.id).await.unwrap().is_some());
        assert!(feedback.delete(&created.id).await.unwrap());
        assert!(feedback.get(&created.id).await.unwrap().is_none());
        assert!(!feedback.delete(&created.id).await.unwrap());
    }
}
