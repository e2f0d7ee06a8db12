use std::sync::Arc;

use crate::application::admin::{AdminError, FAQS, new_id, now};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{DEFAULT_SEARCH_LIMIT, Listing, PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, RepoError, SortKey};
use crate::cache::{Namespace, VersionedCache};
use crate::domain::entities::FaqRecord;
use crate::domain::error::{DomainError, require_text};
use crate::domain::slug::{SlugAsyncError, derive_slug, generate_unique_slug_async};

const SLUG_TAKEN: &str = "FAQ slug already exists";

impl Document for FaqRecord {
    const NAMESPACE: Namespace = FAQS;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone)]
pub struct CreateFaqCommand {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateFaqCommand {
    pub question: Option<String>,
    pub answer: Option<String>,
}

fn newest_first() -> [SortKey; 1] {
    [SortKey::desc("created_at")]
}

#[derive(Clone)]
pub struct AdminFaqService {
    faqs: CachedCollection<FaqRecord>,
}

impl AdminFaqService {
    pub fn new(repo: Arc<dyn DocumentRepo<FaqRecord>>, cache: VersionedCache) -> Self {
        Self {
            faqs: CachedCollection::new(repo, cache),
        }
    }

    pub async fn list(&self, page: PageRequest) -> Result<Paginated<FaqRecord>, AdminError> {
        Ok(self
            .faqs
            .list("list", &Filter::new(), &newest_first(), page)
            .await?)
    }

    /// Slug prefix or question substring.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> Result<Listing<FaqRecord>, AdminError> {
        let query = query.trim();
        let mut alternatives = vec![Filter::new().contains("question", query)];
        if let Ok(normalized) = derive_slug(query) {
            alternatives.push(Filter::new().starts_with("slug", &normalized, false));
        }

        Ok(self
            .faqs
            .search(
                "search",
                &Filter::new().any(alternatives),
                &newest_first(),
                limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1),
            )
            .await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<FaqRecord>, AdminError> {
        Ok(self.faqs.get(id).await?)
    }

    pub async fn create(&self, command: CreateFaqCommand) -> Result<FaqRecord, AdminError> {
        let question = require_text("question", &command.question)?;
        let answer = require_text("answer", &command.answer)?;
        let slug = self.unique_slug(&question, None).await?;

        let timestamp = now();
        let record = FaqRecord {
            id: new_id(),
            question,
            slug,
            answer,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.faqs
            .create(record)
            .await
            .map_err(super::conflict_on_duplicate(SLUG_TAKEN))
    }

    /// Changing the question re-derives the slug.
    pub async fn update(
        &self,
        id: &str,
        command: UpdateFaqCommand,
    ) -> Result<Option<FaqRecord>, AdminError> {
        let mut patch = Patch::new();
        if let Some(question) = command.question.as_deref() {
            let question = require_text("question", question)?;
            let slug = self.unique_slug(&question, Some(id)).await?;
            patch = patch.set("question", question).set("slug", slug);
        }
        if let Some(answer) = command.answer.as_deref() {
            patch = patch.set("answer", require_text("answer", answer)?);
        }

        if patch.is_empty() {
            return self.get(id).await;
        }
        self.faqs
            .update(id, &patch)
            .await
            .map_err(super::conflict_on_duplicate(SLUG_TAKEN))
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.faqs.delete(id).await?)
    }

    async fn unique_slug(&self, question: &str, owner: Option<&str>) -> Result<String, AdminError> {
        let repo = self.faqs.repo();
        let slug = generate_unique_slug_async(question, |candidate| async move {
            let mut filter = Filter::new().eq("slug", candidate);
            if let Some(owner) = owner {
                filter = filter.ne("id", owner);
            }
            Ok::<_, RepoError>(repo.find_one(&filter).await?.is_none())
        })
        .await;

        slug.map_err(|err| match err {
            SlugAsyncError::Slug(err) => AdminError::Domain(DomainError::from(err)),
            SlugAsyncError::Predicate(err) => AdminError::from(err),
        })
    }
}
