//! In-process document repository.
//!
//! Documents are held in insertion order as JSON so filters, sorts and
//! patches address the same dotted paths a document database would.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::RwLock;
use tracing::debug;

use crate::application::repos::{DocumentRepo, Filter, Page, Patch, RepoError, Revision, SortKey};

use super::query::{apply_patch, compare_documents, lookup, matches};

const ID_FIELD: &str = "id";
const UPDATED_AT_FIELD: &str = "updated_at";

/// Fields whose combined values must be unique across the collection.
///
/// Documents with a null or missing value in any indexed field are not indexed.
#[derive(Debug, Clone)]
struct UniqueIndex {
    name: &'static str,
    fields: Vec<&'static str>,
}

impl UniqueIndex {
    fn key<'a>(&self, document: &'a Value) -> Option<Vec<&'a Value>> {
        self.fields
            .iter()
            .map(|field| lookup(document, field).filter(|value| !value.is_null()))
            .collect()
    }
}

pub struct MemoryRepository<T> {
    collection: &'static str,
    documents: RwLock<Vec<Value>>,
    unique: Vec<UniqueIndex>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MemoryRepository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(collection: &'static str) -> Self {
        Self {
            collection,
            documents: RwLock::new(Vec::new()),
            unique: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declare a unique index; inserts and updates that collide fail with `Duplicate`.
    pub fn with_unique(mut self, name: &'static str, fields: &[&'static str]) -> Self {
        self.unique.push(UniqueIndex {
            name,
            fields: fields.to_vec(),
        });
        self
    }

    fn encode(&self, document: &T) -> Result<Value, RepoError> {
        let value = serde_json::to_value(document).map_err(RepoError::from_persistence)?;
        if !value.is_object() {
            return Err(RepoError::invalid_input(format!(
                "{} documents must serialize to objects",
                self.collection
            )));
        }
        Ok(value)
    }

    fn decode(&self, value: &Value) -> Result<T, RepoError> {
        serde_json::from_value(value.clone()).map_err(|err| {
            RepoError::invalid_input(format!("{} document does not decode: {err}", self.collection))
        })
    }

    fn check_unique(
        &self,
        documents: &[Value],
        candidate: &Value,
        skip: Option<usize>,
    ) -> Result<(), RepoError> {
        let id = candidate.get(ID_FIELD);
        for (index, existing) in documents.iter().enumerate() {
            if Some(index) == skip {
                continue;
            }
            if id.is_some() && existing.get(ID_FIELD) == id {
                return Err(RepoError::Duplicate {
                    constraint: format!("{}_pkey", self.collection),
                });
            }
            for unique in &self.unique {
                let Some(wanted) = unique.key(candidate) else {
                    continue;
                };
                if unique.key(existing).is_some_and(|found| found == wanted) {
                    return Err(RepoError::Duplicate {
                        constraint: unique.name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn position(documents: &[Value], filter: &Filter) -> Option<usize> {
        documents.iter().position(|document| matches(document, filter))
    }

    fn position_by_id(documents: &[Value], id: &str) -> Option<usize> {
        documents
            .iter()
            .position(|document| document.get(ID_FIELD).and_then(Value::as_str) == Some(id))
    }

    /// Patch the document at `index`, validating the result before it replaces the original.
    fn update_at(
        &self,
        documents: &mut [Value],
        index: usize,
        patch: &Patch,
    ) -> Result<Revision<T>, RepoError> {
        if patch.touches(ID_FIELD) {
            return Err(RepoError::invalid_input("document ids are immutable"));
        }

        let before = documents[index].clone();
        let mut after = before.clone();
        apply_patch(&mut after, patch);
        if after.get(UPDATED_AT_FIELD).is_some() && !patch.touches(UPDATED_AT_FIELD) {
            after[UPDATED_AT_FIELD] = Value::String(now_rfc3339()?);
        }

        let revision = Revision {
            before: self.decode(&before)?,
            after: self.decode(&after)?,
        };
        self.check_unique(documents, &after, Some(index))?;
        documents[index] = after;
        Ok(revision)
    }
}

fn now_rfc3339() -> Result<String, RepoError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(RepoError::from_persistence)
}

#[async_trait]
impl<T> DocumentRepo<T> for MemoryRepository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn find_page(
        &self,
        filter: &Filter,
        sort: &[SortKey],
        skip: u64,
        limit: u64,
    ) -> Result<Page<T>, RepoError> {
        let documents = self.documents.read().await;
        let mut found: Vec<&Value> = documents
            .iter()
            .filter(|document| matches(document, filter))
            .collect();
        found.sort_by(|a, b| compare_documents(a, b, sort));

        let total = found.len() as u64;
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let items = found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| self.decode(document))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            target = "vynox::infra::db",
            collection = self.collection,
            total,
            returned = items.len(),
            "Evaluated query"
        );
        Ok(Page { items, total })
    }

    async fn count(&self, filter: &Filter) -> Result<u64, RepoError> {
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .filter(|document| matches(document, filter))
            .count() as u64)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<T>, RepoError> {
        let documents = self.documents.read().await;
        Self::position_by_id(&documents, id)
            .map(|index| self.decode(&documents[index]))
            .transpose()
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>, RepoError> {
        let documents = self.documents.read().await;
        Self::position(&documents, filter)
            .map(|index| self.decode(&documents[index]))
            .transpose()
    }

    async fn insert(&self, document: T) -> Result<T, RepoError> {
        let value = self.encode(&document)?;
        let mut documents = self.documents.write().await;
        self.check_unique(&documents, &value, None)?;
        documents.push(value);
        Ok(document)
    }

    async fn update(&self, id: &str, patch: &Patch) -> Result<Option<Revision<T>>, RepoError> {
        let mut documents = self.documents.write().await;
        let Some(index) = Self::position_by_id(&documents, id) else {
            return Ok(None);
        };
        self.update_at(&mut documents, index, patch).map(Some)
    }

    async fn update_one(
        &self,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<Option<Revision<T>>, RepoError> {
        let mut documents = self.documents.write().await;
        let Some(index) = Self::position(&documents, filter) else {
            return Ok(None);
        };
        self.update_at(&mut documents, index, patch).map(Some)
    }

    async fn delete(&self, id: &str) -> Result<Option<T>, RepoError> {
        let mut documents = self.documents.write().await;
        let Some(index) = Self::position_by_id(&documents, id) else {
            return Ok(None);
        };
        let removed = documents.remove(index);
        self.decode(&removed).map(Some)
    }

    async fn delete_many(&self, filter: &Filter) -> Result<Vec<T>, RepoError> {
        let mut documents = self.documents.write().await;
        let (removed, kept): (Vec<Value>, Vec<Value>) = documents
            .drain(..)
            .partition(|document| matches(document, filter));
        *documents = kept;
        removed.iter().map(|document| self.decode(document)).collect()
    }
}
