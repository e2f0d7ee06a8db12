//! Repository traits describing persistence adapters.
//!
//! Collections are document-shaped: filters, sorts and patches address fields
//! by dotted path (`general.mode`) over the entity's JSON form.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::entities::{
    AdRecord, CityRecord, ConnectivityRecord, CountryRecord, DropdownRecord, FaqRecord,
    FeedbackRecord, PageRecord, ServerRecord,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// One predicate over a dotted field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Gte { field: String, value: Value },
    Lte { field: String, value: Value },
    /// Case-insensitive substring match on a string field.
    Contains { field: String, needle: String },
    /// Prefix match on a string field.
    StartsWith {
        field: String,
        prefix: String,
        case_insensitive: bool,
    },
    /// Field is set to something other than null, `""`, or an empty/blank container.
    Present { field: String },
    /// Negation of [`Condition::Present`].
    Absent { field: String },
    /// At least one nested filter matches.
    Any { filters: Vec<Filter> },
}

/// Conjunction of conditions. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.to_string(),
            value: to_value(value),
        });
        self
    }

    pub fn ne(mut self, field: &str, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Ne {
            field: field.to_string(),
            value: to_value(value),
        });
        self
    }

    pub fn is_in<V: Serialize>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.conditions.push(Condition::In {
            field: field.to_string(),
            values: values.into_iter().map(to_value).collect(),
        });
        self
    }

    pub fn gte(mut self, field: &str, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Gte {
            field: field.to_string(),
            value: to_value(value),
        });
        self
    }

    pub fn lte(mut self, field: &str, value: impl Serialize) -> Self {
        self.conditions.push(Condition::Lte {
            field: field.to_string(),
            value: to_value(value),
        });
        self
    }

    pub fn contains(mut self, field: &str, needle: &str) -> Self {
        self.conditions.push(Condition::Contains {
            field: field.to_string(),
            needle: needle.to_string(),
        });
        self
    }

    pub fn starts_with(mut self, field: &str, prefix: &str, case_insensitive: bool) -> Self {
        self.conditions.push(Condition::StartsWith {
            field: field.to_string(),
            prefix: prefix.to_string(),
            case_insensitive,
        });
        self
    }

    pub fn present(mut self, field: &str) -> Self {
        self.conditions.push(Condition::Present {
            field: field.to_string(),
        });
        self
    }

    pub fn absent(mut self, field: &str) -> Self {
        self.conditions.push(Condition::Absent {
            field: field.to_string(),
        });
        self
    }

    pub fn any(mut self, filters: Vec<Filter>) -> Self {
        self.conditions.push(Condition::Any { filters });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

/// Field assignments applied by an update, keyed by dotted path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub sets: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: &str, value: impl Serialize) -> Self {
        self.sets.insert(path.to_string(), to_value(value));
        self
    }

    /// Build a patch from a partial update struct.
    ///
    /// Nested objects are flattened into dotted paths so that updating
    /// `general.mode` leaves the rest of `general` untouched. Unset optional
    /// fields must be skipped during serialization to leave values unchanged.
    pub fn from_partial(partial: &impl Serialize) -> Result<Self, RepoError> {
        match serde_json::to_value(partial) {
            Ok(Value::Object(map)) => {
                let mut patch = Patch::new();
                flatten_into(&mut patch.sets, "", map);
                Ok(patch)
            }
            Ok(other) => Err(RepoError::invalid_input(format!(
                "partial update must be an object, got {other}"
            ))),
            Err(err) => Err(RepoError::invalid_input(err.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn touches(&self, path: &str) -> bool {
        self.sets.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.sets.get(path)
    }
}

fn flatten_into(target: &mut Map<String, Value>, prefix: &str, map: Map<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            // An empty nested partial changes nothing.
            Value::Object(nested) => flatten_into(target, &path, nested),
            other => {
                target.insert(path, other);
            }
        }
    }
}

/// One page of results plus the total matching count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Entity state on both sides of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision<T> {
    pub before: T,
    pub after: T,
}

#[async_trait]
pub trait DocumentRepo<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn find_page(
        &self,
        filter: &Filter,
        sort: &[SortKey],
        skip: u64,
        limit: u64,
    ) -> Result<Page<T>, RepoError>;

    async fn count(&self, filter: &Filter) -> Result<u64, RepoError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<T>, RepoError>;

    async fn find_one(&self, filter: &Filter) -> Result<Option<T>, RepoError>;

    async fn insert(&self, document: T) -> Result<T, RepoError>;

    /// Apply `patch` to the document with `id`. `None` when no such document exists.
    async fn update(&self, id: &str, patch: &Patch) -> Result<Option<Revision<T>>, RepoError>;

    /// Apply `patch` to the first document matching `filter`.
    async fn update_one(
        &self,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<Option<Revision<T>>, RepoError>;

    /// Remove the document with `id`, returning it when it existed.
    async fn delete(&self, id: &str) -> Result<Option<T>, RepoError>;

    /// Remove every document matching `filter`, returning the removed documents.
    async fn delete_many(&self, filter: &Filter) -> Result<Vec<T>, RepoError>;
}

/// One repository per collection.
#[derive(Clone)]
pub struct Repositories {
    pub ads: Arc<dyn DocumentRepo<AdRecord>>,
    pub countries: Arc<dyn DocumentRepo<CountryRecord>>,
    pub cities: Arc<dyn DocumentRepo<CityRecord>>,
    pub faqs: Arc<dyn DocumentRepo<FaqRecord>>,
    pub feedback: Arc<dyn DocumentRepo<FeedbackRecord>>,
    pub dropdowns: Arc<dyn DocumentRepo<DropdownRecord>>,
    pub pages: Arc<dyn DocumentRepo<PageRecord>>,
    pub servers: Arc<dyn DocumentRepo<ServerRecord>>,
    pub connectivity: Arc<dyn DocumentRepo<ConnectivityRecord>>,
}
