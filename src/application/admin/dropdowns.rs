use std::sync::Arc;

use crate::application::admin::{AdminError, DROPDOWNS, new_id, normalize_optional, now};
use crate::application::collection::{CachedCollection, Document};
use crate::application::pagination::{PageRequest, Paginated};
use crate::application::repos::{DocumentRepo, Filter, Patch, SortKey};
use crate::cache::{Namespace, PointKey, VersionedCache};
use crate::domain::entities::{DropdownRecord, DropdownValue};
use crate::domain::error::require_text;

const NAME_TAKEN: &str = "Dropdown name already exists.";
const DUPLICATE_VALUE: &str = "Duplicate value inside dropdown values.";

impl Document for DropdownRecord {
    const NAMESPACE: Namespace = DROPDOWNS;

    fn id(&self) -> &str {
        &self.id
    }

    fn lookup_keys(&self) -> Vec<PointKey> {
        vec![PointKey::Name(self.name.clone())]
    }
}

#[derive(Debug, Clone)]
pub struct CreateDropdownCommand {
    pub name: String,
    pub values: Vec<DropdownValue>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateDropdownCommand {
    pub name: Option<String>,
    /// Replaces the whole value list.
    pub values: Option<Vec<DropdownValue>>,
}

/// Replacement for one entry of a dropdown's value list.
#[derive(Debug, Clone, Default)]
pub struct UpdateDropdownValueCommand {
    pub name: Option<String>,
    pub value: Option<String>,
}

fn normalize_value(entry: DropdownValue) -> Result<DropdownValue, AdminError> {
    Ok(DropdownValue {
        name: require_text("values.name", &entry.name)?,
        value: require_text("values.value", &entry.value)?,
    })
}

fn normalize_values(values: Vec<DropdownValue>) -> Result<Vec<DropdownValue>, AdminError> {
    let values = values
        .into_iter()
        .map(normalize_value)
        .collect::<Result<Vec<_>, _>>()?;
    for (index, entry) in values.iter().enumerate() {
        if values[..index].iter().any(|other| other.value == entry.value) {
            return Err(AdminError::conflict(DUPLICATE_VALUE));
        }
    }
    Ok(values)
}

#[derive(Clone)]
pub struct AdminDropdownService {
    dropdowns: CachedCollection<DropdownRecord>,
}

impl AdminDropdownService {
    pub fn new(repo: Arc<dyn DocumentRepo<DropdownRecord>>, cache: VersionedCache) -> Self {
        Self {
            dropdowns: CachedCollection::new(repo, cache),
        }
    }

    pub async fn list(
        &self,
        name: Option<&str>,
        page: PageRequest,
    ) -> Result<Paginated<DropdownRecord>, AdminError> {
        let mut filter = Filter::new();
        if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
            filter = filter.eq("name", name);
        }
        let sort = [SortKey::asc("name"), SortKey::desc("created_at")];
        Ok(self.dropdowns.list("list", &filter, &sort, page).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<DropdownRecord>, AdminError> {
        Ok(self.dropdowns.get(id).await?)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<DropdownRecord>, AdminError> {
        let name = name.trim();
        Ok(self
            .dropdowns
            .find_by(PointKey::Name(name.to_string()), &Filter::new().eq("name", name))
            .await?)
    }

    pub async fn create(&self, command: CreateDropdownCommand) -> Result<DropdownRecord, AdminError> {
        let timestamp = now();
        let record = DropdownRecord {
            id: new_id(),
            name: require_text("name", &command.name)?,
            values: normalize_values(command.values)?,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.dropdowns
            .create(record)
            .await
            .map_err(super::conflict_on_duplicate(NAME_TAKEN))
    }

    /// Renames drop both the old and the new `name:` entries.
    pub async fn update(
        &self,
        id: &str,
        command: UpdateDropdownCommand,
    ) -> Result<Option<DropdownRecord>, AdminError> {
        let mut patch = Patch::new();
        if let Some(name) = command.name.as_deref() {
            patch = patch.set("name", require_text("name", name)?);
        }
        if let Some(values) = command.values {
            patch = patch.set("values", normalize_values(values)?);
        }

        if patch.is_empty() {
            return self.get(id).await;
        }
        self.dropdowns
            .update(id, &patch)
            .await
            .map_err(super::conflict_on_duplicate(NAME_TAKEN))
    }

    pub async fn add_value(
        &self,
        id: &str,
        entry: DropdownValue,
    ) -> Result<Option<DropdownRecord>, AdminError> {
        let entry = normalize_value(entry)?;
        let Some(mut values) = self.current_values(id).await? else {
            return Ok(None);
        };
        if values.iter().any(|existing| existing.value == entry.value) {
            return Err(AdminError::conflict(DUPLICATE_VALUE));
        }
        values.push(entry);
        self.store_values(id, values).await
    }

    /// Replace the entry currently holding `value`. `None` when the dropdown or the value is missing.
    pub async fn update_value(
        &self,
        id: &str,
        value: &str,
        command: UpdateDropdownValueCommand,
    ) -> Result<Option<DropdownRecord>, AdminError> {
        let Some(mut values) = self.current_values(id).await? else {
            return Ok(None);
        };
        let Some(index) = values.iter().position(|entry| entry.value == value) else {
            return Ok(None);
        };

        if let Some(new_value) = normalize_optional(command.value) {
            let clashes = values
                .iter()
                .enumerate()
                .any(|(other, entry)| other != index && entry.value == new_value);
            if clashes {
                return Err(AdminError::conflict(DUPLICATE_VALUE));
            }
            values[index].value = new_value;
        }
        if let Some(new_name) = normalize_optional(command.name) {
            values[index].name = new_name;
        }
        self.store_values(id, values).await
    }

    pub async fn remove_value(
        &self,
        id: &str,
        value: &str,
    ) -> Result<Option<DropdownRecord>, AdminError> {
        let Some(mut values) = self.current_values(id).await? else {
            return Ok(None);
        };
        let before = values.len();
        values.retain(|entry| entry.value != value);
        if values.len() == before {
            return self.get(id).await;
        }
        self.store_values(id, values).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AdminError> {
        Ok(self.dropdowns.delete(id).await?)
    }

    /// Value edits read the authoritative document, never a cached copy.
    async fn current_values(&self, id: &str) -> Result<Option<Vec<DropdownValue>>, AdminError> {
        Ok(self
            .dropdowns
            .repo()
            .find_by_id(id)
            .await?
            .map(|dropdown| dropdown.values))
    }

    async fn store_values(
        &self,
        id: &str,
        values: Vec<DropdownValue>,
    ) -> Result<Option<DropdownRecord>, AdminError> {
        Ok(self
            .dropdowns
            .update(id, &Patch::new().set("values", values))
            .await?)
    }
}
