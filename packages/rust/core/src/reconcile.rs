//! Category and record reconciliation against the store.
//!
//! Identity is the case-insensitive name only. A category is created on
//! first use; a record is replaced wholesale when its name already exists.

use std::collections::HashMap;

use larder_shared::{Category, LarderError, RecordDraft, Result, name_key};
use larder_storage::Storage;
use tracing::{debug, info};

/// Per-run cache of categories keyed by case-insensitive name.
///
/// Seeded once from the store at the start of a batch and extended with
/// every category the batch creates (read-your-writes within the run).
pub struct CategoryCache {
    by_key: HashMap<String, Category>,
    default_name: String,
}

impl CategoryCache {
    /// Load every existing category. Blank names resolve to `default_name`.
    pub async fn load(storage: &Storage, default_name: &str) -> Result<Self> {
        let by_key = storage
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (name_key(&c.name), c))
            .collect::<HashMap<_, _>>();
        debug!(count = by_key.len(), "category cache seeded");
        Ok(Self {
            by_key,
            default_name: default_name.to_string(),
        })
    }

    /// Return the category named `name`, creating it on a miss.
    pub async fn resolve(&mut self, storage: &Storage, name: Option<&str>) -> Result<Category> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.default_name.as_str())
            .to_string();
        let key = name_key(&name);

        if let Some(existing) = self.by_key.get(&key) {
            return Ok(existing.clone());
        }

        let category = storage.insert_category(&name).await?;
        info!(category = %category.name, "created category");
        self.by_key.insert(key, category.clone());
        Ok(category)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Whether an upsert created or replaced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Id of the record whose name matches `name` case-insensitively.
pub async fn find_target(storage: &Storage, name: &str) -> Result<Option<String>> {
    storage.find_record_id_by_name(name).await
}

/// Insert `draft`, or fully replace the record with the same name.
pub async fn apply(storage: &Storage, draft: &RecordDraft) -> Result<(UpsertOutcome, String)> {
    if draft.name.trim().is_empty() {
        return Err(LarderError::validation("record name must not be empty"));
    }

    match find_target(storage, &draft.name).await? {
        Some(id) => {
            storage.update_record(&id, draft).await?;
            debug!(%id, name = %draft.name, "record updated");
            Ok((UpsertOutcome::Updated, id))
        }
        None => {
            let record = storage.insert_record(draft).await?;
            debug!(id = %record.id, name = %draft.name, "record created");
            Ok((UpsertOutcome::Created, record.id))
        }
    }
}
