//! libSQL storage layer for the Larder catalog (local file, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding categories,
//! catalog records, and the batch job history. It only offers
//! query/insert/update/delete; reconciliation policy lives in `larder-core`.
//!
//! Error mapping:
//! - failed reads → [`LarderError::Lookup`]
//! - UNIQUE violations on create/update → [`LarderError::Conflict`]
//! - other failed writes → [`LarderError::Storage`]

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use larder_shared::{
    CatalogRecord, Category, Ingredient, LarderError, RecordDraft, RecordSummary, Result, name_key,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

const RECORD_COLUMNS: &str = "id, name, description, media_url, category_id, \
     ingredients_json, tools_json, steps_json, serving_note, created_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One row of the batch job history.
#[derive(Debug, Clone)]
pub struct BatchJobRow {
    pub id: String,
    pub kind: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LarderError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LarderError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| LarderError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for read-only commands.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LarderError::Lookup(format!(
                "catalog database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LarderError::Lookup(e.to_string()))?;

        let conn = db.connect().map_err(|e| LarderError::Lookup(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LarderError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LarderError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Category operations
    // -----------------------------------------------------------------------

    /// List all categories ordered by name.
    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, created_at FROM categories ORDER BY name_key",
                params![],
            )
            .await
            .map_err(lookup_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(lookup_err)? {
            results.push(row_to_category(&row)?);
        }
        Ok(results)
    }

    /// Find a category by case-insensitive name.
    pub async fn find_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let key = name_key(name);
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, created_at FROM categories WHERE name_key = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(lookup_err)?;

        match rows.next().await.map_err(lookup_err)? {
            Some(row) => Ok(Some(row_to_category(&row)?)),
            None => Ok(None),
        }
    }

    /// Insert a new category. Fails with [`LarderError::Conflict`] when the
    /// name already exists under case-insensitive comparison.
    pub async fn insert_category(&self, name: &str) -> Result<Category> {
        self.check_writable()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LarderError::validation("category name must not be empty"));
        }

        let category = Category {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let key = name_key(name);
        self.conn
            .execute(
                "INSERT INTO categories (id, name, name_key, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    category.id.as_str(),
                    category.name.as_str(),
                    key.as_str(),
                    category.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| write_err(e, &format!("category '{name}'")))?;
        Ok(category)
    }

    /// Rename a category.
    pub async fn rename_category(&self, id: &str, new_name: &str) -> Result<()> {
        self.check_writable()?;
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(LarderError::validation("category name must not be empty"));
        }
        let key = name_key(new_name);
        let changed = self
            .conn
            .execute(
                "UPDATE categories SET name = ?1, name_key = ?2 WHERE id = ?3",
                params![new_name, key.as_str(), id],
            )
            .await
            .map_err(|e| write_err(e, &format!("category '{new_name}'")))?;
        if changed == 0 {
            return Err(LarderError::NotFound(format!("category {id}")));
        }
        Ok(())
    }

    /// Delete a category that no record references.
    pub async fn delete_category(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM records WHERE category_id = ?1",
                params![id],
            )
            .await
            .map_err(lookup_err)?;
        let in_use: i64 = match rows.next().await.map_err(lookup_err)? {
            Some(row) => row.get(0).map_err(lookup_err)?,
            None => 0,
        };
        if in_use > 0 {
            return Err(LarderError::validation(format!(
                "category {id} is still used by {in_use} record(s)"
            )));
        }

        let changed = self
            .conn
            .execute("DELETE FROM categories WHERE id = ?1", params![id])
            .await
            .map_err(|e| LarderError::Storage(e.to_string()))?;
        if changed == 0 {
            return Err(LarderError::NotFound(format!("category {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Id of the record whose name matches `name` case-insensitively.
    pub async fn find_record_id_by_name(&self, name: &str) -> Result<Option<String>> {
        let key = name_key(name);
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM records WHERE name_key = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(lookup_err)?;

        match rows.next().await.map_err(lookup_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(lookup_err)?)),
            None => Ok(None),
        }
    }

    /// Fetch a full record by id.
    pub async fn get_record(&self, id: &str) -> Result<Option<CatalogRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id])
            .await
            .map_err(lookup_err)?;

        match rows.next().await.map_err(lookup_err)? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// List all records, newest first.
    pub async fn list_records(&self) -> Result<Vec<CatalogRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY created_at DESC");
        let mut rows = self.conn.query(&sql, params![]).await.map_err(lookup_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(lookup_err)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// List records joined with their category name and enrichment status.
    pub async fn list_summaries(&self) -> Result<Vec<RecordSummary>> {
        let categories: HashMap<String, String> = self
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        Ok(self
            .list_records()
            .await?
            .into_iter()
            .map(|r| RecordSummary {
                needs_enrichment: r.needs_enrichment(),
                category: categories.get(&r.category_id).cloned(),
                id: r.id,
                name: r.name,
                created_at: r.created_at,
            })
            .collect())
    }

    /// Insert a new record.
    pub async fn insert_record(&self, draft: &RecordDraft) -> Result<CatalogRecord> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now();
        let encoded = EncodedLists::new(draft)?;
        let key = name_key(&draft.name);

        self.conn
            .execute(
                "INSERT INTO records (id, name, name_key, description, media_url, category_id,
                                      ingredients_json, tools_json, steps_json, serving_note, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id.as_str(),
                    draft.name.as_str(),
                    key.as_str(),
                    draft.description.as_deref(),
                    draft.media_url.as_str(),
                    draft.category_id.as_str(),
                    encoded.ingredients.as_str(),
                    encoded.tools.as_str(),
                    encoded.steps.as_str(),
                    draft.serving_note.as_deref(),
                    created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| write_err(e, &format!("record '{}'", draft.name)))?;

        Ok(CatalogRecord {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            media_url: draft.media_url.clone(),
            category_id: draft.category_id.clone(),
            ingredients: draft.ingredients.clone(),
            tools: draft.tools.clone(),
            steps: draft.steps.clone(),
            serving_note: draft.serving_note.clone(),
            created_at,
        })
    }

    /// Overwrite every writable field of record `id` with `draft`.
    pub async fn update_record(&self, id: &str, draft: &RecordDraft) -> Result<()> {
        self.check_writable()?;
        let encoded = EncodedLists::new(draft)?;
        let key = name_key(&draft.name);

        let changed = self
            .conn
            .execute(
                "UPDATE records SET
                   name = ?1, name_key = ?2, description = ?3, media_url = ?4,
                   category_id = ?5, ingredients_json = ?6, tools_json = ?7,
                   steps_json = ?8, serving_note = ?9
                 WHERE id = ?10",
                params![
                    draft.name.as_str(),
                    key.as_str(),
                    draft.description.as_deref(),
                    draft.media_url.as_str(),
                    draft.category_id.as_str(),
                    encoded.ingredients.as_str(),
                    encoded.tools.as_str(),
                    encoded.steps.as_str(),
                    draft.serving_note.as_deref(),
                    id,
                ],
            )
            .await
            .map_err(|e| write_err(e, &format!("record '{}'", draft.name)))?;

        if changed == 0 {
            return Err(LarderError::NotFound(format!("record {id}")));
        }
        Ok(())
    }

    /// Delete a record by id.
    pub async fn delete_record(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute("DELETE FROM records WHERE id = ?1", params![id])
            .await
            .map_err(|e| LarderError::Storage(e.to_string()))?;
        if changed == 0 {
            return Err(LarderError::NotFound(format!("record {id}")));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Batch job operations
    // -----------------------------------------------------------------------

    /// Insert a new batch job of the given kind. Returns the generated job ID.
    pub async fn insert_batch_job(&self, kind: &str) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO batch_jobs (id, kind, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), kind, now.as_str()],
            )
            .await
            .map_err(|e| LarderError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Mark a batch job finished and store its report.
    pub async fn finish_batch_job(&self, job_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE batch_jobs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, job_id],
            )
            .await
            .map_err(|e| LarderError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent batch jobs first.
    pub async fn list_batch_jobs(&self, limit: u32) -> Result<Vec<BatchJobRow>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, started_at, finished_at, stats_json
                 FROM batch_jobs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(lookup_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(lookup_err)? {
            results.push(BatchJobRow {
                id: row.get::<String>(0).map_err(lookup_err)?,
                kind: row.get::<String>(1).map_err(lookup_err)?,
                started_at: row.get::<String>(2).map_err(lookup_err)?,
                finished_at: row.get::<String>(3).ok(),
                stats_json: row.get::<String>(4).ok(),
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// JSON-encoded list columns of a draft.
struct EncodedLists {
    ingredients: String,
    tools: String,
    steps: String,
}

impl EncodedLists {
    fn new(draft: &RecordDraft) -> Result<Self> {
        let encode = |v: serde_json::Result<String>| {
            v.map_err(|e| LarderError::Storage(format!("encode list column: {e}")))
        };
        Ok(Self {
            ingredients: encode(serde_json::to_string(&draft.ingredients))?,
            tools: encode(serde_json::to_string(&draft.tools))?,
            steps: encode(serde_json::to_string(&draft.steps))?,
        })
    }
}

fn lookup_err(e: libsql::Error) -> LarderError {
    LarderError::Lookup(e.to_string())
}

/// Map a failed write, turning UNIQUE violations into conflicts.
fn write_err(e: libsql::Error, what: &str) -> LarderError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        LarderError::Conflict(format!("{what} already exists"))
    } else {
        LarderError::Storage(msg)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LarderError::Lookup(format!("invalid date: {e}")))
}

fn decode_list<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<Vec<T>> {
    serde_json::from_str(raw).map_err(|e| LarderError::Lookup(format!("invalid {column}: {e}")))
}

fn row_to_category(row: &libsql::Row) -> Result<Category> {
    Ok(Category {
        id: row.get::<String>(0).map_err(lookup_err)?,
        name: row.get::<String>(1).map_err(lookup_err)?,
        created_at: parse_timestamp(&row.get::<String>(2).map_err(lookup_err)?)?,
    })
}

/// Convert a database row (in `RECORD_COLUMNS` order) to a [`CatalogRecord`].
fn row_to_record(row: &libsql::Row) -> Result<CatalogRecord> {
    let ingredients: Vec<Ingredient> = decode_list(
        &row.get::<String>(5).map_err(lookup_err)?,
        "ingredients_json",
    )?;
    Ok(CatalogRecord {
        id: row.get::<String>(0).map_err(lookup_err)?,
        name: row.get::<String>(1).map_err(lookup_err)?,
        description: row.get::<String>(2).ok(),
        media_url: row.get::<String>(3).unwrap_or_default(),
        category_id: row.get::<String>(4).map_err(lookup_err)?,
        ingredients,
        tools: decode_list(&row.get::<String>(6).map_err(lookup_err)?, "tools_json")?,
        steps: decode_list(&row.get::<String>(7).map_err(lookup_err)?, "steps_json")?,
        serving_note: row.get::<String>(8).ok(),
        created_at: parse_timestamp(&row.get::<String>(9).map_err(lookup_err)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("larder_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn draft(name: &str, category_id: &str) -> RecordDraft {
        RecordDraft {
            name: name.into(),
            description: Some("Fried rice".into()),
            media_url: String::new(),
            category_id: category_id.into(),
            ingredients: vec![Ingredient {
                name: "Nasi".into(),
                quantity: 1.0,
                unit: "piring".into(),
            }],
            tools: vec!["Wajan".into()],
            steps: vec!["Panaskan wajan.".into(), "Goreng nasi.".into()],
            serving_note: None,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("larder_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn category_crud() {
        let storage = test_storage().await;
        let cat = storage.insert_category("  Minuman ").await.expect("insert");
        assert_eq!(cat.name, "Minuman");

        let found = storage
            .find_category_by_name("MINUMAN")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.id, cat.id);

        storage
            .rename_category(&cat.id, "Drinks")
            .await
            .expect("rename");
        assert!(storage.find_category_by_name("minuman").await.unwrap().is_none());
        assert_eq!(storage.list_categories().await.unwrap().len(), 1);

        storage.delete_category(&cat.id).await.expect("delete");
        assert!(storage.list_categories().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_category_is_conflict() {
        let storage = test_storage().await;
        storage.insert_category("Dessert").await.unwrap();
        let err = storage.insert_category("dessert").await.unwrap_err();
        assert!(err.is_conflict(), "got {err}");
    }

    #[tokio::test]
    async fn category_in_use_cannot_be_deleted() {
        let storage = test_storage().await;
        let cat = storage.insert_category("Rice").await.unwrap();
        storage
            .insert_record(&draft("Nasi Goreng", &cat.id))
            .await
            .unwrap();
        let err = storage.delete_category(&cat.id).await.unwrap_err();
        assert!(err.to_string().contains("still used"));
    }

    #[tokio::test]
    async fn record_insert_find_update() {
        let storage = test_storage().await;
        let cat = storage.insert_category("Rice").await.unwrap();

        let created = storage
            .insert_record(&draft("Nasi Goreng", &cat.id))
            .await
            .expect("insert record");

        let id = storage
            .find_record_id_by_name("nasi goreng")
            .await
            .unwrap()
            .expect("case-insensitive match");
        assert_eq!(id, created.id);

        let mut changed = draft("NASI GORENG", &cat.id);
        changed.steps = vec!["Masak.".into()];
        changed.description = None;
        storage.update_record(&id, &changed).await.expect("update");

        let stored = storage.get_record(&id).await.unwrap().unwrap();
        assert_eq!(stored.name, "NASI GORENG");
        assert_eq!(stored.steps, vec!["Masak.".to_string()]);
        assert!(stored.description.is_none());
        assert_eq!(stored.ingredients[0].unit, "piring");
        assert_eq!(stored.created_at.timestamp(), created.created_at.timestamp());
    }

    #[tokio::test]
    async fn duplicate_record_name_is_conflict() {
        let storage = test_storage().await;
        let cat = storage.insert_category("Rice").await.unwrap();
        storage.insert_record(&draft("Nasi Goreng", &cat.id)).await.unwrap();
        let err = storage
            .insert_record(&draft("nasi goreng", &cat.id))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_and_delete_missing_record() {
        let storage = test_storage().await;
        let err = storage
            .update_record("missing", &draft("X", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, LarderError::NotFound(_)));
        assert!(storage.delete_record("missing").await.is_err());
        assert!(storage.get_record("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summaries_join_category_and_status() {
        let storage = test_storage().await;
        let cat = storage.insert_category("Rice").await.unwrap();
        storage.insert_record(&draft("Nasi Goreng", &cat.id)).await.unwrap();
        let mut bare = draft("Nasi Uduk", &cat.id);
        bare.steps.clear();
        storage.insert_record(&bare).await.unwrap();

        let summaries = storage.list_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.category.as_deref() == Some("Rice")));
        let uduk = summaries.iter().find(|s| s.name == "Nasi Uduk").unwrap();
        assert!(uduk.needs_enrichment);
    }

    #[tokio::test]
    async fn batch_job_lifecycle() {
        let storage = test_storage().await;
        let job_id = storage.insert_batch_job("import").await.expect("insert job");
        assert!(!job_id.is_empty());

        storage
            .finish_batch_job(&job_id, r#"{"created": 2}"#)
            .await
            .expect("finish job");

        let jobs = storage.list_batch_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, "import");
        assert!(jobs[0].finished_at.is_some());
        assert!(jobs[0].stats_json.as_deref().unwrap().contains("created"));
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("larder_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_category("Rice").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_categories().await.unwrap().len(), 1);
        let result = ro.insert_category("Noodles").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_missing_db_is_lookup_error() {
        let tmp = std::env::temp_dir().join(format!("larder_missing_{}.db", Uuid::now_v7()));
        let err = Storage::open_readonly(&tmp).await.err().expect("error");
        assert!(matches!(err, LarderError::Lookup(_)));
    }
}
