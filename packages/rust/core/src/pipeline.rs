//! Import pipeline: delimited file → parsed rows → categories → upserted records.

use std::io::Read;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use larder_ingest::{ImportRow, read_rows};
use larder_shared::{ImportConfig, Result};
use larder_storage::Storage;

use crate::reconcile::{self, CategoryCache, UpsertOutcome};

/// Batch job kind recorded for import runs.
pub const IMPORT_JOB_KIND: &str = "import";

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for batch runs.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each item is processed.
    fn item(&self, current: usize, total: usize, name: &str);
    /// Called when the run completes.
    fn done(&self, report: &BatchReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _current: usize, _total: usize, _name: &str) {}
    fn done(&self, _report: &BatchReport) {}
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome tag of one batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Created,
    Updated,
    Failed,
    Skipped,
}

impl From<UpsertOutcome> for ItemOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Created => Self::Created,
            UpsertOutcome::Updated => Self::Updated,
        }
    }
}

/// One failed item and why.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub reason: String,
}

/// Final tally of a batch run; persisted as the job's `stats_json`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Items whose enrichment came from offline synthesis.
    pub fallbacks: usize,
    pub cancelled: bool,
    pub failures: Vec<ItemFailure>,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Ids of created or updated records, in processing order.
    #[serde(skip)]
    pub touched_ids: Vec<String>,
    #[serde(skip)]
    pub job_id: Option<String>,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl BatchReport {
    /// Count one item.
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Created => self.created += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Count one failed item with its reason.
    pub fn fail(&mut self, item: impl Into<String>, reason: impl ToString) {
        self.record(ItemOutcome::Failed);
        self.failures.push(ItemFailure {
            item: item.into(),
            reason: reason.to_string(),
        });
    }

    /// Items that reached the store.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.failed
    }
}

/// Open a `batch_jobs` row for a run.
pub(crate) async fn start_job(storage: &Storage, kind: &str) -> Result<String> {
    storage.insert_batch_job(kind).await
}

/// Close the run's `batch_jobs` row. Failing to record history does not fail the run.
pub(crate) async fn finish_job(storage: &Storage, report: &mut BatchReport, job_id: String) {
    match serde_json::to_string(&*report) {
        Ok(stats) => {
            if let Err(e) = storage.finish_batch_job(&job_id, &stats).await {
                warn!(%job_id, error = %e, "failed to record batch job");
            }
        }
        Err(e) => warn!(%job_id, error = %e, "failed to encode batch report"),
    }
    report.job_id = Some(job_id);
}

// ---------------------------------------------------------------------------
// Import run
// ---------------------------------------------------------------------------

/// Import every row of a delimited file.
///
/// 1. Read and decode all rows (an unreadable header aborts the run)
/// 2. Skip rows without a name
/// 3. Resolve the category, parse the fields, upsert the record
///
/// Per-row failures are counted and never stop the batch.
#[instrument(skip_all, fields(delimiter = config.delimiter))]
pub async fn import_rows<R: Read>(
    reader: R,
    config: &ImportConfig,
    storage: &Storage,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<BatchReport> {
    let start = Instant::now();

    progress.phase("Reading rows");
    let rows = read_rows(reader, config.delimiter)?;
    let total = rows.len();
    info!(rows = total, "starting import");

    // Every fallible setup step runs before the job row exists, so a
    // recorded job is always finished.
    let mut cache = CategoryCache::load(storage, &config.default_category).await?;
    let job_id = start_job(storage, IMPORT_JOB_KIND).await?;
    let mut report = BatchReport::default();

    progress.phase("Importing rows");
    for (i, row) in rows.into_iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(remaining = total - i, "import cancelled");
            report.cancelled = true;
            break;
        }

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "undecodable row");
                report.fail(format!("line {}", i + 1), e);
                continue;
            }
        };

        if row.is_blank() {
            report.record(ItemOutcome::Skipped);
            continue;
        }

        let name = row.display_name().to_string();
        progress.item(i + 1, total, &name);

        match import_row(row, &mut cache, storage).await {
            Ok((outcome, id)) => {
                report.record(outcome.into());
                report.touched_ids.push(id);
            }
            Err(e) => {
                warn!(%name, error = %e, "row failed");
                report.fail(name, e);
            }
        }
    }

    report.elapsed = start.elapsed();
    finish_job(storage, &mut report, job_id).await;
    progress.done(&report);

    info!(
        created = report.created,
        updated = report.updated,
        failed = report.failed,
        skipped = report.skipped,
        categories = cache.len(),
        elapsed_ms = report.elapsed.as_millis(),
        "import complete"
    );

    Ok(report)
}

async fn import_row(
    row: ImportRow,
    cache: &mut CategoryCache,
    storage: &Storage,
) -> Result<(UpsertOutcome, String)> {
    let category = cache.resolve(storage, row.category.as_deref()).await?;
    let draft = row.into_draft(&category.id)?;
    reconcile::apply(storage, &draft).await
}
