//! Ingestion and enrichment pipelines for Larder.
//!
//! This crate ties parsing, reconciliation, and the generative service
//! together into batch workflows (`import_rows`, `enrich_records`).

pub mod batch;
pub mod enrichment;
pub mod pacing;
pub mod pipeline;
pub mod reconcile;
pub mod synthesis;

pub use batch::{ENRICH_JOB_KIND, Selection, enrich_records, select_records};
pub use enrichment::{
    BackoffPolicy, Enricher, EnrichmentOutcome, EnrichmentRequest, EnrichmentResult,
};
pub use pacing::Pacer;
pub use pipeline::{
    BatchReport, IMPORT_JOB_KIND, ItemFailure, ItemOutcome, ProgressReporter, SilentProgress,
    import_rows,
};
pub use reconcile::{CategoryCache, UpsertOutcome};
