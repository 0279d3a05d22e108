//! Enrichment batch runner.
//!
//! Walks a selection of record ids strictly in order: fetch the record,
//! enrich it, merge the non-empty fields, persist through the upsert path.
//! A failing item is counted and the batch moves on.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use larder_shared::{LarderError, Result};
use larder_storage::Storage;

use crate::enrichment::{EnrichmentRequest, Enricher};
use crate::pipeline::{BatchReport, ProgressReporter, finish_job, start_job};
use crate::reconcile::{self, UpsertOutcome};

/// Batch job kind recorded for enrichment runs.
pub const ENRICH_JOB_KIND: &str = "enrich";

/// Which records an enrichment run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Exactly these ids, in this order.
    Ids(Vec<String>),
    /// Every record.
    All,
    /// Records whose steps are missing or hold a stale error message.
    Incomplete,
}

/// Resolve a selection to record ids in processing order.
pub async fn select_records(storage: &Storage, selection: &Selection) -> Result<Vec<String>> {
    match selection {
        Selection::Ids(ids) => Ok(ids.clone()),
        Selection::All => Ok(storage
            .list_records()
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect()),
        Selection::Incomplete => Ok(storage
            .list_records()
            .await?
            .into_iter()
            .filter(|r| r.needs_enrichment())
            .map(|r| r.id)
            .collect()),
    }
}

/// Enrich every id in `ids`, one at a time.
///
/// Cancellation is honored between items and while an item waits on the
/// generative service; an interrupted item is left untouched.
#[instrument(skip_all, fields(items = ids.len(), online = enricher.is_online()))]
pub async fn enrich_records(
    ids: &[String],
    storage: &Storage,
    enricher: &Enricher,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<BatchReport> {
    let start = Instant::now();
    let total = ids.len();
    info!(total, "starting enrichment run");

    let job_id = start_job(storage, ENRICH_JOB_KIND).await?;
    let mut report = BatchReport::default();

    progress.phase("Enriching records");
    for (i, id) in ids.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(remaining = total - i, "enrichment cancelled");
            report.cancelled = true;
            break;
        }

        let record = match storage.get_record(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                report.fail(id.clone(), LarderError::NotFound(format!("record {id}")));
                continue;
            }
            Err(e) => {
                warn!(%id, error = %e, "record lookup failed");
                report.fail(id.clone(), e);
                continue;
            }
        };
        progress.item(i + 1, total, &record.name);

        let request = EnrichmentRequest::from_record(&record);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(name = %record.name, remaining = total - i, "enrichment cancelled mid-item");
                report.cancelled = true;
                break;
            }
            outcome = enricher.enrich(&request) => outcome,
        };

        let mut draft = record.to_draft();
        // A scrubbed stale description must not survive the merge
        draft.description = request.description.clone();
        outcome.result.merge_into(&mut draft);

        match reconcile::apply(storage, &draft).await {
            Ok((upsert, id)) => {
                report.record(upsert.into());
                if outcome.used_fallback {
                    report.fallbacks += 1;
                }
                if upsert == UpsertOutcome::Created {
                    warn!(%id, "enriched record was re-created");
                }
                report.touched_ids.push(id);
            }
            Err(e) => {
                warn!(name = %record.name, error = %e, "failed to persist enrichment");
                report.fail(record.name.clone(), e);
            }
        }
    }

    report.elapsed = start.elapsed();
    finish_job(storage, &mut report, job_id).await;
    progress.done(&report);

    info!(
        updated = report.updated,
        failed = report.failed,
        fallbacks = report.fallbacks,
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis(),
        "enrichment run complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use larder_shared::{EndpointDescriptor, EnrichmentConfig, Ingredient, RecordDraft};
    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::enrichment::BackoffPolicy;
    use crate::pacing::Pacer;
    use crate::pipeline::SilentProgress;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("larder_core_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn seed(storage: &Storage) -> (String, String) {
        let cat = storage.insert_category("Minuman").await.unwrap();
        let bare = storage
            .insert_record(&RecordDraft {
                name: "Es Teh".into(),
                description: Some("Error: quota exceeded".into()),
                category_id: cat.id.clone(),
                ingredients: vec![Ingredient::named("Teh")],
                ..RecordDraft::default()
            })
            .await
            .unwrap();
        let complete = storage
            .insert_record(&RecordDraft {
                name: "Kopi Susu".into(),
                description: Some("Kopi dengan susu.".into()),
                category_id: cat.id,
                steps: vec!["Seduh kopi.".into()],
                ..RecordDraft::default()
            })
            .await
            .unwrap();
        (bare.id, complete.id)
    }

    fn offline_enricher() -> Enricher {
        Enricher::new(&EnrichmentConfig::offline(), BackoffPolicy::none()).unwrap()
    }

    #[tokio::test]
    async fn selection_filters_incomplete() {
        let storage = test_storage().await;
        let (bare, complete) = seed(&storage).await;

        let incomplete = select_records(&storage, &Selection::Incomplete).await.unwrap();
        assert_eq!(incomplete, vec![bare.clone()]);

        let all = select_records(&storage, &Selection::All).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&complete));

        let explicit = select_records(&storage, &Selection::Ids(vec!["x".into()]))
            .await
            .unwrap();
        assert_eq!(explicit, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn offline_run_synthesizes_and_scrubs() {
        let storage = test_storage().await;
        let (bare, _) = seed(&storage).await;

        let report = enrich_records(
            &[bare.clone(), "missing-id".into()],
            &storage,
            &offline_enricher(),
            &CancellationToken::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.fallbacks, 1);
        assert_eq!(report.failures[0].item, "missing-id");

        let record = storage.get_record(&bare).await.unwrap().unwrap();
        assert_eq!(record.steps.len(), 5);
        assert!(record.steps[0].contains("Teh"));
        assert!(!record.needs_enrichment());
        let description = record.description.as_deref().unwrap();
        assert!(!description.contains("quota"));

        let jobs = storage.list_batch_jobs(5).await.unwrap();
        assert_eq!(jobs[0].kind, ENRICH_JOB_KIND);
    }

    #[tokio::test]
    async fn failing_service_still_completes_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let (bare, complete) = seed(&storage).await;

        let config = EnrichmentConfig {
            endpoints: vec![EndpointDescriptor::new(
                "m1",
                Url::parse(&server.uri()).unwrap(),
            )],
            api_key: Some("test-key".into()),
            request_timeout: Duration::from_secs(5),
            temperature: 0.4,
            max_output_tokens: 256,
        };
        let enricher = Enricher::new(&config, BackoffPolicy::none())
            .unwrap()
            .with_pacer(Arc::new(Pacer::unpaced()));

        let report = enrich_records(
            &[bare, complete.clone()],
            &storage,
            &enricher,
            &CancellationToken::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.updated, 2);
        assert_eq!(report.fallbacks, 2);
        assert_eq!(report.failed, 0);

        // Existing content survives: synthesis keeps a good description
        let kopi = storage.get_record(&complete).await.unwrap().unwrap();
        assert_eq!(kopi.description.as_deref(), Some("Kopi dengan susu."));
    }

    #[tokio::test]
    async fn service_result_is_merged() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "candidates": [{ "content": { "parts": [{
                "text": "{\"description\": \"Teh dingin manis.\", \"steps\": [\"Seduh teh.\", \"Tambahkan es.\"]}"
            }] } }]
        });
        Mock::given(method("POST"))
            .and(path("/models/m1:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let (bare, _) = seed(&storage).await;
        let config = EnrichmentConfig {
            endpoints: vec![EndpointDescriptor::new(
                "m1",
                Url::parse(&server.uri()).unwrap(),
            )],
            api_key: Some("test-key".into()),
            request_timeout: Duration::from_secs(5),
            temperature: 0.4,
            max_output_tokens: 256,
        };
        let enricher = Enricher::new(&config, BackoffPolicy::none()).unwrap();

        let report = enrich_records(
            &[bare.clone()],
            &storage,
            &enricher,
            &CancellationToken::new(),
            &SilentProgress,
        )
        .await
        .unwrap();
        assert_eq!(report.fallbacks, 0);

        let record = storage.get_record(&bare).await.unwrap().unwrap();
        assert_eq!(record.description.as_deref(), Some("Teh dingin manis."));
        assert_eq!(record.steps, vec!["Seduh teh.", "Tambahkan es."]);
        // Absent in the reply, so kept
        assert_eq!(record.ingredients, vec![Ingredient::named("Teh")]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_item() {
        let storage = test_storage().await;
        let (bare, complete) = seed(&storage).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = enrich_records(
            &[bare.clone(), complete],
            &storage,
            &offline_enricher(),
            &cancel,
            &SilentProgress,
        )
        .await
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.processed(), 0);
        let untouched = storage.get_record(&bare).await.unwrap().unwrap();
        assert!(untouched.steps.is_empty());
    }
}
