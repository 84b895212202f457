use chrono::{Duration, Utc};
use log::{error, info, warn};
use miette::Diagnostic;
use nudge_db::db::{self, ExtractionOutcome, ExtractionRecord, StoreError};
use nudge_db::models::{ItemSourceType, ItemStatus};
use nudge_db::{Connection, ConnectionPool};
use readable::extract::{ExtractError, ExtractedText, extract};
use readable::{FetchResult, Fetcher, short_detail};
use thiserror::Error;
use uuid::Uuid;

use crate::config::WorkerConfig;

#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    #[error("couldn't get a database connection")]
    Pool(#[from] nudge_db::PoolError),

    #[error(transparent)]
    Query(#[from] diesel::result::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One worker tick: recover stale items and claim a batch in a single short
/// transaction, then process each claimed item with no locks held. Returns
/// the number of claimed items.
pub async fn claim_and_process_batch(
    pool: &ConnectionPool,
    fetcher: &dyn Fetcher,
    config: &WorkerConfig,
) -> Result<usize, WorkerError> {
    let claimed_ids = {
        let mut conn = pool.get()?;
        conn.transaction(|conn| {
            let requeued =
                db::requeue_stale_processing(conn, Duration::minutes(config.stale_processing_minutes))?;
            if requeued > 0 {
                info!("requeued_stale_processing={requeued}");
            }

            db::claim_queued_batch(conn, config.batch_size)
        })?
        // The connection goes back to the pool here, before any network I/O.
    };

    if !claimed_ids.is_empty() {
        info!("claimed_batch size={} ids={claimed_ids:?}", claimed_ids.len());
    }

    for item_id in &claimed_ids {
        if let Err(err) = process_item(pool, fetcher, config, *item_id).await {
            // Rare internal failure: park the item in `failed` if we can,
            // otherwise just log. The loop keeps going either way.
            error!("item_id={item_id} internal_error={err}");
            match pool.get() {
                Ok(mut conn) => {
                    if let Err(persist_err) =
                        db::record_internal_failure(&mut conn, *item_id, &short_detail(&err.to_string()))
                    {
                        error!("item_id={item_id} failed_to_persist_internal_error={persist_err}");
                    }
                }
                Err(pool_err) => {
                    error!("item_id={item_id} failed_to_persist_internal_error={pool_err}");
                }
            }
        }
    }

    Ok(claimed_ids.len())
}

/// Process one claimed item: a short read transaction to re-check ownership,
/// the fetch + extraction with no database connection held, then a short
/// write-back transaction recording the attempt and the outcome.
pub async fn process_item(
    pool: &ConnectionPool,
    fetcher: &dyn Fetcher,
    config: &WorkerConfig,
    item_id: Uuid,
) -> Result<(), WorkerError> {
    let started_at = Utc::now();

    let url = {
        let mut conn = pool.get()?;

        let Some(item) = db::get_item_unscoped(&mut conn, item_id)? else {
            warn!("item_id={item_id} missing; skipping");
            return Ok(());
        };

        if item.source_type != ItemSourceType::Url {
            info!(
                "item_id={item_id} source_type={} not url; skipping",
                item.source_type
            );
            return Ok(());
        }

        // Only process what we actually claimed; anything else is owned by
        // another worker or was swept back to the queue.
        if item.status != ItemStatus::Processing {
            info!(
                "item_id={item_id} status={} not processing; skipping",
                item.status
            );
            return Ok(());
        }

        match item.requested_url.filter(|url| !url.is_empty()) {
            Some(url) => url,
            None => {
                let record = ExtractionRecord {
                    started_at,
                    finished_at: Utc::now(),
                    http_status: None,
                    final_url: None,
                    content_length: None,
                };
                let outcome = ExtractionOutcome::Failure {
                    error_code: "missing_link".to_string(),
                    error_detail: "Missing link on item.".to_string(),
                    retryable: false,
                };
                let applied =
                    db::record_extraction(&mut conn, item_id, &record, &outcome, config.max_attempts)?;
                log_transition(item_id, applied.attempt_no, &applied.new_status, "missing_link");
                return Ok(());
            }
        }
        // The connection drops here; nothing is held during the fetch.
    };

    let fetch = fetcher.fetch(&url).await;

    let extraction = match (fetch.ok, &fetch.body_bytes) {
        (true, Some(body)) => Some(extract(body, &config.extract_config())),
        _ => None,
    };

    let finished_at = Utc::now();

    let record = ExtractionRecord {
        started_at,
        finished_at,
        http_status: fetch.http_status,
        final_url: fetch.final_url.clone(),
        content_length: fetch.body_bytes.as_ref().map(|body| body.len() as i32),
    };
    let outcome = build_outcome(&fetch, extraction);

    let mut conn = pool.get()?;
    let applied = db::record_extraction(&mut conn, item_id, &record, &outcome, config.max_attempts)?;

    match &outcome {
        ExtractionOutcome::Success { text, .. } => {
            info!(
                "item_id={item_id} attempt_no={} success chars={}",
                applied.attempt_no,
                text.chars().count()
            );
        }
        ExtractionOutcome::Failure { error_code, .. } => {
            warn!(
                "item_id={item_id} attempt_no={} error={error_code} http_status={:?} -> {}",
                applied.attempt_no, fetch.http_status, applied.new_status
            );
        }
    }
    log_transition(
        item_id,
        applied.attempt_no,
        &applied.new_status,
        outcome_code(&outcome),
    );

    Ok(())
}

/// The retry/classification decision table, as data in and data out so the
/// whole policy is testable without a database.
pub fn build_outcome(
    fetch: &FetchResult,
    extraction: Option<Result<ExtractedText, ExtractError>>,
) -> ExtractionOutcome {
    if fetch.ok {
        // The page was retrieved; any failure from here on is about its
        // content, and fetching again would not change the result.
        return match extraction {
            Some(Ok(extracted)) => ExtractionOutcome::Success {
                text: extracted.text,
                title: extracted.title,
            },
            Some(Err(err)) => {
                let detail = match err {
                    ExtractError::TooShort => {
                        "We couldn't extract enough readable text from this page."
                    }
                    ExtractError::EmptyExtraction => {
                        "We couldn't extract readable text from this page."
                    }
                };
                ExtractionOutcome::Failure {
                    error_code: err.code().to_string(),
                    error_detail: detail.to_string(),
                    retryable: false,
                }
            }
            None => ExtractionOutcome::Failure {
                error_code: "extraction_failed".to_string(),
                error_detail: "Extraction failed.".to_string(),
                retryable: false,
            },
        };
    }

    ExtractionOutcome::Failure {
        error_code: fetch
            .error_code
            .clone()
            .unwrap_or_else(|| "unexpected_fetch_error".to_string()),
        error_detail: fetch
            .error_detail
            .clone()
            .unwrap_or_else(|| "Unexpected fetch error.".to_string()),
        retryable: fetch.retryable,
    }
}

fn outcome_code(outcome: &ExtractionOutcome) -> &str {
    match outcome {
        ExtractionOutcome::Success { .. } => "success",
        ExtractionOutcome::Failure { error_code, .. } => error_code,
    }
}

fn log_transition(item_id: Uuid, attempt_no: i32, new_status: &ItemStatus, code: &str) {
    info!("item_id={item_id} attempt_no={attempt_no} outcome={code} status={new_status}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_fetch(body: &str) -> FetchResult {
        FetchResult {
            ok: true,
            final_url: Some("https://example.com/final".to_string()),
            http_status: Some(200),
            content_type: Some("text/html".to_string()),
            body_bytes: Some(body.as_bytes().to_vec()),
            error_code: None,
            error_detail: None,
            retryable: false,
        }
    }

    fn failed_fetch(code: &str, retryable: bool) -> FetchResult {
        FetchResult {
            ok: false,
            final_url: None,
            http_status: None,
            content_type: None,
            body_bytes: None,
            error_code: Some(code.to_string()),
            error_detail: Some("details".to_string()),
            retryable,
        }
    }

    #[test]
    fn successful_fetch_and_extraction_is_a_success() {
        let fetch = ok_fetch("<html>irrelevant here</html>");
        let extracted = ExtractedText {
            text: "body text".to_string(),
            title: Some("Title".to_string()),
        };
        let outcome = build_outcome(&fetch, Some(Ok(extracted)));
        assert!(matches!(outcome, ExtractionOutcome::Success { .. }));
    }

    #[test]
    fn extraction_errors_are_terminal() {
        let fetch = ok_fetch("<html></html>");
        for (err, code) in [
            (ExtractError::TooShort, "too_short"),
            (ExtractError::EmptyExtraction, "empty_extraction"),
        ] {
            let outcome = build_outcome(&fetch, Some(Err(err)));
            match outcome {
                ExtractionOutcome::Failure {
                    error_code,
                    retryable,
                    ..
                } => {
                    assert_eq!(error_code, code);
                    assert!(!retryable);
                }
                ExtractionOutcome::Success { .. } => panic!("expected failure"),
            }
        }
    }

    #[test]
    fn retryable_fetch_failures_stay_retryable() {
        let outcome = build_outcome(&failed_fetch("http_503", true), None);
        match outcome {
            ExtractionOutcome::Failure {
                error_code,
                retryable,
                ..
            } => {
                assert_eq!(error_code, "http_503");
                assert!(retryable);
            }
            ExtractionOutcome::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn terminal_fetch_failures_stay_terminal() {
        for code in ["invalid_url", "non_html", "max_bytes_exceeded", "http_404"] {
            let outcome = build_outcome(&failed_fetch(code, false), None);
            match outcome {
                ExtractionOutcome::Failure {
                    error_code,
                    retryable,
                    ..
                } => {
                    assert_eq!(error_code, code);
                    assert!(!retryable);
                }
                ExtractionOutcome::Success { .. } => panic!("expected failure"),
            }
        }
    }

    #[test]
    fn fetch_ok_without_body_counts_as_extraction_failure() {
        let mut fetch = ok_fetch("");
        fetch.body_bytes = None;
        let outcome = build_outcome(&fetch, None);
        match outcome {
            ExtractionOutcome::Failure {
                error_code,
                retryable,
                ..
            } => {
                assert_eq!(error_code, "extraction_failed");
                assert!(!retryable);
            }
            ExtractionOutcome::Success { .. } => panic!("expected failure"),
        }
    }
}
