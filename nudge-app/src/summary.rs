//! On-demand summary generation.
//!
//! Synchronous from the caller's point of view: validate, truncate the
//! input, reserve an attempt row, invoke the tier model, persist. The
//! reserved attempt starts as `failed` and is flipped on success, so a crash
//! mid-generation still leaves a trace of the try.

use chrono::Utc;
use log::{info, warn};
use miette::Diagnostic;
use nudge_db::db::{self, StoreError, SummaryCompletion};
use nudge_db::models::{ItemStatus, ModelKey, NewItemSummary};
use thiserror::Error;
use uuid::Uuid;

use crate::Db;
use crate::llm::{ModelRegistry, PROMPT_VERSION, SummaryModelError};

pub const MAX_INPUT_CHARS: usize = 20_000;
pub const WORD_CAP: usize = 120;

#[derive(Debug, Error, Diagnostic)]
pub enum SummaryError {
    #[error("Invalid model_key")]
    InvalidModelKey,

    #[error("Item not found.")]
    ItemNotFound,

    #[error("{0}")]
    NotReady(&'static str),

    #[error(transparent)]
    Query(#[from] diesel::result::Error),

    #[error("Summary generation failed.")]
    Generation(#[source] SummaryModelError),
}

impl From<StoreError> for SummaryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ItemNotFound => SummaryError::ItemNotFound,
            StoreError::StateConflict(detail) => SummaryError::NotReady(detail),
            StoreError::Query(err) => SummaryError::Query(err),
        }
    }
}

pub fn count_words(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Truncate to at most `cap` whitespace-separated words, rejoined by single
/// spaces. Text within the cap is returned untouched.
pub fn enforce_word_cap(s: &str, cap: usize) -> String {
    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() <= cap {
        s.to_string()
    } else {
        words[..cap].join(" ")
    }
}

/// Character-boundary-safe prefix of at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

/// Generate, persist, and return a plain-text summary for a succeeded item.
pub async fn generate_item_summary(
    db: &Db,
    registry: &ModelRegistry,
    item_id: Uuid,
    user_id: Uuid,
    requested_model_key: Option<String>,
) -> Result<String, SummaryError> {
    let model_key = match requested_model_key {
        Some(raw) => raw
            .trim()
            .to_lowercase()
            .parse::<ModelKey>()
            .map_err(|_| SummaryError::InvalidModelKey)?,
        None => registry.default_key(),
    };

    // Preconditions, checked in order so each failure maps to one distinct
    // API status.
    let canonical_text = db
        .run(move |conn| -> Result<String, SummaryError> {
            let item =
                db::get_item(conn, item_id, user_id)?.ok_or(SummaryError::ItemNotFound)?;
            if item.status != ItemStatus::Succeeded {
                return Err(SummaryError::NotReady("Item is not in succeeded status."));
            }

            db::get_item_content(conn, item_id)?
                .and_then(|content| content.canonical_text)
                .filter(|text| !text.trim().is_empty())
                .ok_or(SummaryError::NotReady(
                    "Item has no canonical text to summarize.",
                ))
        })
        .await?;

    let input_chars_original = canonical_text.chars().count();
    let truncated = truncate_chars(&canonical_text, MAX_INPUT_CHARS).to_string();
    let input_chars_used = truncated.chars().count();

    // Reserve the attempt number before calling out. If the reservation
    // fails the generation still runs; the attempt log is observability,
    // not a gate.
    let started_at = Utc::now();
    let reserved_attempt_id = match db
        .run(move |conn| {
            db::reserve_summary_attempt(conn, item_id, model_key, PROMPT_VERSION, started_at)
        })
        .await
    {
        Ok(reserved) => Some(reserved.id),
        Err(err) => {
            warn!("item_id={item_id} summary attempt reservation failed: {err}");
            None
        }
    };

    let model = registry.model(model_key);
    let output = match model.generate(&truncated, PROMPT_VERSION).await {
        Ok(output) => output,
        Err(err) => {
            fail_reserved_attempt(db, item_id, reserved_attempt_id, &err.to_string()).await;
            return Err(SummaryError::Generation(err));
        }
    };

    let summary_text = enforce_word_cap(output.text.trim(), WORD_CAP);
    let output_words = count_words(&summary_text);

    let persisted = {
        let summary_text = summary_text.clone();
        let provider = output.provider.clone();
        let model_name = output.model.clone();
        let latency_ms = output.latency_ms;

        db.run(move |conn| {
            db::record_summary_success(
                conn,
                NewItemSummary {
                    id: Uuid::new_v4(),
                    item_id,
                    user_id,
                    model_key,
                    provider: Some(&provider),
                    model: Some(&model_name),
                    prompt_version: PROMPT_VERSION,
                    input_chars_original: input_chars_original as i32,
                    input_chars_used: input_chars_used as i32,
                    output_words: output_words as i32,
                    summary_text: &summary_text,
                },
                reserved_attempt_id,
                SummaryCompletion {
                    provider: Some(&provider),
                    model: Some(&model_name),
                    latency_ms: Some(latency_ms),
                    finished_at: Utc::now(),
                },
            )
        })
        .await
    };

    match persisted {
        Ok(_) => {
            info!(
                "summary_generated item_id={item_id} model_key={model_key} provider={} \
                 model={} input_chars_used={input_chars_used} output_words={output_words} \
                 latency_ms={}",
                output.provider, output.model, output.latency_ms,
            );
            Ok(summary_text)
        }
        Err(err) => {
            fail_reserved_attempt(db, item_id, reserved_attempt_id, "failed to persist summary")
                .await;
            Err(err.into())
        }
    }
}

/// Best-effort terminal update of the reserved attempt; failures here are
/// logged and swallowed because the caller is already on an error path.
async fn fail_reserved_attempt(
    db: &Db,
    item_id: Uuid,
    attempt_id: Option<Uuid>,
    detail: &str,
) {
    let Some(attempt_id) = attempt_id else {
        return;
    };

    let detail = readable::short_detail(detail);
    let result = db
        .run(move |conn| db::mark_summary_attempt_failed(conn, attempt_id, &detail, Utc::now()))
        .await;

    if let Err(err) = result {
        warn!("item_id={item_id} failed to update reserved summary attempt: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_counting_ignores_runs_of_whitespace() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("   "), 0);
        assert_eq!(count_words("one"), 1);
        assert_eq!(count_words("one  two\nthree\t four"), 4);
    }

    #[test]
    fn word_cap_leaves_short_text_untouched() {
        let text = "a summary\nwith line breaks";
        assert_eq!(enforce_word_cap(text, 120), text);
    }

    #[test]
    fn word_cap_truncates_and_rejoins_with_single_spaces() {
        let text = (0..200).map(|i| i.to_string()).collect::<Vec<_>>().join("  ");
        let capped = enforce_word_cap(&text, 120);
        assert_eq!(count_words(&capped), 120);
        assert!(capped.starts_with("0 1 2"));
        assert!(capped.ends_with("119"));
    }

    #[test]
    fn char_truncation_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");

        let accented = "ééééé";
        assert_eq!(truncate_chars(accented, 2), "éé");
    }

    #[test]
    fn char_truncation_matches_the_input_budget() {
        let text = "x".repeat(21_234);
        let truncated = truncate_chars(&text, MAX_INPUT_CHARS);
        assert_eq!(truncated.chars().count(), 20_000);
    }
}
