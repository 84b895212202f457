//! Every transactional operation of the service.
//!
//! Status transitions happen only here, never at call sites. Functions take
//! an explicit `&mut PgConnection`; operations that are inherently one unit
//! of work open their own transaction, while `claim_queued_batch` and
//! `requeue_stale_processing` document the transaction they expect to run in.

use chrono::{DateTime, Duration, Utc};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::cursor::PageCursor;
use crate::models::{
    AttemptResult, DbExtractionAttempt, DbItem, DbItemContent, DbItemSummary, DbSummaryAttempt,
    ItemFinalTextSource, ItemSourceType, ItemStatus, ModelKey, NewExtractionAttempt, NewItem,
    NewItemContent, NewItemSummary, NewSummaryAttempt, NewUser, SummaryAttemptStatus,
};

/// Status detail shown while a worker owns an item.
pub const PROCESSING_DETAIL: &str = "processing";

/// Status detail left behind by the stale-recovery sweep.
pub const STALE_REQUEUE_DETAIL: &str = "requeued after stale processing";

/// The user-facing hint for every user-recoverable extraction failure.
pub const NEEDS_USER_TEXT_DETAIL: &str =
    "We couldn't read this link. Please open it and paste the article text here.";

const INTERNAL_ERROR_DETAIL: &str = "Internal error while processing.";

// Uniqueness violations on attempt numbers only happen when two writers race
// the same item; a handful of recomputations is far more than enough.
const ATTEMPT_NO_RETRIES: u32 = 4;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("item not found")]
    ItemNotFound,

    #[error("{0}")]
    StateConflict(&'static str),

    #[error(transparent)]
    Query(#[from] DieselError),
}

/// What a new submission carries: a link to fetch, or text that is already
/// canonical. A url submission may stash pasted text as fallback input
/// without making it canonical.
#[derive(Debug, Clone, Copy)]
pub enum ItemSubmission<'a> {
    Url {
        url: &'a str,
        pasted_fallback: Option<&'a str>,
    },
    PastedText {
        text: &'a str,
    },
}

/// Idempotent lazy user creation, called at the authentication boundary.
pub fn ensure_user(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<()> {
    use crate::schema::users::dsl as users_dsl;

    diesel::insert_into(users_dsl::users)
        .values(NewUser { id: user_id })
        .on_conflict_do_nothing()
        .execute(conn)
        .map(|_| ())
}

/// Atomic Item + ItemContent insert. Paste submissions succeed immediately;
/// url submissions start queued for the worker.
pub fn create_item(
    conn: &mut PgConnection,
    user_id: Uuid,
    submission: ItemSubmission<'_>,
) -> QueryResult<DbItem> {
    use crate::schema::item_content::dsl as content_dsl;
    use crate::schema::items::dsl as items_dsl;

    conn.transaction(|conn| {
        let item_id = Uuid::new_v4();

        let (new_item, new_content) = match submission {
            ItemSubmission::Url {
                url,
                pasted_fallback,
            } => (
                NewItem {
                    id: item_id,
                    user_id,
                    status: ItemStatus::Queued,
                    status_detail: None,
                    source_type: ItemSourceType::Url,
                    requested_url: Some(url),
                    final_text_source: None,
                },
                NewItemContent {
                    item_id,
                    user_pasted_text: pasted_fallback,
                    extracted_text: None,
                    canonical_text: None,
                },
            ),
            ItemSubmission::PastedText { text } => (
                NewItem {
                    id: item_id,
                    user_id,
                    status: ItemStatus::Succeeded,
                    status_detail: None,
                    source_type: ItemSourceType::PastedText,
                    requested_url: None,
                    final_text_source: Some(ItemFinalTextSource::UserPastedText),
                },
                NewItemContent {
                    item_id,
                    user_pasted_text: Some(text),
                    extracted_text: None,
                    canonical_text: Some(text),
                },
            ),
        };

        let item = diesel::insert_into(items_dsl::items)
            .values(&new_item)
            .returning(DbItem::as_returning())
            .get_result(conn)?;

        diesel::insert_into(content_dsl::item_content)
            .values(&new_content)
            .execute(conn)?;

        Ok(item)
    })
}

pub fn get_item(
    conn: &mut PgConnection,
    item_id: Uuid,
    user_id: Uuid,
) -> QueryResult<Option<DbItem>> {
    use crate::schema::items::dsl as items_dsl;

    items_dsl::items
        .filter(items_dsl::id.eq(item_id))
        .filter(items_dsl::user_id.eq(user_id))
        .select(DbItem::as_select())
        .first(conn)
        .optional()
}

/// Worker-side lookup; the worker owns items regardless of user.
pub fn get_item_unscoped(conn: &mut PgConnection, item_id: Uuid) -> QueryResult<Option<DbItem>> {
    use crate::schema::items::dsl as items_dsl;

    items_dsl::items
        .filter(items_dsl::id.eq(item_id))
        .select(DbItem::as_select())
        .first(conn)
        .optional()
}

pub fn get_item_content(
    conn: &mut PgConnection,
    item_id: Uuid,
) -> QueryResult<Option<DbItemContent>> {
    use crate::schema::item_content::dsl as content_dsl;

    content_dsl::item_content
        .filter(content_dsl::item_id.eq(item_id))
        .select(DbItemContent::as_select())
        .first(conn)
        .optional()
}

/// Keyset-paginated listing ordered by `(created_at DESC, id DESC)`. Fetches
/// one row past `limit` to decide whether a next page exists; the returned
/// cursor points at the last row of this page.
pub fn list_items(
    conn: &mut PgConnection,
    user_id: Uuid,
    limit: i64,
    cursor: Option<PageCursor>,
) -> QueryResult<(Vec<DbItem>, Option<PageCursor>)> {
    use crate::schema::items::dsl as items_dsl;

    let mut query = items_dsl::items
        .filter(items_dsl::user_id.eq(user_id))
        .order((items_dsl::created_at.desc(), items_dsl::id.desc()))
        .limit(limit + 1)
        .select(DbItem::as_select())
        .into_boxed();

    if let Some(cursor) = cursor {
        // Strictly older than the cursor tuple.
        query = query.filter(
            items_dsl::created_at.lt(cursor.created_at).or(items_dsl::created_at
                .eq(cursor.created_at)
                .and(items_dsl::id.lt(cursor.id))),
        );
    }

    let mut rows = query.load::<DbItem>(conn)?;

    let next_cursor = if rows.len() as i64 > limit {
        rows.truncate(limit as usize);
        rows.last().map(|item| PageCursor {
            created_at: item.created_at,
            id: item.id,
        })
    } else {
        None
    };

    Ok((rows, next_cursor))
}

/// Paste recovery: legal only while the item is waiting on the user.
pub fn patch_item_text(
    conn: &mut PgConnection,
    item_id: Uuid,
    user_id: Uuid,
    pasted_text: &str,
) -> Result<DbItem, StoreError> {
    use crate::schema::item_content::dsl as content_dsl;
    use crate::schema::items::dsl as items_dsl;

    conn.transaction(|conn| {
        let item: Option<DbItem> = items_dsl::items
            .filter(items_dsl::id.eq(item_id))
            .filter(items_dsl::user_id.eq(user_id))
            .for_update()
            .select(DbItem::as_select())
            .first(conn)
            .optional()?;
        let item = item.ok_or(StoreError::ItemNotFound)?;

        if item.status != ItemStatus::NeedsUserText {
            return Err(StoreError::StateConflict(
                "Item is not in needs_user_text status.",
            ));
        }

        let now = Utc::now();

        diesel::insert_into(content_dsl::item_content)
            .values(NewItemContent {
                item_id,
                user_pasted_text: Some(pasted_text),
                extracted_text: None,
                canonical_text: Some(pasted_text),
            })
            .on_conflict(content_dsl::item_id)
            .do_update()
            .set((
                content_dsl::user_pasted_text.eq(pasted_text),
                content_dsl::canonical_text.eq(pasted_text),
                content_dsl::updated_at.eq(now),
            ))
            .execute(conn)?;

        let updated = diesel::update(items_dsl::items.filter(items_dsl::id.eq(item_id)))
            .set((
                items_dsl::status.eq(ItemStatus::Succeeded),
                items_dsl::status_detail.eq(None::<String>),
                items_dsl::final_text_source.eq(ItemFinalTextSource::UserPastedText),
                items_dsl::updated_at.eq(now),
            ))
            .returning(DbItem::as_returning())
            .get_result(conn)?;

        Ok(updated)
    })
}

/// Claim up to `batch_size` queued url items, oldest first, moving them to
/// `processing`. Rows locked by other workers are skipped rather than waited
/// on.
///
/// Must be called inside a short transaction; the caller commits before any
/// network I/O happens.
pub fn claim_queued_batch(conn: &mut PgConnection, batch_size: i64) -> QueryResult<Vec<Uuid>> {
    use crate::schema::items::dsl as items_dsl;

    let ids: Vec<Uuid> = items_dsl::items
        .filter(items_dsl::status.eq(ItemStatus::Queued))
        .filter(items_dsl::source_type.eq(ItemSourceType::Url))
        .order(items_dsl::created_at.asc())
        .limit(batch_size)
        .select(items_dsl::id)
        .for_update()
        .skip_locked()
        .load(conn)?;

    if !ids.is_empty() {
        diesel::update(items_dsl::items.filter(items_dsl::id.eq_any(&ids)))
            .set((
                items_dsl::status.eq(ItemStatus::Processing),
                items_dsl::status_detail.eq(PROCESSING_DETAIL),
                items_dsl::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
    }

    Ok(ids)
}

/// Return items stuck in `processing` past the threshold to the queue. An
/// item only stays in `processing` without progress when its worker died;
/// `updated_at` stops advancing the moment that happens.
pub fn requeue_stale_processing(
    conn: &mut PgConnection,
    threshold: Duration,
) -> QueryResult<usize> {
    use crate::schema::items::dsl as items_dsl;

    let stale_before = Utc::now() - threshold;

    diesel::update(
        items_dsl::items
            .filter(items_dsl::status.eq(ItemStatus::Processing))
            .filter(items_dsl::updated_at.lt(stale_before)),
    )
    .set((
        items_dsl::status.eq(ItemStatus::Queued),
        items_dsl::status_detail.eq(STALE_REQUEUE_DETAIL),
        items_dsl::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
}

/// Everything the write-back transaction needs to know about one attempt,
/// independent of how it turned out.
#[derive(Debug, Clone)]
pub struct ExtractionRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub http_status: Option<i32>,
    pub final_url: Option<String>,
    pub content_length: Option<i32>,
}

#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Success {
        text: String,
        title: Option<String>,
    },
    Failure {
        error_code: String,
        error_detail: String,
        retryable: bool,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionApplied {
    pub attempt_no: i32,
    pub new_status: ItemStatus,
}

/// The write-back transaction: insert the attempt row with the next attempt
/// number, then apply the outcome to the item. Retryable failures below the
/// attempt bound go back to `queued`; everything else that failed asks the
/// user for text.
pub fn record_extraction(
    conn: &mut PgConnection,
    item_id: Uuid,
    record: &ExtractionRecord,
    outcome: &ExtractionOutcome,
    max_attempts: i32,
) -> Result<ExtractionApplied, StoreError> {
    use crate::schema::items::dsl as items_dsl;

    conn.transaction(|conn| {
        // Lock the item row first so concurrent write-backs for the same item
        // serialize and the attempt numbering stays dense.
        let locked: Option<Uuid> = items_dsl::items
            .filter(items_dsl::id.eq(item_id))
            .for_update()
            .select(items_dsl::id)
            .first(conn)
            .optional()?;
        locked.ok_or(StoreError::ItemNotFound)?;

        let (result, error_code, error_detail) = match outcome {
            ExtractionOutcome::Success { .. } => (AttemptResult::Success, None, None),
            ExtractionOutcome::Failure {
                error_code,
                error_detail,
                ..
            } => (
                AttemptResult::Error,
                Some(error_code.as_str()),
                Some(error_detail.as_str()),
            ),
        };

        let attempt_no =
            insert_extraction_attempt(conn, item_id, record, result, error_code, error_detail)?;

        let new_status = match outcome {
            ExtractionOutcome::Success { text, title } => {
                apply_extraction_success(conn, item_id, text, title.as_deref())?;
                ItemStatus::Succeeded
            }
            ExtractionOutcome::Failure {
                error_code,
                retryable,
                ..
            } => {
                let now = Utc::now();
                if *retryable && attempt_no < max_attempts {
                    diesel::update(items_dsl::items.filter(items_dsl::id.eq(item_id)))
                        .set((
                            items_dsl::status.eq(ItemStatus::Queued),
                            items_dsl::status_detail.eq(format!("retrying: {error_code}")),
                            items_dsl::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    ItemStatus::Queued
                } else {
                    diesel::update(items_dsl::items.filter(items_dsl::id.eq(item_id)))
                        .set((
                            items_dsl::status.eq(ItemStatus::NeedsUserText),
                            items_dsl::status_detail.eq(NEEDS_USER_TEXT_DETAIL),
                            items_dsl::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    ItemStatus::NeedsUserText
                }
            }
        };

        Ok(ExtractionApplied {
            attempt_no,
            new_status,
        })
    })
}

/// Last-resort bookkeeping when processing itself blew up: record the attempt
/// and park the item in the terminal `failed` state.
pub fn record_internal_failure(
    conn: &mut PgConnection,
    item_id: Uuid,
    error_detail: &str,
) -> Result<(), StoreError> {
    use crate::schema::items::dsl as items_dsl;

    conn.transaction(|conn| {
        let locked: Option<Uuid> = items_dsl::items
            .filter(items_dsl::id.eq(item_id))
            .for_update()
            .select(items_dsl::id)
            .first(conn)
            .optional()?;
        if locked.is_none() {
            return Ok(());
        }

        let now = Utc::now();
        let record = ExtractionRecord {
            started_at: now,
            finished_at: now,
            http_status: None,
            final_url: None,
            content_length: None,
        };
        insert_extraction_attempt(
            conn,
            item_id,
            &record,
            AttemptResult::Error,
            Some("internal_error"),
            Some(error_detail),
        )?;

        diesel::update(items_dsl::items.filter(items_dsl::id.eq(item_id)))
            .set((
                items_dsl::status.eq(ItemStatus::Failed),
                items_dsl::status_detail.eq(INTERNAL_ERROR_DETAIL),
                items_dsl::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok(())
    })
}

fn apply_extraction_success(
    conn: &mut PgConnection,
    item_id: Uuid,
    text: &str,
    title: Option<&str>,
) -> QueryResult<()> {
    use crate::schema::item_content::dsl as content_dsl;
    use crate::schema::items::dsl as items_dsl;

    let now = Utc::now();

    diesel::insert_into(content_dsl::item_content)
        .values(NewItemContent {
            item_id,
            user_pasted_text: None,
            extracted_text: Some(text),
            canonical_text: Some(text),
        })
        .on_conflict(content_dsl::item_id)
        .do_update()
        .set((
            content_dsl::extracted_text.eq(text),
            content_dsl::canonical_text.eq(text),
            content_dsl::updated_at.eq(now),
        ))
        .execute(conn)?;

    let update = diesel::update(items_dsl::items.filter(items_dsl::id.eq(item_id)));
    match title {
        Some(title) => update
            .set((
                items_dsl::status.eq(ItemStatus::Succeeded),
                items_dsl::status_detail.eq(None::<String>),
                items_dsl::final_text_source.eq(ItemFinalTextSource::ExtractedFromUrl),
                items_dsl::title.eq(title),
                items_dsl::updated_at.eq(now),
            ))
            .execute(conn)?,
        None => update
            .set((
                items_dsl::status.eq(ItemStatus::Succeeded),
                items_dsl::status_detail.eq(None::<String>),
                items_dsl::final_text_source.eq(ItemFinalTextSource::ExtractedFromUrl),
                items_dsl::updated_at.eq(now),
            ))
            .execute(conn)?,
    };

    Ok(())
}

fn next_extraction_attempt_no(conn: &mut PgConnection, item_id: Uuid) -> QueryResult<i32> {
    use crate::schema::extraction_attempts::dsl as attempts_dsl;

    let current: Option<i32> = attempts_dsl::extraction_attempts
        .filter(attempts_dsl::item_id.eq(item_id))
        .select(max(attempts_dsl::attempt_no))
        .first(conn)?;

    Ok(current.unwrap_or(0) + 1)
}

fn insert_extraction_attempt(
    conn: &mut PgConnection,
    item_id: Uuid,
    record: &ExtractionRecord,
    result: AttemptResult,
    error_code: Option<&str>,
    error_detail: Option<&str>,
) -> Result<i32, StoreError> {
    use crate::schema::extraction_attempts::dsl as attempts_dsl;

    let mut retries = 0;
    loop {
        let attempt_no = next_extraction_attempt_no(conn, item_id)?;

        // The insert runs in a nested transaction (a savepoint) so a
        // uniqueness violation from a racing writer aborts only the insert,
        // not the surrounding write-back.
        let inserted = conn.transaction(|conn| {
            diesel::insert_into(attempts_dsl::extraction_attempts)
                .values(NewExtractionAttempt {
                    id: Uuid::new_v4(),
                    item_id,
                    attempt_no,
                    started_at: record.started_at,
                    finished_at: Some(record.finished_at),
                    result,
                    error_code,
                    error_detail,
                    http_status: record.http_status,
                    final_url: record.final_url.as_deref(),
                    content_length: record.content_length,
                })
                .execute(conn)
        });

        match inserted {
            Ok(_) => return Ok(attempt_no),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
                if retries < ATTEMPT_NO_RETRIES =>
            {
                retries += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Ordered attempt history for one item.
pub fn extraction_attempts_for_item(
    conn: &mut PgConnection,
    item_id: Uuid,
) -> QueryResult<Vec<DbExtractionAttempt>> {
    use crate::schema::extraction_attempts::dsl as attempts_dsl;

    attempts_dsl::extraction_attempts
        .filter(attempts_dsl::item_id.eq(item_id))
        .order(attempts_dsl::attempt_no.asc())
        .select(DbExtractionAttempt::as_select())
        .load(conn)
}

fn next_summary_attempt_no(
    conn: &mut PgConnection,
    item_id: Uuid,
    model_key: ModelKey,
) -> QueryResult<i32> {
    use crate::schema::summary_attempts::dsl as attempts_dsl;

    let current: Option<i32> = attempts_dsl::summary_attempts
        .filter(attempts_dsl::item_id.eq(item_id))
        .filter(attempts_dsl::model_key.eq(model_key))
        .select(max(attempts_dsl::attempt_no))
        .first(conn)?;

    Ok(current.unwrap_or(0) + 1)
}

/// Reserve an attempt number for a summary generation that is about to run.
/// The row is inserted as `failed` and flipped to `succeeded` by
/// [`record_summary_success`]; if the model call crashes, the reservation
/// already documents that something was tried.
pub fn reserve_summary_attempt(
    conn: &mut PgConnection,
    item_id: Uuid,
    model_key: ModelKey,
    prompt_version: &str,
    started_at: DateTime<Utc>,
) -> Result<DbSummaryAttempt, StoreError> {
    use crate::schema::summary_attempts::dsl as attempts_dsl;

    let mut retries = 0;
    loop {
        let attempt_no = next_summary_attempt_no(conn, item_id, model_key)?;

        let inserted = conn.transaction(|conn| {
            diesel::insert_into(attempts_dsl::summary_attempts)
                .values(NewSummaryAttempt {
                    id: Uuid::new_v4(),
                    item_id,
                    attempt_no,
                    model_key,
                    provider: None,
                    model: None,
                    prompt_version,
                    started_at,
                    finished_at: None,
                    status: SummaryAttemptStatus::Failed,
                    error_detail: None,
                    latency_ms: None,
                })
                .returning(DbSummaryAttempt::as_returning())
                .get_result(conn)
        });

        match inserted {
            Ok(row) => return Ok(row),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
                if retries < ATTEMPT_NO_RETRIES =>
            {
                retries += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SummaryCompletion<'a> {
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub latency_ms: Option<i32>,
    pub finished_at: DateTime<Utc>,
}

/// Persist the summary row and flip the reserved attempt to `succeeded` in
/// one transaction. This flip is the single permitted update of an attempt
/// row after insert.
pub fn record_summary_success(
    conn: &mut PgConnection,
    summary: NewItemSummary<'_>,
    reserved_attempt_id: Option<Uuid>,
    completion: SummaryCompletion<'_>,
) -> Result<DbItemSummary, StoreError> {
    use crate::schema::item_summaries::dsl as summaries_dsl;
    use crate::schema::summary_attempts::dsl as attempts_dsl;

    conn.transaction(|conn| {
        let row = diesel::insert_into(summaries_dsl::item_summaries)
            .values(&summary)
            .returning(DbItemSummary::as_returning())
            .get_result(conn)?;

        if let Some(attempt_id) = reserved_attempt_id {
            diesel::update(attempts_dsl::summary_attempts.filter(attempts_dsl::id.eq(attempt_id)))
                .set((
                    attempts_dsl::status.eq(SummaryAttemptStatus::Succeeded),
                    attempts_dsl::provider.eq(completion.provider),
                    attempts_dsl::model.eq(completion.model),
                    attempts_dsl::latency_ms.eq(completion.latency_ms),
                    attempts_dsl::finished_at.eq(completion.finished_at),
                    attempts_dsl::error_detail.eq(None::<String>),
                ))
                .execute(conn)?;
        }

        Ok(row)
    })
}

/// Best-effort terminal update of a reserved attempt after a failure.
pub fn mark_summary_attempt_failed(
    conn: &mut PgConnection,
    attempt_id: Uuid,
    error_detail: &str,
    finished_at: DateTime<Utc>,
) -> QueryResult<()> {
    use crate::schema::summary_attempts::dsl as attempts_dsl;

    diesel::update(attempts_dsl::summary_attempts.filter(attempts_dsl::id.eq(attempt_id)))
        .set((
            attempts_dsl::status.eq(SummaryAttemptStatus::Failed),
            attempts_dsl::error_detail.eq(error_detail),
            attempts_dsl::finished_at.eq(finished_at),
        ))
        .execute(conn)
        .map(|_| ())
}

/// Ordered summary attempt history for one `(item, tier)` pair.
pub fn summary_attempts_for_item(
    conn: &mut PgConnection,
    item_id: Uuid,
    model_key: ModelKey,
) -> QueryResult<Vec<DbSummaryAttempt>> {
    use crate::schema::summary_attempts::dsl as attempts_dsl;

    attempts_dsl::summary_attempts
        .filter(attempts_dsl::item_id.eq(item_id))
        .filter(attempts_dsl::model_key.eq(model_key))
        .order(attempts_dsl::attempt_no.asc())
        .select(DbSummaryAttempt::as_select())
        .load(conn)
}

/// Summaries persisted for one item, newest first.
pub fn summaries_for_item(
    conn: &mut PgConnection,
    item_id: Uuid,
) -> QueryResult<Vec<DbItemSummary>> {
    use crate::schema::item_summaries::dsl as summaries_dsl;

    summaries_dsl::item_summaries
        .filter(summaries_dsl::item_id.eq(item_id))
        .order(summaries_dsl::created_at.desc())
        .select(DbItemSummary::as_select())
        .load(conn)
}
