use chrono::{DateTime, Utc};
use log::warn;
use rocket::State;
use rocket::serde::json::{self, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Db;
use crate::api::auth::CurrentUser;
use crate::api::error::ApiError;
use crate::config::AppConfig;
use crate::llm::ModelRegistry;
use crate::summary::generate_item_summary;
use nudge_db::cursor::PageCursor;
use nudge_db::db::{self, ItemSubmission};
use nudge_db::models::{DbItem, DbItemContent, ItemFinalTextSource, ItemSourceType, ItemStatus};

const URL_MAX_CHARS: usize = 4096;
const PASTED_TEXT_MAX_CHARS: usize = 200_000;
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ItemCreateRequest {
    pub url: Option<String>,
    pub pasted_text: Option<String>,
    #[serde(default)]
    pub prefer_pasted_text: bool,
}

#[derive(Debug, Serialize)]
pub struct ItemCreateResponse {
    pub id: Uuid,
    pub status: ItemStatus,
}

#[derive(Debug, Serialize)]
pub struct ItemListEntry {
    pub id: Uuid,
    pub status: ItemStatus,
    pub status_detail: Option<String>,
    pub source_type: ItemSourceType,
    pub requested_url: Option<String>,
    pub final_text_source: Option<ItemFinalTextSource>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbItem> for ItemListEntry {
    fn from(item: DbItem) -> Self {
        Self {
            id: item.id,
            status: item.status,
            status_detail: item.status_detail,
            source_type: item.source_type,
            requested_url: item.requested_url,
            final_text_source: item.final_text_source,
            title: item.title,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemListResponse {
    pub items: Vec<ItemListEntry>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemContentOut {
    pub user_pasted_text: Option<String>,
    pub extracted_text: Option<String>,
    pub canonical_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbItemContent> for ItemContentOut {
    fn from(content: DbItemContent) -> Self {
        Self {
            user_pasted_text: content.user_pasted_text,
            extracted_text: content.extracted_text,
            canonical_text: content.canonical_text,
            updated_at: content.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemDetailResponse {
    pub id: Uuid,
    pub status: ItemStatus,
    pub status_detail: Option<String>,
    pub source_type: ItemSourceType,
    pub requested_url: Option<String>,
    pub final_text_source: Option<ItemFinalTextSource>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content: Option<ItemContentOut>,
}

impl ItemDetailResponse {
    fn new(item: DbItem, content: Option<ItemContentOut>) -> Self {
        Self {
            id: item.id,
            status: item.status,
            status_detail: item.status_detail,
            source_type: item.source_type,
            requested_url: item.requested_url,
            final_text_source: item.final_text_source,
            title: item.title,
            created_at: item.created_at,
            updated_at: item.updated_at,
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ItemTextPatchRequest {
    pub pasted_text: String,
}

fn validate_create(body: &ItemCreateRequest) -> Result<(), ApiError> {
    if body.url.is_none() && body.pasted_text.is_none() {
        return Err(ApiError::BadRequest(
            "Require at least one of url or pasted_text.".to_string(),
        ));
    }

    if let Some(url) = &body.url {
        let chars = url.chars().count();
        if chars == 0 || chars > URL_MAX_CHARS {
            return Err(ApiError::BadRequest(format!(
                "url must be between 1 and {URL_MAX_CHARS} characters."
            )));
        }
    }

    if let Some(text) = &body.pasted_text {
        let chars = text.chars().count();
        if chars == 0 || chars > PASTED_TEXT_MAX_CHARS {
            return Err(ApiError::BadRequest(format!(
                "pasted_text must be between 1 and {PASTED_TEXT_MAX_CHARS} characters."
            )));
        }
    }

    Ok(())
}

enum CreatePath {
    Paste(String),
    Url { url: String, fallback: Option<String> },
}

#[rocket::post("/items", data = "<body>")]
pub async fn create_item(
    db: Db,
    user: CurrentUser,
    config: &State<AppConfig>,
    body: Result<Json<ItemCreateRequest>, json::Error<'_>>,
) -> Result<Json<ItemCreateResponse>, ApiError> {
    let body = body
        .map_err(|err| ApiError::BadRequest(format!("Invalid request body: {err}")))?
        .into_inner();
    validate_create(&body)?;

    // Paste wins when the caller prefers it or there is no url to fetch;
    // otherwise the url is queued and any pasted text rides along as
    // fallback input.
    let path = if let Some(text) = body
        .pasted_text
        .as_ref()
        .filter(|_| body.prefer_pasted_text || body.url.is_none())
    {
        CreatePath::Paste(text.clone())
    } else if let Some(url) = &body.url {
        CreatePath::Url {
            url: url.clone(),
            fallback: body.pasted_text.clone(),
        }
    } else {
        return Err(ApiError::BadRequest(
            "Require at least one of url or pasted_text.".to_string(),
        ));
    };

    let CurrentUser(user_id) = user;
    let item = db
        .run(move |conn| {
            let submission = match &path {
                CreatePath::Paste(text) => ItemSubmission::PastedText { text: text.as_str() },
                CreatePath::Url { url, fallback } => ItemSubmission::Url {
                    url: url.as_str(),
                    pasted_fallback: fallback.as_deref(),
                },
            };
            db::create_item(conn, user_id, submission)
        })
        .await?;

    // Dev convenience: give the worker a fire-and-forget kick so a freshly
    // queued link gets picked up without waiting for the poll interval.
    // Production runs the worker as its own process and never relies on this.
    if config.environment == "dev" {
        spawn_dev_worker_nudge();
    }

    Ok(Json(ItemCreateResponse {
        id: item.id,
        status: item.status,
    }))
}

fn spawn_dev_worker_nudge() {
    rocket::tokio::spawn(async {
        match nudge_ingest::WorkerConfig::config() {
            Ok(config) => {
                if let Err(err) = nudge_ingest::run_once(&config).await {
                    warn!("dev worker nudge failed: {err}");
                }
            }
            Err(err) => warn!("dev worker nudge skipped, invalid worker config: {err}"),
        }
    });
}

#[rocket::get("/items?<limit>&<cursor>")]
pub async fn list_items(
    db: Db,
    user: CurrentUser,
    limit: Option<i64>,
    cursor: Option<String>,
) -> Result<Json<ItemListResponse>, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}."
        )));
    }

    let cursor = cursor
        .map(|raw| {
            raw.parse::<PageCursor>()
                .map_err(|_| ApiError::BadRequest("Invalid cursor.".to_string()))
        })
        .transpose()?;

    let CurrentUser(user_id) = user;
    let (items, next_cursor) = db
        .run(move |conn| db::list_items(conn, user_id, limit, cursor))
        .await?;

    Ok(Json(ItemListResponse {
        items: items.into_iter().map(ItemListEntry::from).collect(),
        next_cursor: next_cursor.map(|cursor| cursor.to_string()),
    }))
}

#[rocket::get("/items/<id>?<include_content>")]
pub async fn get_item(
    db: Db,
    user: CurrentUser,
    id: Uuid,
    include_content: Option<bool>,
) -> Result<Json<ItemDetailResponse>, ApiError> {
    let include_content = include_content.unwrap_or(false);
    let CurrentUser(user_id) = user;

    let detail = db
        .run(move |conn| -> Result<ItemDetailResponse, ApiError> {
            let item = db::get_item(conn, id, user_id)?.ok_or(ApiError::NotFound)?;
            let content = if include_content {
                db::get_item_content(conn, id)?.map(ItemContentOut::from)
            } else {
                None
            };
            Ok(ItemDetailResponse::new(item, content))
        })
        .await?;

    Ok(Json(detail))
}

#[rocket::patch("/items/<id>/text", data = "<body>")]
pub async fn patch_item_text(
    db: Db,
    user: CurrentUser,
    id: Uuid,
    body: Result<Json<ItemTextPatchRequest>, json::Error<'_>>,
) -> Result<Json<ItemDetailResponse>, ApiError> {
    let body = body
        .map_err(|err| ApiError::BadRequest(format!("Invalid request body: {err}")))?
        .into_inner();

    let chars = body.pasted_text.chars().count();
    if chars == 0 || chars > PASTED_TEXT_MAX_CHARS {
        return Err(ApiError::BadRequest(format!(
            "pasted_text must be between 1 and {PASTED_TEXT_MAX_CHARS} characters."
        )));
    }

    let CurrentUser(user_id) = user;
    let detail = db
        .run(move |conn| -> Result<ItemDetailResponse, ApiError> {
            let item = db::patch_item_text(conn, id, user_id, &body.pasted_text)?;
            let content = db::get_item_content(conn, id)?.map(ItemContentOut::from);
            Ok(ItemDetailResponse::new(item, content))
        })
        .await?;

    Ok(Json(detail))
}

// The summary body is plain text, not JSON; `String` responds as
// `text/plain`.
#[rocket::post("/items/<id>/summary?<model_key>")]
pub async fn create_item_summary(
    db: Db,
    user: CurrentUser,
    registry: &State<ModelRegistry>,
    id: Uuid,
    model_key: Option<String>,
) -> Result<String, ApiError> {
    let CurrentUser(user_id) = user;
    let text = generate_item_summary(&db, registry, id, user_id, model_key).await?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        url: Option<&str>,
        pasted_text: Option<&str>,
        prefer_pasted_text: bool,
    ) -> ItemCreateRequest {
        ItemCreateRequest {
            url: url.map(str::to_string),
            pasted_text: pasted_text.map(str::to_string),
            prefer_pasted_text,
        }
    }

    #[test]
    fn create_requires_url_or_pasted_text() {
        assert!(validate_create(&request(None, None, false)).is_err());
        assert!(validate_create(&request(Some("https://example.com"), None, false)).is_ok());
        assert!(validate_create(&request(None, Some("text"), false)).is_ok());
    }

    #[test]
    fn create_enforces_field_length_bounds() {
        let long_url = "x".repeat(4097);
        assert!(validate_create(&request(Some(&long_url), None, false)).is_err());
        assert!(validate_create(&request(Some(""), None, false)).is_err());

        let long_text = "x".repeat(200_001);
        assert!(validate_create(&request(None, Some(&long_text), false)).is_err());
        assert!(validate_create(&request(None, Some(""), false)).is_err());

        let max_url = "x".repeat(4096);
        assert!(validate_create(&request(Some(&max_url), None, false)).is_ok());
    }

    #[test]
    fn prefer_pasted_text_defaults_to_false_in_json() {
        let body: ItemCreateRequest =
            serde_json::from_str(r#"{"url": "https://example.com"}"#).unwrap();
        assert!(!body.prefer_pasted_text);
        assert_eq!(body.url.as_deref(), Some("https://example.com"));
        assert_eq!(body.pasted_text, None);
    }
}
