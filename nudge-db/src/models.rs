use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::io::Write;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::schema::{
    extraction_attempts, item_content, item_summaries, items, sql_types, summary_attempts, users,
};

/// Emits the Postgres side of an enum mapping. The wire representation is the
/// strum snake_case string on both directions.
macro_rules! pg_enum_mapping {
    ($rust_type:ty, $sql_type:ty) => {
        impl ToSql<$sql_type, Pg> for $rust_type {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_ref().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<$sql_type, Pg> for $rust_type {
            fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
                Ok(std::str::from_utf8(value.as_bytes())?.parse()?)
            }
        }
    };
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[diesel(sql_type = sql_types::ItemStatus)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Processing,
    NeedsUserText,
    Succeeded,
    Failed,
}

pg_enum_mapping!(ItemStatus, sql_types::ItemStatus);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[diesel(sql_type = sql_types::ItemSourceType)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemSourceType {
    Url,
    PastedText,
}

pg_enum_mapping!(ItemSourceType, sql_types::ItemSourceType);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[diesel(sql_type = sql_types::ItemFinalTextSource)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemFinalTextSource {
    ExtractedFromUrl,
    UserPastedText,
}

pg_enum_mapping!(ItemFinalTextSource, sql_types::ItemFinalTextSource);

/// Cost/quality band for summary generation. Stored as `text` with a CHECK
/// constraint rather than a native enum so attempt history survives future
/// tier renames.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[diesel(sql_type = Text)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ModelKey {
    Strong,
    Mid,
    Budget,
}

pg_enum_mapping!(ModelKey, Text);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[diesel(sql_type = Text)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Success,
    Error,
}

pg_enum_mapping!(AttemptResult, Text);

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    AsExpression,
    FromSqlRow,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[diesel(sql_type = Text)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SummaryAttemptStatus {
    Succeeded,
    Failed,
}

pg_enum_mapping!(SummaryAttemptStatus, Text);

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbUser {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = items)]
pub struct NewItem<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: ItemStatus,
    pub status_detail: Option<&'a str>,
    pub source_type: ItemSourceType,
    pub requested_url: Option<&'a str>,
    pub final_text_source: Option<ItemFinalTextSource>,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: ItemStatus,
    pub status_detail: Option<String>,
    pub source_type: ItemSourceType,
    pub requested_url: Option<String>,
    pub final_text_source: Option<ItemFinalTextSource>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = item_content)]
pub struct NewItemContent<'a> {
    pub item_id: Uuid,
    pub user_pasted_text: Option<&'a str>,
    pub extracted_text: Option<&'a str>,
    pub canonical_text: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = item_content)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbItemContent {
    pub item_id: Uuid,
    pub user_pasted_text: Option<String>,
    pub extracted_text: Option<String>,
    pub canonical_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = extraction_attempts)]
pub struct NewExtractionAttempt<'a> {
    pub id: Uuid,
    pub item_id: Uuid,
    pub attempt_no: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: AttemptResult,
    pub error_code: Option<&'a str>,
    pub error_detail: Option<&'a str>,
    pub http_status: Option<i32>,
    pub final_url: Option<&'a str>,
    pub content_length: Option<i32>,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = extraction_attempts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbExtractionAttempt {
    pub id: Uuid,
    pub item_id: Uuid,
    pub attempt_no: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: AttemptResult,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
    pub http_status: Option<i32>,
    pub final_url: Option<String>,
    pub content_length: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = item_summaries)]
pub struct NewItemSummary<'a> {
    pub id: Uuid,
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub model_key: ModelKey,
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub prompt_version: &'a str,
    pub input_chars_original: i32,
    pub input_chars_used: i32,
    pub output_words: i32,
    pub summary_text: &'a str,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = item_summaries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbItemSummary {
    pub id: Uuid,
    pub item_id: Uuid,
    pub user_id: Uuid,
    pub model_key: ModelKey,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_version: String,
    pub input_chars_original: i32,
    pub input_chars_used: i32,
    pub output_words: i32,
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = summary_attempts)]
pub struct NewSummaryAttempt<'a> {
    pub id: Uuid,
    pub item_id: Uuid,
    pub attempt_no: i32,
    pub model_key: ModelKey,
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub prompt_version: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SummaryAttemptStatus,
    pub error_detail: Option<&'a str>,
    pub latency_ms: Option<i32>,
}

#[derive(Debug, Clone, Identifiable, Queryable, Selectable)]
#[diesel(table_name = summary_attempts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DbSummaryAttempt {
    pub id: Uuid,
    pub item_id: Uuid,
    pub attempt_no: i32,
    pub model_key: ModelKey,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SummaryAttemptStatus,
    pub error_detail: Option<String>,
    pub latency_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_status_round_trips_through_wire_strings() {
        for (status, wire) in [
            (ItemStatus::Queued, "queued"),
            (ItemStatus::Processing, "processing"),
            (ItemStatus::NeedsUserText, "needs_user_text"),
            (ItemStatus::Succeeded, "succeeded"),
            (ItemStatus::Failed, "failed"),
        ] {
            assert_eq!(status.as_ref(), wire);
            assert_eq!(wire.parse::<ItemStatus>().unwrap(), status);
        }
    }

    #[test]
    fn source_and_text_source_wire_strings() {
        assert_eq!(ItemSourceType::Url.as_ref(), "url");
        assert_eq!(ItemSourceType::PastedText.as_ref(), "pasted_text");
        assert_eq!(
            ItemFinalTextSource::ExtractedFromUrl.as_ref(),
            "extracted_from_url"
        );
        assert_eq!(
            ItemFinalTextSource::UserPastedText.as_ref(),
            "user_pasted_text"
        );
    }

    #[test]
    fn model_key_parses_case_sensitively_snake_case() {
        assert_eq!("strong".parse::<ModelKey>().unwrap(), ModelKey::Strong);
        assert_eq!("mid".parse::<ModelKey>().unwrap(), ModelKey::Mid);
        assert_eq!("budget".parse::<ModelKey>().unwrap(), ModelKey::Budget);
        assert!("nope".parse::<ModelKey>().is_err());
        assert!("".parse::<ModelKey>().is_err());
    }

    #[test]
    fn unknown_status_strings_are_rejected() {
        assert!("sleeping".parse::<ItemStatus>().is_err());
    }
}
