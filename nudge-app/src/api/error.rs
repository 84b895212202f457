use log::error;
use miette::Diagnostic;
use rocket::Request;
use rocket::http::{ContentType, Status};
use rocket::response::{Responder, Response};
use thiserror::Error;

use crate::llm::SummaryModelError;
use crate::summary::SummaryError;
use nudge_db::db::StoreError;

#[derive(Debug, Error, Diagnostic)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Item not found.")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    DbError(#[from] diesel::result::Error),

    #[error("Summary generation failed.")]
    SummaryGeneration(#[source] SummaryModelError),

    #[error("Internal error.")]
    Internal,
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::NotFound => Status::NotFound,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::DbError(_) | ApiError::SummaryGeneration(_) | ApiError::Internal => {
                Status::InternalServerError
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ItemNotFound => ApiError::NotFound,
            StoreError::StateConflict(detail) => ApiError::Conflict(detail.to_string()),
            StoreError::Query(err) => ApiError::DbError(err),
        }
    }
}

impl From<SummaryError> for ApiError {
    fn from(err: SummaryError) -> Self {
        match err {
            SummaryError::InvalidModelKey => ApiError::BadRequest("Invalid model_key".to_string()),
            SummaryError::ItemNotFound => ApiError::NotFound,
            SummaryError::NotReady(detail) => ApiError::Conflict(detail.to_string()),
            SummaryError::Query(err) => ApiError::DbError(err),
            SummaryError::Generation(err) => ApiError::SummaryGeneration(err),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status == Status::InternalServerError {
            error!("{:#?}", self);
        }

        let rendered = serde_json::json!({ "detail": self.to_string() }).to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(rendered.len(), std::io::Cursor::new(rendered))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_taxonomy() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            Status::BadRequest
        );
        assert_eq!(ApiError::NotFound.status(), Status::NotFound);
        assert_eq!(ApiError::Conflict("x".into()).status(), Status::Conflict);
        assert_eq!(ApiError::Internal.status(), Status::InternalServerError);
    }

    #[test]
    fn store_errors_map_onto_api_statuses() {
        assert_eq!(
            ApiError::from(StoreError::ItemNotFound).status(),
            Status::NotFound
        );
        assert_eq!(
            ApiError::from(StoreError::StateConflict("nope")).status(),
            Status::Conflict
        );
    }

    #[test]
    fn summary_errors_map_onto_api_statuses() {
        assert_eq!(
            ApiError::from(SummaryError::InvalidModelKey).status(),
            Status::BadRequest
        );
        assert_eq!(
            ApiError::from(SummaryError::ItemNotFound).status(),
            Status::NotFound
        );
        assert_eq!(
            ApiError::from(SummaryError::NotReady("not yet")).status(),
            Status::Conflict
        );
    }
}
