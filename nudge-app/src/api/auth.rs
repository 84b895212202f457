use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use uuid::Uuid;

use crate::Db;
use crate::api::error::ApiError;
use crate::config::AppConfig;
use nudge_db::db;

/// The caller's identity: `X-User-Id` when present, the configured dev UUID
/// otherwise. Unknown identities are created on first sight, so every
/// request downstream of this guard can assume the user row exists.
pub struct CurrentUser(pub Uuid);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = ApiError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<AppConfig>() else {
            return Outcome::Error((Status::InternalServerError, ApiError::Internal));
        };

        let user_id = match req.headers().get_one("X-User-Id") {
            Some(raw) => match Uuid::parse_str(raw.trim()) {
                Ok(user_id) => user_id,
                Err(_) => {
                    return Outcome::Error((
                        Status::BadRequest,
                        ApiError::BadRequest("Invalid X-User-Id header (must be a UUID).".into()),
                    ));
                }
            },
            None => config.dev_user_id,
        };

        let db = match req.guard::<Db>().await {
            Outcome::Success(db) => db,
            _ => return Outcome::Error((Status::InternalServerError, ApiError::Internal)),
        };

        match db.run(move |conn| db::ensure_user(conn, user_id)).await {
            Ok(()) => Outcome::Success(CurrentUser(user_id)),
            Err(err) => Outcome::Error((Status::InternalServerError, ApiError::DbError(err))),
        }
    }
}
