pub mod auth;
pub mod error;
pub mod items;

use rocket::serde::json::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[rocket::get("/health")]
pub fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub fn routes() -> Vec<rocket::Route> {
    rocket::routes![
        health,
        items::create_item,
        items::list_items,
        items::get_item,
        items::patch_item_text,
        items::create_item_summary,
    ]
}
