//! The HTTP facade: request/response mapping over the store, plus the
//! on-demand summary engine. All state transitions and persistence live in
//! `nudge-db`; handlers validate, delegate, and translate errors to status
//! codes.

pub mod api;
pub mod config;
pub mod llm;
pub mod summary;

use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, figment};
use rocket_sync_db_pools::database as sync_database;

use crate::config::{AppConfig, LlmConfig};
use crate::llm::ModelRegistry;

#[sync_database("nudge")]
pub struct Db(diesel::PgConnection);

fn figment_with_constructed_db_url() -> figment::Figment {
    let url = nudge_db::database_url_from_environment();
    rocket::Config::figment()
        .merge(("databases.nudge.url", url))
        // Small fixed pool, sized for serverless Postgres.
        .merge(("databases.nudge.pool_size", 2))
}

async fn run_app_migrations(rocket: Rocket<Build>) -> Rocket<Build> {
    let config: rocket_sync_db_pools::Config = rocket
        .figment()
        .extract_inner("databases.nudge")
        .expect("nudge database connection information was not found in the figment");

    tokio::task::spawn_blocking(move || {
        nudge_db::run_migrations(&config.url).expect("Failed to apply migrations");
    })
    .await
    .expect("Error joining migrations task");

    rocket
}

pub fn build_rocket() -> Rocket<Build> {
    let app_config = AppConfig::config().expect("app configuration invalid");
    let llm_config = LlmConfig::config().expect("LLM configuration invalid");
    let registry = ModelRegistry::from_config(&llm_config).expect("LLM default model key invalid");

    rocket::custom(figment_with_constructed_db_url())
        .mount("/", api::routes())
        .attach(Db::fairing())
        .attach(AdHoc::on_ignite("Migrations", run_app_migrations))
        .manage(app_config)
        .manage(registry)
}
