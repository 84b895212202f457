mod db_url;
mod migrations;
mod pool;
mod schema;

pub mod cursor;
pub mod db;
pub mod models;

pub use db_url::{database_url_from_environment, with_default_sslmode};
pub use migrations::{MigrationError, run_migrations};
pub use pool::{ConnectionPool, get_pool};

pub use diesel::r2d2::PoolError;
pub use diesel::{Connection, PgConnection};
