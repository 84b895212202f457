use std::time::Duration;

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PoolError};

pub type ConnectionPool = Pool<ConnectionManager<PgConnection>>;

/// A deliberately small pool tuned for serverless Postgres: no burst beyond
/// `max_size`, a liveness check before every checkout, and periodic recycling
/// of long-lived connections. Callers must not hold a connection across
/// network I/O.
pub fn get_pool(max_size: u32) -> Result<ConnectionPool, PoolError> {
    let manager = ConnectionManager::new(crate::database_url_from_environment());

    Pool::builder()
        .max_size(max_size)
        .test_on_check_out(true)
        .max_lifetime(Some(Duration::from_secs(300)))
        .connection_timeout(Duration::from_secs(30))
        .build(manager)
}
