pub mod models;

use sqlx::{PgPool, migrate::MigrateError, postgres::PgPoolOptions};

/// Default number of PostgreSQL connections in the pool.
/// Can be overridden via the `NESTBOOK_PG_MAX_CONNECTIONS` environment variable.
const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Gets the maximum number of PostgreSQL connections from the environment.
///
/// Reads from `NESTBOOK_PG_MAX_CONNECTIONS`. If not set or invalid, returns
/// the default of 20 connections.
pub fn get_max_connections() -> u32 {
    std::env::var("NESTBOOK_PG_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}

pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(get_max_connections())
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    // These tests mutate process-wide environment variables, so they are
    // serialized and restore the prior value on exit.

    #[test]
    #[serial]
    fn max_connections_respects_env_var() {
        let original = std::env::var("NESTBOOK_PG_MAX_CONNECTIONS").ok();
        unsafe { std::env::set_var("NESTBOOK_PG_MAX_CONNECTIONS", "7") };

        assert_eq!(get_max_connections(), 7);

        unsafe {
            match original {
                Some(val) => std::env::set_var("NESTBOOK_PG_MAX_CONNECTIONS", val),
                None => std::env::remove_var("NESTBOOK_PG_MAX_CONNECTIONS"),
            }
        }
    }

    #[test]
    #[serial]
    fn max_connections_falls_back_on_garbage() {
        let original = std::env::var("NESTBOOK_PG_MAX_CONNECTIONS").ok();
        unsafe { std::env::set_var("NESTBOOK_PG_MAX_CONNECTIONS", "zero") };

        assert_eq!(get_max_connections(), DEFAULT_MAX_CONNECTIONS);

        unsafe {
            match original {
                Some(val) => std::env::set_var("NESTBOOK_PG_MAX_CONNECTIONS", val),
                None => std::env::remove_var("NESTBOOK_PG_MAX_CONNECTIONS"),
            }
        }
    }
}
