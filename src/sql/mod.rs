//! PostgreSQL database operations for galley.
//!
//! One module per table. Every function runs inside the caller's transaction
//! and treats a row as live when `deleted_at IS NULL OR deleted_at > now()`.

use crate::DataStoreError;

/// Result type for database operations.
pub type SqlResult<T> = Result<T, DataStoreError>;

/// User accounts.
pub mod user;

/// Vessels, the top-level tenant.
pub mod vessel;

/// Vessel crew and their charter memberships.
pub mod crew;

/// Refresh-token sessions.
pub mod session;

/// Charters within a vessel.
pub mod charter;

/// Projects within a charter.
pub mod project;

/// Compute plans within a charter.
pub mod compute_plan;

/// OAuth connections, their credentials and grants.
pub mod oauth_connection;

/// Vessel engines and their agent connection state.
pub mod vessel_engine;

/// Regions nodes of an engine are placed in.
pub mod vessel_engine_region;

/// Nodes of a vessel engine.
pub mod vessel_engine_node;

/// A vessel's billing profile.
pub mod vessel_billing_profile;

/// Logs and converts a sqlx error.
pub(crate) fn log_error(context: &'static str, e: sqlx::Error) -> DataStoreError {
    let err = DataStoreError::from(e);
    match &err {
        DataStoreError::NotFound | DataStoreError::Constraint(_) => {
            tracing::debug!(%err, "{}", context);
        }
        _ => tracing::error!(%err, "{}", context),
    }
    err
}

#[cfg(test)]
/// Test utilities for PostgreSQL database operations.
pub mod tests {
    use sqlx::PgPool;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    use super::{charter, crew, user, vessel, vessel_engine};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    /// Creates a unique test database for each test invocation.
    ///
    /// Returns `None` when `TEST_DATABASE_URL` is unset so database tests
    /// skip on machines without Postgres.
    ///
    /// The database is created by:
    /// 1. Connecting to the base database URL
    /// 2. Creating a new database with a unique name
    /// 3. Running migrations on the new database
    /// 4. Returning a connection pool to the new database
    pub async fn setup_test_db() -> Option<PgPool> {
        let Ok(base_url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL is unset; skipping database test");
            return None;
        };

        let pid = std::process::id();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_name = format!("galley_test_{}_{}_{}", pid, timestamp, counter);

        let mut parsed_url = url::Url::parse(&base_url).expect("Invalid database URL");

        let admin_pool = PgPool::connect(&base_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::query(&format!("CREATE DATABASE {}", db_name))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test database");

        admin_pool.close().await;

        parsed_url.set_path(&format!("/{}", db_name));
        let test_db_url = parsed_url.as_str();

        let pool = PgPool::connect(test_db_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        Some(pool)
    }

    /// A captain with their vessel, its default engine and one charter.
    pub struct Fixture {
        pub user_id: Uuid,
        pub vessel_id: Uuid,
        pub engine_id: Uuid,
        pub crew_id: Uuid,
        pub charter_id: Uuid,
    }

    /// Seeds an activated user, a vessel captained by them with its default
    /// engine, and a charter.
    pub async fn seed(pool: &PgPool, email: &str) -> Fixture {
        let mut tx = pool.begin().await.unwrap();
        let user = user::create(&mut tx, email, Some("Ada"), Some("Lovelace"))
            .await
            .unwrap();
        let vessel = vessel::create(&mut tx, "Endeavour", user.id).await.unwrap();
        let engine = vessel_engine::create(&mut tx, vessel.id, vessel_engine::DEFAULT_ENGINE_NAME)
            .await
            .unwrap();
        let crew = crew::create(&mut tx, vessel.id, user.id, "captain", "active")
            .await
            .unwrap();
        let charter = charter::create(&mut tx, vessel.id, "Survey", None, user.id)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        Fixture {
            user_id: user.id,
            vessel_id: vessel.id,
            engine_id: engine.id,
            crew_id: crew.id,
            charter_id: charter.id,
        }
    }
}
