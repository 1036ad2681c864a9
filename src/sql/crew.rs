//! Crew operations for PostgreSQL database.
//!
//! A crew row places a user on a vessel with a vessel role; a
//! `crew_charter_member` row additionally gives that crew member a role on
//! one charter.
//!
//! Invited crew carry a random activation salt until they activate; only
//! rows that are `active` and carry `activated_at` count as active crew.

use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};

/// A row of `crew`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CrewRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub user_id: Uuid,
    /// `captain` or `member`.
    pub vessel_role: String,
    /// `invited`, `active` or `suspended`.
    pub status: String,
    /// Empty once the row is activated.
    pub activation_salt: String,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CrewRecord {
    /// Active and activated.
    pub fn is_active(&self) -> bool {
        self.status == "active" && self.activated_at.is_some()
    }
}

/// The fields that must all match for an invited crew row to activate.
#[derive(Debug, Clone, Copy)]
pub struct Activation<'a> {
    pub crew_id: Uuid,
    pub vessel_id: Uuid,
    pub user_id: Uuid,
    pub activation_salt: &'a str,
}

fn new_activation_salt() -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

/// A charter role held by a crew member, with the charter's vessel.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CharterMembershipRecord {
    pub crew_id: Uuid,
    pub vessel_id: Uuid,
    pub charter_id: Uuid,
    pub charter_role: String,
}

/// Adds a user to a vessel crew.
///
/// Invited rows get a fresh activation salt; rows created `active` are
/// activated immediately.
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    user_id: Uuid,
    vessel_role: &str,
    status: &str,
) -> SqlResult<CrewRecord> {
    let salt = if status == "invited" {
        new_activation_salt()
    } else {
        String::new()
    };
    sqlx::query_as::<_, CrewRecord>(
        r#"
        INSERT INTO crew (id, vessel_id, user_id, vessel_role, status, activation_salt, activated_at)
        VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $5::text = 'active' THEN now() END)
        RETURNING id, vessel_id, user_id, vessel_role, status, activation_salt, activated_at, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vessel_id)
    .bind(user_id)
    .bind(vessel_role)
    .bind(status)
    .bind(salt)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating crew", e))
}

/// Activates an invited, not yet activated crew row and clears its salt.
///
/// # Returns
/// * `Ok(CrewRecord)` - The activated row
/// * `Err(DataStoreError::NotFound)` - No invited row matched every field
pub async fn activate(
    tx: &mut Transaction<'_, Postgres>,
    activation: &Activation<'_>,
) -> SqlResult<CrewRecord> {
    sqlx::query_as::<_, CrewRecord>(
        r#"
        UPDATE crew
        SET activated_at = now(), activation_salt = '', status = 'active'
        WHERE id = $1 AND vessel_id = $2 AND user_id = $3
          AND activation_salt = $4 AND activation_salt <> ''
          AND status = 'invited' AND activated_at IS NULL
          AND (deleted_at IS NULL OR deleted_at > now())
        RETURNING id, vessel_id, user_id, vessel_role, status, activation_salt, activated_at, created_at
        "#,
    )
    .bind(activation.crew_id)
    .bind(activation.vessel_id)
    .bind(activation.user_id)
    .bind(activation.activation_salt)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("activating crew", e))
}

/// Lists the live crew rows of a user across vessels.
pub async fn list_by_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> SqlResult<Vec<CrewRecord>> {
    sqlx::query_as::<_, CrewRecord>(
        r#"
        SELECT id, vessel_id, user_id, vessel_role, status, activation_salt, activated_at, created_at
        FROM crew
        WHERE user_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        ORDER BY created_at, id
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing crew of user", e))
}

/// Gives a crew member a role on a charter.
pub async fn add_charter_member(
    tx: &mut Transaction<'_, Postgres>,
    crew_id: Uuid,
    charter_id: Uuid,
    charter_role: &str,
) -> SqlResult<()> {
    sqlx::query(
        r#"
        INSERT INTO crew_charter_member (id, crew_id, charter_id, charter_role)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(crew_id)
    .bind(charter_id)
    .bind(charter_role)
    .execute(&mut **tx)
    .await
    .map_err(|e| log_error("adding charter member", e))?;
    Ok(())
}

/// Lists the charter roles of a crew row on live charters.
pub async fn list_charter_memberships(
    tx: &mut Transaction<'_, Postgres>,
    crew_id: Uuid,
) -> SqlResult<Vec<CharterMembershipRecord>> {
    sqlx::query_as::<_, CharterMembershipRecord>(
        r#"
        SELECT m.crew_id, c.vessel_id, m.charter_id, m.charter_role
        FROM crew_charter_member m
        JOIN charters c ON c.id = m.charter_id
        WHERE m.crew_id = $1 AND (c.deleted_at IS NULL OR c.deleted_at > now())
        ORDER BY m.created_at, m.id
        "#,
    )
    .bind(crew_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| log_error("listing charter memberships", e))
}
