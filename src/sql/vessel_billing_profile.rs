//! Billing profile operations for PostgreSQL database.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{SqlResult, log_error};

/// A row of `vessel_billing_profile`. A vessel has at most one live profile.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VesselBillingProfileRecord {
    pub id: Uuid,
    pub vessel_id: Uuid,
    pub company_name: Option<String>,
    pub billing_to: String,
    pub address1: String,
    pub address2: Option<String>,
    pub postal_code: String,
    pub city: String,
    pub state: Option<String>,
    pub country: String,
    pub email: String,
    pub phone: Option<String>,
    pub vat_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BillingFields<'a> {
    pub company_name: Option<&'a str>,
    pub billing_to: &'a str,
    pub address1: &'a str,
    pub address2: Option<&'a str>,
    pub postal_code: &'a str,
    pub city: &'a str,
    pub state: Option<&'a str>,
    pub country: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub vat_number: Option<&'a str>,
}

/// Creates the billing profile of a vessel.
///
/// # Returns
/// * `Ok(VesselBillingProfileRecord)` - The stored profile
/// * `Err(DataStoreError::Constraint("vessel_billing_profile_unique_vessel"))` - The vessel
///   already has one
pub async fn create(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
    fields: &BillingFields<'_>,
) -> SqlResult<VesselBillingProfileRecord> {
    sqlx::query_as::<_, VesselBillingProfileRecord>(
        r#"
        INSERT INTO vessel_billing_profile
            (id, vessel_id, company_name, billing_to, address1, address2, postal_code, city,
             state, country, email, phone, vat_number)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING id, vessel_id, company_name, billing_to, address1, address2, postal_code,
                  city, state, country, email, phone, vat_number, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(vessel_id)
    .bind(fields.company_name)
    .bind(fields.billing_to)
    .bind(fields.address1)
    .bind(fields.address2)
    .bind(fields.postal_code)
    .bind(fields.city)
    .bind(fields.state)
    .bind(fields.country)
    .bind(fields.email)
    .bind(fields.phone)
    .bind(fields.vat_number)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("creating billing profile", e))
}

/// Retrieves the live billing profile of a vessel.
pub async fn get(
    tx: &mut Transaction<'_, Postgres>,
    vessel_id: Uuid,
) -> SqlResult<VesselBillingProfileRecord> {
    sqlx::query_as::<_, VesselBillingProfileRecord>(
        r#"
        SELECT id, vessel_id, company_name, billing_to, address1, address2, postal_code,
               city, state, country, email, phone, vat_number, created_at
        FROM vessel_billing_profile
        WHERE vessel_id = $1 AND (deleted_at IS NULL OR deleted_at > now())
        "#,
    )
    .bind(vessel_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| log_error("getting billing profile", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataStoreError;
    use crate::sql::tests::{seed, setup_test_db};

    #[tokio::test]
    async fn one_profile_per_vessel() {
        let Some(pool) = setup_test_db().await else {
            return;
        };
        let fixture = seed(&pool, "billing@example.com").await;
        let mut tx = pool.begin().await.unwrap();
        assert_eq!(
            get(&mut tx, fixture.vessel_id).await.unwrap_err(),
            DataStoreError::NotFound
        );
        let fields = BillingFields {
            billing_to: "Ada Lovelace",
            address1: "12 Analytical Row",
            postal_code: "10115",
            city: "Berlin",
            country: "DE",
            email: "invoices@example.com",
            ..BillingFields::default()
        };
        let profile = create(&mut tx, fixture.vessel_id, &fields).await.unwrap();
        assert_eq!(get(&mut tx, fixture.vessel_id).await.unwrap(), profile);

        assert_eq!(
            create(&mut tx, fixture.vessel_id, &fields)
                .await
                .unwrap_err(),
            DataStoreError::Constraint("vessel_billing_profile_unique_vessel".to_string())
        );
    }
}
