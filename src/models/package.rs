use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Catalog item. Not mutated once a member package has been issued from it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionPackage {
    pub id: Uuid,
    pub name: String,
    pub session_count: i32,
    pub base_price_cents: i32,
    pub expiry_days: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionPackage {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let package = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM session_packages WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(package)
    }
}

/// Price override keyed by (package, location) or (package, member).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PackagePriceOverride {
    pub id: Uuid,
    pub package_id: Uuid,
    pub location_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
    pub price_cents: i32,
    pub created_at: DateTime<Utc>,
}

impl PackagePriceOverride {
    pub async fn list_for_package(
        pool: &PgPool,
        package_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let overrides = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM package_price_overrides WHERE package_id = $1
            "#,
        )
        .bind(package_id)
        .fetch_all(pool)
        .await?;

        Ok(overrides)
    }
}

/// Resolves the effective price for a member buying a package at a location.
/// Priority: member override > location override > base price.
pub fn resolve_price(
    package: &SessionPackage,
    overrides: &[PackagePriceOverride],
    member_id: Uuid,
    location_id: Option<Uuid>,
) -> i32 {
    if let Some(o) = overrides.iter().find(|o| o.member_id == Some(member_id)) {
        return o.price_cents;
    }
    if let Some(loc) = location_id {
        if let Some(o) = overrides.iter().find(|o| o.location_id == Some(loc)) {
            return o.price_cents;
        }
    }
    package.base_price_cents
}

/// A purchased credit grant. `sessions_remaining` only changes through the
/// ledger, which appends the matching CreditTransaction in the same
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MemberPackage {
    pub id: Uuid,
    pub member_id: Uuid,
    pub package_id: Uuid,
    pub sessions_total: i32,
    pub sessions_remaining: i32,
    pub price_paid_cents: i32,
    pub purchase_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
}

impl MemberPackage {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let package = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM member_packages WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(package)
    }

    pub async fn list_for_member(
        pool: &PgPool,
        member_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let packages = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM member_packages
            WHERE member_id = $1
            ORDER BY expiry_date ASC
            "#,
        )
        .bind(member_id)
        .fetch_all(pool)
        .await?;

        Ok(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(base: i32) -> SessionPackage {
        SessionPackage {
            id: Uuid::new_v4(),
            name: "10 sessions".to_string(),
            session_count: 10,
            base_price_cents: base,
            expiry_days: 90,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn override_row(
        package_id: Uuid,
        location_id: Option<Uuid>,
        member_id: Option<Uuid>,
        price: i32,
    ) -> PackagePriceOverride {
        PackagePriceOverride {
            id: Uuid::new_v4(),
            package_id,
            location_id,
            member_id,
            price_cents: price,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_base_price_without_overrides() {
        let p = package(12000);
        assert_eq!(resolve_price(&p, &[], Uuid::new_v4(), None), 12000);
    }

    #[test]
    fn test_location_override_beats_base() {
        let p = package(12000);
        let loc = Uuid::new_v4();
        let overrides = vec![override_row(p.id, Some(loc), None, 10000)];
        assert_eq!(
            resolve_price(&p, &overrides, Uuid::new_v4(), Some(loc)),
            10000
        );
        // Different location still pays base
        assert_eq!(
            resolve_price(&p, &overrides, Uuid::new_v4(), Some(Uuid::new_v4())),
            12000
        );
    }

    #[test]
    fn test_member_override_beats_location_override() {
        let p = package(12000);
        let loc = Uuid::new_v4();
        let member = Uuid::new_v4();
        let overrides = vec![
            override_row(p.id, Some(loc), None, 10000),
            override_row(p.id, None, Some(member), 8000),
        ];
        assert_eq!(resolve_price(&p, &overrides, member, Some(loc)), 8000);
    }
}
