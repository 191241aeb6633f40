use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Booking,
    Refund,
    Expiry,
}

/// Immutable ledger entry. Every member-package balance change produces
/// exactly one of these, in the same transaction as the balance update.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub member_package_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub credits_change: i32,
    pub balance_after: i32,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub async fn list_for_package(
        pool: &PgPool,
        member_package_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let transactions = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM credit_transactions
            WHERE member_package_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(member_package_id)
        .fetch_all(pool)
        .await?;

        Ok(transactions)
    }
}
