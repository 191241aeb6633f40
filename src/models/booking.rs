use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Attended,
    NoShow,
}

/// Links a member (or one of their children) to a class instance and the
/// member package the credit was drawn from. At most one non-cancelled
/// booking exists per (instance, member, child); the store enforces this
/// with a partial unique index.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub class_instance_id: Uuid,
    pub member_id: Uuid,
    pub child_id: Option<Uuid>,
    pub member_package_id: Uuid,
    pub status: BookingStatus,
    pub booked_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub attendance_marked_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let booking = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bookings WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(booking)
    }

    pub async fn list_for_member(
        pool: &PgPool,
        member_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let bookings = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bookings
            WHERE member_id = $1
            ORDER BY booked_at DESC
            "#,
        )
        .bind(member_id)
        .fetch_all(pool)
        .await?;

        Ok(bookings)
    }
}
