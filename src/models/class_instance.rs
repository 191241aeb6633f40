use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One concrete class occurrence. Created by the schedule generator or
/// manually by an admin; `schedule_id` back-references the generating rule.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassInstance {
    pub id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub location_id: Uuid,
    pub class_type_id: Uuid,
    pub coach_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    pub is_cancelled: bool,
    pub created_at: DateTime<Utc>,
}

impl ClassInstance {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let instance = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM class_instances WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(instance)
    }

    pub async fn list_upcoming_at_location(
        pool: &PgPool,
        location_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let instances = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM class_instances
            WHERE location_id = $1 AND start_time > NOW() AND is_cancelled = FALSE
            ORDER BY start_time ASC
            "#,
        )
        .bind(location_id)
        .fetch_all(pool)
        .await?;

        Ok(instances)
    }
}
