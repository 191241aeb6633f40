use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A recurring weekly rule. Base rules have no override range; override
/// rules carry `[override_start_date, override_end_date]` and take
/// precedence over base rules for the same (location, day, start time)
/// within that range.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassSchedule {
    pub id: Uuid,
    pub location_id: Uuid,
    pub class_type_id: Uuid,
    pub coach_id: Uuid,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub capacity: i32,
    pub is_active: bool,
    pub override_start_date: Option<NaiveDate>,
    pub override_end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl ClassSchedule {
    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let schedules = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM class_schedules WHERE is_active = TRUE
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(schedules)
    }

    pub fn is_override(&self) -> bool {
        self.override_start_date.is_some()
    }

    /// Whether this override rule covers the given date. Base rules cover
    /// every date.
    pub fn covers(&self, date: NaiveDate) -> bool {
        match (self.override_start_date, self.override_end_date) {
            (Some(start), Some(end)) => start <= date && date <= end,
            _ => true,
        }
    }

    /// Whether this rule occupies the same weekly slot as `other`.
    pub fn same_slot(&self, other: &ClassSchedule) -> bool {
        self.location_id == other.location_id
            && self.day_of_week == other.day_of_week
            && self.start_time == other.start_time
    }
}
