use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{ClassInstance, ClassSchedule};

#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    #[error("Invalid horizon: {0}")]
    InvalidHorizon(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Default, Serialize)]
pub struct GenerationStats {
    pub created: usize,
    pub adopted: usize,
    pub skipped: usize,
}

/// One concrete occurrence a schedule rule produces inside the horizon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOccurrence {
    pub schedule_id: Uuid,
    pub location_id: Uuid,
    pub class_type_id: Uuid,
    pub coach_id: Uuid,
    pub capacity: i32,
    pub start: DateTime<Utc>,
    pub from_override: bool,
}

/// Expands active schedule rules into planned occurrences over
/// `[today, horizon_end]`.
///
/// Base rules walk the whole horizon but yield nothing on dates where an
/// override rule occupies the same (location, day, start time) slot and
/// its date range covers the date. Override rules walk only their range,
/// clamped to the horizon.
pub fn expand_schedules(
    schedules: &[ClassSchedule],
    today: NaiveDate,
    horizon_end: NaiveDate,
) -> Vec<PlannedOccurrence> {
    let (overrides, bases): (Vec<&ClassSchedule>, Vec<&ClassSchedule>) =
        schedules.iter().partition(|s| s.is_override());

    let mut planned = Vec::new();

    for base in &bases {
        let mut date = today;
        while date <= horizon_end {
            if weekday_number(date) == base.day_of_week
                && !overrides
                    .iter()
                    .any(|o| o.same_slot(base) && o.covers(date))
            {
                planned.push(occurrence_on(base, date, false));
            }
            date += Duration::days(1);
        }
    }

    for rule in &overrides {
        let (Some(range_start), Some(range_end)) =
            (rule.override_start_date, rule.override_end_date)
        else {
            continue;
        };

        let mut date = range_start.max(today);
        let end = range_end.min(horizon_end);
        while date <= end {
            if weekday_number(date) == rule.day_of_week {
                planned.push(occurrence_on(rule, date, true));
            }
            date += Duration::days(1);
        }
    }

    planned
}

/// Expands all active schedules into class instances from today through
/// `today + months_ahead`. Safe to re-run and safe to run concurrently
/// (cron trigger + manual admin trigger): existing instances are adopted
/// or skipped, and inserts ride the `(location, start_time)` unique key
/// with skip-on-conflict.
#[tracing::instrument(skip(pool))]
pub async fn generate(pool: &PgPool, months_ahead: u32) -> Result<GenerationStats, GenerateError> {
    if months_ahead == 0 || months_ahead > 12 {
        return Err(GenerateError::InvalidHorizon(format!(
            "months_ahead must be between 1 and 12, got {}",
            months_ahead
        )));
    }

    let today = Utc::now().date_naive();
    let horizon_end = today
        .checked_add_months(Months::new(months_ahead))
        .ok_or_else(|| GenerateError::InvalidHorizon("horizon overflow".to_string()))?;

    let schedules = ClassSchedule::list_active(pool).await?;
    let durations = class_type_durations(pool).await?;

    let planned = expand_schedules(&schedules, today, horizon_end);

    let mut stats = GenerationStats::default();

    for occurrence in planned {
        let Some(&duration_minutes) = durations.get(&occurrence.class_type_id) else {
            tracing::warn!(
                schedule_id = %occurrence.schedule_id,
                class_type_id = %occurrence.class_type_id,
                "Skipping occurrence with unknown class type"
            );
            stats.skipped += 1;
            continue;
        };

        let end = occurrence.start + Duration::minutes(duration_minutes as i64);

        // Dedup probe: anything within a minute of the computed start at
        // this location counts as the same slot.
        let existing = sqlx::query_as::<_, ClassInstance>(
            r#"
            SELECT * FROM class_instances
            WHERE location_id = $1
              AND start_time BETWEEN $2 - INTERVAL '1 minute' AND $2 + INTERVAL '1 minute'
            LIMIT 1
            "#,
        )
        .bind(occurrence.location_id)
        .bind(occurrence.start)
        .fetch_optional(pool)
        .await?;

        match existing {
            Some(instance) if occurrence.from_override => {
                // Override wins: adopt the instance in place. The guard
                // clause keeps the adoption idempotent across re-runs.
                let updated = sqlx::query(
                    r#"
                    UPDATE class_instances
                    SET class_type_id = $2, coach_id = $3, capacity = $4,
                        schedule_id = $5, end_time = $6
                    WHERE id = $1
                      AND (class_type_id IS DISTINCT FROM $2
                           OR coach_id IS DISTINCT FROM $3
                           OR capacity IS DISTINCT FROM $4)
                    "#,
                )
                .bind(instance.id)
                .bind(occurrence.class_type_id)
                .bind(occurrence.coach_id)
                .bind(occurrence.capacity)
                .bind(occurrence.schedule_id)
                .bind(end)
                .execute(pool)
                .await?;

                if updated.rows_affected() > 0 {
                    stats.adopted += 1;
                } else {
                    stats.skipped += 1;
                }
            }
            Some(_) => {
                stats.skipped += 1;
            }
            None => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO class_instances
                        (schedule_id, location_id, class_type_id, coach_id,
                         start_time, end_time, capacity)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (location_id, start_time) DO NOTHING
                    "#,
                )
                .bind(occurrence.schedule_id)
                .bind(occurrence.location_id)
                .bind(occurrence.class_type_id)
                .bind(occurrence.coach_id)
                .bind(occurrence.start)
                .bind(end)
                .bind(occurrence.capacity)
                .execute(pool)
                .await?;

                // A concurrent run may have inserted the slot between the
                // probe and here; the conflict clause makes that a skip.
                if inserted.rows_affected() > 0 {
                    stats.created += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }
    }

    tracing::info!(
        created = stats.created,
        adopted = stats.adopted,
        skipped = stats.skipped,
        months_ahead = months_ahead,
        "Class instance generation completed"
    );

    Ok(stats)
}

/// Day-of-week numbering used by schedule rules: 0 = Sunday .. 6 = Saturday.
fn weekday_number(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_sunday() as i16
}

fn occurrence_on(schedule: &ClassSchedule, date: NaiveDate, from_override: bool) -> PlannedOccurrence {
    PlannedOccurrence {
        schedule_id: schedule.id,
        location_id: schedule.location_id,
        class_type_id: schedule.class_type_id,
        coach_id: schedule.coach_id,
        capacity: schedule.capacity,
        start: date.and_time(schedule.start_time).and_utc(),
        from_override,
    }
}

async fn class_type_durations(pool: &PgPool) -> Result<HashMap<Uuid, i32>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (Uuid, i32)>(
        r#"
        SELECT id, duration_minutes FROM class_types
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn schedule(
        location_id: Uuid,
        day_of_week: i16,
        start_time: NaiveTime,
        override_range: Option<(NaiveDate, NaiveDate)>,
    ) -> ClassSchedule {
        ClassSchedule {
            id: Uuid::new_v4(),
            location_id,
            class_type_id: Uuid::new_v4(),
            coach_id: Uuid::new_v4(),
            day_of_week,
            start_time,
            capacity: 12,
            is_active: true,
            override_start_date: override_range.map(|(s, _)| s),
            override_end_date: override_range.map(|(_, e)| e),
            created_at: Utc::now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_base_rule_walks_matching_weekdays() {
        // 2026-03-02 is a Monday
        let base = schedule(Uuid::new_v4(), 1, time(18, 0), None);
        let planned = expand_schedules(
            std::slice::from_ref(&base),
            date(2026, 3, 2),
            date(2026, 3, 29),
        );

        assert_eq!(planned.len(), 4);
        assert!(planned.iter().all(|p| !p.from_override));
        assert_eq!(
            planned[0].start,
            date(2026, 3, 2).and_time(time(18, 0)).and_utc()
        );
        assert_eq!(
            planned[3].start,
            date(2026, 3, 23).and_time(time(18, 0)).and_utc()
        );
    }

    #[test]
    fn test_override_suppresses_base_inside_its_range() {
        let location = Uuid::new_v4();
        let base = schedule(location, 1, time(18, 0), None);
        let mut replacement = schedule(
            location,
            1,
            time(18, 0),
            Some((date(2026, 3, 9), date(2026, 3, 15))),
        );
        replacement.capacity = 6;

        let planned = expand_schedules(
            &[base.clone(), replacement.clone()],
            date(2026, 3, 2),
            date(2026, 3, 29),
        );

        // Four Mondays total; the one inside [3/9, 3/15] comes from the
        // override, the rest from the base rule.
        assert_eq!(planned.len(), 4);

        let overridden: Vec<_> = planned.iter().filter(|p| p.from_override).collect();
        assert_eq!(overridden.len(), 1);
        assert_eq!(
            overridden[0].start,
            date(2026, 3, 9).and_time(time(18, 0)).and_utc()
        );
        assert_eq!(overridden[0].capacity, 6);
        assert_eq!(overridden[0].schedule_id, replacement.id);

        let base_dates: Vec<_> = planned
            .iter()
            .filter(|p| !p.from_override)
            .map(|p| p.start.date_naive())
            .collect();
        assert_eq!(
            base_dates,
            vec![date(2026, 3, 2), date(2026, 3, 16), date(2026, 3, 23)]
        );
    }

    #[test]
    fn test_override_only_applies_to_its_slot() {
        let location = Uuid::new_v4();
        let base_mon = schedule(location, 1, time(18, 0), None);
        let base_wed = schedule(location, 3, time(18, 0), None);
        let replacement = schedule(
            location,
            1,
            time(18, 0),
            Some((date(2026, 3, 9), date(2026, 3, 15))),
        );

        let planned = expand_schedules(
            &[base_mon, base_wed.clone(), replacement],
            date(2026, 3, 2),
            date(2026, 3, 15),
        );

        // The Wednesday rule is untouched by the Monday override.
        let wednesdays: Vec<_> = planned
            .iter()
            .filter(|p| p.schedule_id == base_wed.id)
            .collect();
        assert_eq!(wednesdays.len(), 2);
    }

    #[test]
    fn test_override_range_clamped_to_horizon() {
        let rule = schedule(
            Uuid::new_v4(),
            1,
            time(7, 30),
            Some((date(2026, 2, 1), date(2026, 12, 31))),
        );

        let planned = expand_schedules(
            std::slice::from_ref(&rule),
            date(2026, 3, 2),
            date(2026, 3, 15),
        );

        // Only the Mondays inside [today, horizon_end] survive the clamp.
        assert_eq!(planned.len(), 2);
        assert!(planned
            .iter()
            .all(|p| p.start.date_naive() >= date(2026, 3, 2)
                && p.start.date_naive() <= date(2026, 3, 15)));
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let location = Uuid::new_v4();
        let schedules = vec![
            schedule(location, 1, time(18, 0), None),
            schedule(
                location,
                1,
                time(18, 0),
                Some((date(2026, 3, 9), date(2026, 3, 15))),
            ),
        ];

        let a = expand_schedules(&schedules, date(2026, 3, 2), date(2026, 3, 29));
        let b = expand_schedules(&schedules, date(2026, 3, 2), date(2026, 3, 29));

        assert_eq!(a, b);
    }

    #[test]
    fn test_weekday_numbering_is_sunday_based() {
        // 2026-03-01 is a Sunday
        assert_eq!(weekday_number(date(2026, 3, 1)), 0);
        assert_eq!(weekday_number(date(2026, 3, 2)), 1);
        assert_eq!(weekday_number(date(2026, 3, 7)), 6);
    }
}
