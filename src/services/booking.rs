use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, Child, ClassInstance, TransactionType};
use crate::services::ledger::{self, LedgerError};
use crate::services::notifier::Notifier;

/// Member-initiated cancellations must happen at least this many minutes
/// before the class starts.
const CANCELLATION_WINDOW_MINUTES: i64 = 60;

#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error("Booking not found")]
    BookingNotFound,

    #[error("Class instance not found")]
    InstanceNotFound,

    #[error("Class is cancelled")]
    ClassCancelled,

    #[error("Class has already started")]
    ClassInPast,

    #[error("Class is full")]
    ClassFull,

    #[error("Already booked for this class")]
    AlreadyBooked,

    #[error("Booking is already cancelled")]
    AlreadyCancelled,

    #[error("Cancellation window has passed")]
    CancellationWindowPassed,

    #[error("Child profile not found")]
    ChildNotFound,

    #[error("Location not found")]
    LocationNotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::BookingNotFound => "booking_not_found",
            BookingError::InstanceNotFound => "class_not_found",
            BookingError::ClassCancelled => "class_cancelled",
            BookingError::ClassInPast => "class_in_past",
            BookingError::ClassFull => "class_full",
            BookingError::AlreadyBooked => "already_booked",
            BookingError::AlreadyCancelled => "already_cancelled",
            BookingError::CancellationWindowPassed => "cancellation_window_passed",
            BookingError::ChildNotFound => "child_not_found",
            BookingError::LocationNotFound => "location_not_found",
            BookingError::Forbidden => "forbidden",
            BookingError::Ledger(e) => e.code(),
            BookingError::Database(_) => "store_error",
        }
    }
}

/// Whether a member may still cancel a booking for a class starting at
/// `class_start`. Admin-initiated cancellations skip this check.
fn member_cancellation_check(
    now: DateTime<Utc>,
    class_start: DateTime<Utc>,
) -> Result<(), BookingError> {
    if now >= class_start {
        return Err(BookingError::ClassInPast);
    }
    if now > class_start - Duration::minutes(CANCELLATION_WINDOW_MINUTES) {
        return Err(BookingError::CancellationWindowPassed);
    }
    Ok(())
}

/// Books a member (or one of their children) into a class instance.
///
/// The whole sequence runs in one transaction. Locking the instance row up
/// front serializes concurrent creates for the same instance, so the
/// capacity count re-checked here can never be overtaken between the count
/// and the insert.
#[tracing::instrument(skip(pool, notifier))]
pub async fn create(
    pool: &PgPool,
    notifier: &Notifier,
    member_id: Uuid,
    class_instance_id: Uuid,
    child_id: Option<Uuid>,
) -> Result<Booking, BookingError> {
    if let Some(child_id) = child_id {
        let child = Child::find_by_id(pool, child_id)
            .await?
            .ok_or(BookingError::ChildNotFound)?;
        if !child.is_active {
            return Err(BookingError::ChildNotFound);
        }
        if child.member_id != member_id {
            return Err(BookingError::Forbidden);
        }
    }

    let mut tx = pool.begin().await?;

    let instance = sqlx::query_as::<_, ClassInstance>(
        r#"
        SELECT * FROM class_instances WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(class_instance_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BookingError::InstanceNotFound)?;

    if instance.is_cancelled {
        return Err(BookingError::ClassCancelled);
    }
    if instance.start_time <= Utc::now() {
        return Err(BookingError::ClassInPast);
    }

    let confirmed_count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM bookings
        WHERE class_instance_id = $1 AND status = 'confirmed'
        "#,
    )
    .bind(class_instance_id)
    .fetch_one(&mut *tx)
    .await?;

    if confirmed_count >= instance.capacity as i64 {
        return Err(BookingError::ClassFull);
    }

    let duplicate = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM bookings
            WHERE class_instance_id = $1
              AND member_id = $2
              AND child_id IS NOT DISTINCT FROM $3
              AND status = 'confirmed'
        )
        "#,
    )
    .bind(class_instance_id)
    .bind(member_id)
    .bind(child_id)
    .fetch_one(&mut *tx)
    .await?;

    if duplicate {
        return Err(BookingError::AlreadyBooked);
    }

    let package = ledger::pick_debit_package(&mut tx, member_id).await?;

    let booking = sqlx::query_as::<_, Booking>(
        r#"
        INSERT INTO bookings
            (class_instance_id, member_id, child_id, member_package_id, status)
        VALUES ($1, $2, $3, $4, 'confirmed')
        RETURNING *
        "#,
    )
    .bind(class_instance_id)
    .bind(member_id)
    .bind(child_id)
    .bind(package.id)
    .fetch_one(&mut *tx)
    .await?;

    ledger::apply_debit(&mut tx, package.id, booking.id).await?;

    tx.commit().await?;

    tracing::info!(
        booking_id = %booking.id,
        member_id = %member_id,
        class_instance_id = %class_instance_id,
        member_package_id = %package.id,
        "Booking confirmed"
    );

    notifier.booking_event("booking_confirmed", &booking);

    Ok(booking)
}

/// Cancels a booking and refunds its credit. Member-initiated cancellation
/// enforces the 1-hour window; admins bypass it.
#[tracing::instrument(skip(pool, notifier))]
pub async fn cancel(
    pool: &PgPool,
    notifier: &Notifier,
    booking_id: Uuid,
    actor_member_id: Uuid,
    is_admin: bool,
) -> Result<Booking, BookingError> {
    let mut tx = pool.begin().await?;

    let booking = sqlx::query_as::<_, Booking>(
        r#"
        SELECT * FROM bookings WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(booking_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BookingError::BookingNotFound)?;

    if !is_admin && booking.member_id != actor_member_id {
        return Err(BookingError::Forbidden);
    }

    match booking.status {
        BookingStatus::Confirmed => {}
        BookingStatus::Cancelled => return Err(BookingError::AlreadyCancelled),
        BookingStatus::Attended | BookingStatus::NoShow => {
            return Err(BookingError::ClassInPast)
        }
    }

    if !is_admin {
        let instance = sqlx::query_as::<_, ClassInstance>(
            r#"
            SELECT * FROM class_instances WHERE id = $1
            "#,
        )
        .bind(booking.class_instance_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BookingError::InstanceNotFound)?;

        member_cancellation_check(Utc::now(), instance.start_time)?;
    }

    let booking = cancel_and_refund(&mut tx, &booking).await?;

    tx.commit().await?;

    tracing::info!(
        booking_id = %booking.id,
        member_id = %booking.member_id,
        by_admin = is_admin,
        "Booking cancelled and refunded"
    );

    notifier.booking_event("booking_cancelled", &booking);

    Ok(booking)
}

/// Cancels a class instance and refunds every confirmed booking on it, in
/// one transaction.
#[tracing::instrument(skip(pool, notifier))]
pub async fn cancel_instance(
    pool: &PgPool,
    notifier: &Notifier,
    class_instance_id: Uuid,
) -> Result<usize, BookingError> {
    let mut tx = pool.begin().await?;

    let instance = sqlx::query_as::<_, ClassInstance>(
        r#"
        SELECT * FROM class_instances WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(class_instance_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BookingError::InstanceNotFound)?;

    if instance.is_cancelled {
        return Err(BookingError::ClassCancelled);
    }

    sqlx::query(
        r#"
        UPDATE class_instances SET is_cancelled = TRUE WHERE id = $1
        "#,
    )
    .bind(class_instance_id)
    .execute(&mut *tx)
    .await?;

    let cancelled = cancel_confirmed_for_instance(&mut tx, class_instance_id).await?;

    tx.commit().await?;

    tracing::info!(
        class_instance_id = %class_instance_id,
        refunded_bookings = cancelled.len(),
        "Class instance cancelled"
    );

    for booking in &cancelled {
        notifier.booking_event("booking_cancelled", booking);
    }

    Ok(cancelled.len())
}

/// Deletes a class instance. Confirmed bookings are refunded first; the
/// booking rows go with the instance (`ON DELETE CASCADE`), the ledger
/// rows remain.
#[tracing::instrument(skip(pool, notifier))]
pub async fn delete_instance(
    pool: &PgPool,
    notifier: &Notifier,
    class_instance_id: Uuid,
) -> Result<usize, BookingError> {
    let mut tx = pool.begin().await?;

    sqlx::query_as::<_, ClassInstance>(
        r#"
        SELECT * FROM class_instances WHERE id = $1 FOR UPDATE
        "#,
    )
    .bind(class_instance_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BookingError::InstanceNotFound)?;

    let cancelled = cancel_confirmed_for_instance(&mut tx, class_instance_id).await?;

    sqlx::query(
        r#"
        DELETE FROM class_instances WHERE id = $1
        "#,
    )
    .bind(class_instance_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        class_instance_id = %class_instance_id,
        refunded_bookings = cancelled.len(),
        "Class instance deleted"
    );

    for booking in &cancelled {
        notifier.booking_event("booking_cancelled", booking);
    }

    Ok(cancelled.len())
}

/// Deactivates a location: every future, non-cancelled instance there is
/// cancelled and its confirmed bookings refunded, all in one transaction.
#[tracing::instrument(skip(pool, notifier))]
pub async fn deactivate_location(
    pool: &PgPool,
    notifier: &Notifier,
    location_id: Uuid,
) -> Result<usize, BookingError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE locations SET is_active = FALSE WHERE id = $1
        "#,
    )
    .bind(location_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(BookingError::LocationNotFound);
    }

    let instances = sqlx::query_as::<_, ClassInstance>(
        r#"
        SELECT * FROM class_instances
        WHERE location_id = $1 AND start_time > NOW() AND is_cancelled = FALSE
        FOR UPDATE
        "#,
    )
    .bind(location_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut all_cancelled = Vec::new();
    for instance in &instances {
        sqlx::query(
            r#"
            UPDATE class_instances SET is_cancelled = TRUE WHERE id = $1
            "#,
        )
        .bind(instance.id)
        .execute(&mut *tx)
        .await?;

        let cancelled = cancel_confirmed_for_instance(&mut tx, instance.id).await?;
        all_cancelled.extend(cancelled);
    }

    tx.commit().await?;

    tracing::info!(
        location_id = %location_id,
        cancelled_instances = instances.len(),
        refunded_bookings = all_cancelled.len(),
        "Location deactivated"
    );

    for booking in &all_cancelled {
        notifier.booking_event("booking_cancelled", booking);
    }

    Ok(all_cancelled.len())
}

/// Deletes (deactivates) a child profile and refunds the child's future
/// confirmed bookings.
#[tracing::instrument(skip(pool, notifier))]
pub async fn delete_child(
    pool: &PgPool,
    notifier: &Notifier,
    child_id: Uuid,
    actor_member_id: Uuid,
    is_admin: bool,
) -> Result<usize, BookingError> {
    let child = Child::find_by_id(pool, child_id)
        .await?
        .ok_or(BookingError::ChildNotFound)?;

    if !is_admin && child.member_id != actor_member_id {
        return Err(BookingError::Forbidden);
    }

    let mut tx = pool.begin().await?;

    let bookings = sqlx::query_as::<_, Booking>(
        r#"
        SELECT b.* FROM bookings b
        JOIN class_instances ci ON ci.id = b.class_instance_id
        WHERE b.child_id = $1 AND b.status = 'confirmed' AND ci.start_time > NOW()
        FOR UPDATE OF b
        "#,
    )
    .bind(child_id)
    .fetch_all(&mut *tx)
    .await?;

    let mut cancelled = Vec::with_capacity(bookings.len());
    for booking in &bookings {
        cancelled.push(cancel_and_refund(&mut tx, booking).await?);
    }

    sqlx::query(
        r#"
        UPDATE children SET is_active = FALSE WHERE id = $1
        "#,
    )
    .bind(child_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        child_id = %child_id,
        refunded_bookings = cancelled.len(),
        "Child profile removed"
    );

    for booking in &cancelled {
        notifier.booking_event("booking_cancelled", booking);
    }

    Ok(cancelled.len())
}

/// Flips one confirmed booking to cancelled and refunds its credit.
/// Caller owns the transaction.
async fn cancel_and_refund(
    tx: &mut Transaction<'_, Postgres>,
    booking: &Booking,
) -> Result<Booking, BookingError> {
    let cancelled = sqlx::query_as::<_, Booking>(
        r#"
        UPDATE bookings
        SET status = 'cancelled', cancelled_at = NOW()
        WHERE id = $1 AND status = 'confirmed'
        RETURNING *
        "#,
    )
    .bind(booking.id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(BookingError::AlreadyCancelled)?;

    ledger::credit(
        tx,
        booking.member_package_id,
        1,
        TransactionType::Refund,
        Some(booking.id),
    )
    .await?;

    Ok(cancelled)
}

async fn cancel_confirmed_for_instance(
    tx: &mut Transaction<'_, Postgres>,
    class_instance_id: Uuid,
) -> Result<Vec<Booking>, BookingError> {
    let bookings = sqlx::query_as::<_, Booking>(
        r#"
        SELECT * FROM bookings
        WHERE class_instance_id = $1 AND status = 'confirmed'
        FOR UPDATE
        "#,
    )
    .bind(class_instance_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut cancelled = Vec::with_capacity(bookings.len());
    for booking in &bookings {
        cancelled.push(cancel_and_refund(tx, booking).await?);
    }

    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cancellation_allowed_before_window() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap();
        let now = start - Duration::hours(2);

        assert!(member_cancellation_check(now, start).is_ok());
    }

    #[test]
    fn test_cancellation_rejected_inside_window() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap();
        let now = start - Duration::minutes(59);

        assert!(matches!(
            member_cancellation_check(now, start),
            Err(BookingError::CancellationWindowPassed)
        ));
    }

    #[test]
    fn test_cancellation_boundary_is_exactly_one_hour() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap();
        let now = start - Duration::hours(1);

        assert!(member_cancellation_check(now, start).is_ok());
    }

    #[test]
    fn test_cancellation_rejected_after_start() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 18, 0, 0).unwrap();
        let now = start + Duration::minutes(5);

        assert!(matches!(
            member_cancellation_check(now, start),
            Err(BookingError::ClassInPast)
        ));
    }
}
