use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, ClassInstance, Member};
use crate::services::{qr, signature};

/// Upper bound on token age at validation time. Bounds replay of a
/// screenshot of an old code.
const TOKEN_MAX_AGE_MINUTES: i64 = 180;

/// Check-in is accepted from this many minutes before class start until
/// this many minutes after class end.
const CHECKIN_WINDOW_MINUTES: i64 = 60;

#[derive(thiserror::Error, Debug)]
pub enum CheckinError {
    #[error("Booking not found")]
    BookingNotFound,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token does not match the booking")]
    BookingMismatch,

    #[error("Booking is not in a check-in-able state")]
    InvalidStatus,

    #[error("Already checked in")]
    AlreadyCheckedIn,

    #[error("Outside the check-in window")]
    OutsideCheckinWindow,

    #[error("Class has already ended")]
    ClassEnded,

    #[error("Attendance can only be marked on the day of the class")]
    InvalidDate,

    #[error("Forbidden")]
    Forbidden,

    #[error("QR rendering failed: {0}")]
    Qr(#[from] qr::QrError),

    #[error("Token serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CheckinError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckinError::BookingNotFound => "booking_not_found",
            CheckinError::InvalidSignature => "invalid_signature",
            CheckinError::TokenExpired => "token_expired",
            CheckinError::BookingMismatch => "booking_mismatch",
            CheckinError::InvalidStatus => "invalid_status",
            CheckinError::AlreadyCheckedIn => "already_checked_in",
            CheckinError::OutsideCheckinWindow => "outside_checkin_window",
            CheckinError::ClassEnded => "class_ended",
            CheckinError::InvalidDate => "invalid_date",
            CheckinError::Forbidden => "forbidden",
            CheckinError::Qr(_) => "qr_error",
            CheckinError::Serialization(_) => "internal_error",
            CheckinError::Database(_) => "store_error",
        }
    }
}

/// Signed payload a member presents at the door. `timestamp` is unix
/// seconds at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinToken {
    pub booking_id: Uuid,
    pub member_id: Uuid,
    pub child_id: Option<Uuid>,
    pub timestamp: i64,
    pub signature: String,
}

impl CheckinToken {
    fn signing_payload(booking_id: Uuid, member_id: Uuid, timestamp: i64) -> String {
        format!("{}:{}:{}", booking_id, member_id, timestamp)
    }

    pub fn issue(
        booking_id: Uuid,
        member_id: Uuid,
        child_id: Option<Uuid>,
        issued_at: DateTime<Utc>,
        key: &[u8],
    ) -> Self {
        let timestamp = issued_at.timestamp();
        let signature =
            signature::sign(&Self::signing_payload(booking_id, member_id, timestamp), key);

        Self {
            booking_id,
            member_id,
            child_id,
            timestamp,
            signature,
        }
    }

    pub fn verify_signature(&self, key: &[u8]) -> bool {
        signature::verify(
            &Self::signing_payload(self.booking_id, self.member_id, self.timestamp),
            &self.signature,
            key,
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() - self.timestamp > TOKEN_MAX_AGE_MINUTES * 60
    }
}

/// Whether `now` falls inside the acceptance window around the class.
fn within_checkin_window(
    now: DateTime<Utc>,
    class_start: DateTime<Utc>,
    class_end: DateTime<Utc>,
) -> bool {
    let margin = Duration::minutes(CHECKIN_WINDOW_MINUTES);
    now >= class_start - margin && now <= class_end + margin
}

/// Manual marking is restricted to the calendar day of the class, a
/// stricter date-only rule than the token path's minute-level window.
fn same_calendar_day(now: DateTime<Utc>, class_start: DateTime<Utc>) -> bool {
    now.date_naive() == class_start.date_naive()
}

#[derive(Debug, Serialize)]
pub struct IssuedToken {
    pub token: CheckinToken,
    pub qr_svg: String,
    pub qr_png_base64: String,
}

/// Issues a signed check-in token for a confirmed booking owned by the
/// requesting member. Tokens may be issued any time after booking up to
/// class end.
#[tracing::instrument(skip(pool, key))]
pub async fn issue_token(
    pool: &PgPool,
    key: &[u8],
    booking_id: Uuid,
    member_id: Uuid,
) -> Result<IssuedToken, CheckinError> {
    let booking = Booking::find_by_id(pool, booking_id)
        .await?
        .ok_or(CheckinError::BookingNotFound)?;

    if booking.member_id != member_id {
        return Err(CheckinError::Forbidden);
    }
    if booking.status != BookingStatus::Confirmed {
        return Err(CheckinError::InvalidStatus);
    }

    let instance = ClassInstance::find_by_id(pool, booking.class_instance_id)
        .await?
        .ok_or(CheckinError::BookingNotFound)?;

    if Utc::now() > instance.end_time {
        return Err(CheckinError::ClassEnded);
    }

    let token = CheckinToken::issue(
        booking.id,
        booking.member_id,
        booking.child_id,
        Utc::now(),
        key,
    );

    let token_json = serde_json::to_string(&token)?;

    let qr_svg = qr::render_svg(&token_json)?;
    let qr_png = qr::render_png(&token_json)?;

    tracing::info!(
        booking_id = %booking.id,
        member_id = %member_id,
        "Check-in token issued"
    );

    Ok(IssuedToken {
        token,
        qr_svg,
        qr_png_base64: base64::engine::general_purpose::STANDARD.encode(qr_png),
    })
}

/// Validates a presented token and marks the booking attended,
/// exactly once.
///
/// Check order: signature, token age, booking identity, coach assignment,
/// class time window, then the `confirmed -> attended` transition via a
/// conditional update.
#[tracing::instrument(skip(pool, key, token), fields(booking_id = %token.booking_id))]
pub async fn validate(
    pool: &PgPool,
    key: &[u8],
    token: &CheckinToken,
    validator: &Member,
) -> Result<Booking, CheckinError> {
    if !token.verify_signature(key) {
        tracing::warn!("Check-in token with invalid signature rejected");
        return Err(CheckinError::InvalidSignature);
    }

    let now = Utc::now();
    if token.is_expired(now) {
        return Err(CheckinError::TokenExpired);
    }

    let booking = Booking::find_by_id(pool, token.booking_id)
        .await?
        .ok_or(CheckinError::BookingMismatch)?;

    if booking.member_id != token.member_id || booking.child_id != token.child_id {
        return Err(CheckinError::BookingMismatch);
    }

    match booking.status {
        BookingStatus::Confirmed => {}
        BookingStatus::Attended => return Err(CheckinError::AlreadyCheckedIn),
        BookingStatus::Cancelled | BookingStatus::NoShow => {
            return Err(CheckinError::InvalidStatus)
        }
    }

    let instance = ClassInstance::find_by_id(pool, booking.class_instance_id)
        .await?
        .ok_or(CheckinError::BookingMismatch)?;

    if instance.coach_id != validator.id && !validator.is_admin() {
        return Err(CheckinError::Forbidden);
    }

    if !within_checkin_window(now, instance.start_time, instance.end_time) {
        return Err(CheckinError::OutsideCheckinWindow);
    }

    mark_transition(pool, booking.id, BookingStatus::Attended).await
}

/// Coach-UI attendance marking without a token. Same terminal transition,
/// but restricted to the calendar day of the class.
#[tracing::instrument(skip(pool))]
pub async fn mark_attendance(
    pool: &PgPool,
    booking_id: Uuid,
    marker: &Member,
    status: BookingStatus,
) -> Result<Booking, CheckinError> {
    if !matches!(status, BookingStatus::Attended | BookingStatus::NoShow) {
        return Err(CheckinError::InvalidStatus);
    }

    let booking = Booking::find_by_id(pool, booking_id)
        .await?
        .ok_or(CheckinError::BookingNotFound)?;

    match booking.status {
        BookingStatus::Confirmed => {}
        BookingStatus::Attended | BookingStatus::NoShow => {
            return Err(CheckinError::AlreadyCheckedIn)
        }
        BookingStatus::Cancelled => return Err(CheckinError::InvalidStatus),
    }

    let instance = ClassInstance::find_by_id(pool, booking.class_instance_id)
        .await?
        .ok_or(CheckinError::BookingNotFound)?;

    if instance.coach_id != marker.id && !marker.is_admin() {
        return Err(CheckinError::Forbidden);
    }

    if !same_calendar_day(Utc::now(), instance.start_time) {
        return Err(CheckinError::InvalidDate);
    }

    mark_transition(pool, booking.id, status).await
}

/// Applies the terminal transition with a conditional update so it is
/// exactly-once even under concurrent validators: a row that already left
/// `confirmed` matches nothing and surfaces `AlreadyCheckedIn`.
async fn mark_transition(
    pool: &PgPool,
    booking_id: Uuid,
    status: BookingStatus,
) -> Result<Booking, CheckinError> {
    let booking = sqlx::query_as::<_, Booking>(
        r#"
        UPDATE bookings
        SET status = $2, attendance_marked_at = NOW()
        WHERE id = $1 AND status = 'confirmed'
        RETURNING *
        "#,
    )
    .bind(booking_id)
    .bind(status)
    .fetch_optional(pool)
    .await?
    .ok_or(CheckinError::AlreadyCheckedIn)?;

    tracing::info!(
        booking_id = %booking.id,
        status = ?booking.status,
        "Attendance recorded"
    );

    Ok(booking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const KEY: &[u8] = b"test-checkin-secret";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_token_roundtrip() {
        let token = CheckinToken::issue(Uuid::new_v4(), Uuid::new_v4(), None, at(17, 0), KEY);

        assert!(token.verify_signature(KEY));
        assert!(!token.verify_signature(b"other-secret"));
    }

    #[test]
    fn test_tampered_booking_id_fails_signature() {
        let mut token = CheckinToken::issue(Uuid::new_v4(), Uuid::new_v4(), None, at(17, 0), KEY);
        token.booking_id = Uuid::new_v4();

        assert!(!token.verify_signature(KEY));
    }

    #[test]
    fn test_token_age_boundary() {
        let issued = at(12, 0);
        let token = CheckinToken::issue(Uuid::new_v4(), Uuid::new_v4(), None, issued, KEY);

        // 179 minutes old: still valid (and still verifiable)
        assert!(!token.is_expired(issued + Duration::minutes(179)));
        assert!(token.verify_signature(KEY));

        // 181 minutes old: expired
        assert!(token.is_expired(issued + Duration::minutes(181)));
    }

    #[test]
    fn test_tampered_token_fails_even_when_fresh() {
        let issued = at(12, 0);
        let mut token = CheckinToken::issue(Uuid::new_v4(), Uuid::new_v4(), None, issued, KEY);
        token.booking_id = Uuid::new_v4();

        // Still inside the age bound, but the signature no longer matches.
        assert!(!token.is_expired(issued + Duration::minutes(179)));
        assert!(!token.verify_signature(KEY));
    }

    #[test]
    fn test_checkin_window() {
        let start = at(18, 0);
        let end = at(19, 0);

        assert!(within_checkin_window(at(17, 0), start, end));
        assert!(within_checkin_window(at(18, 30), start, end));
        assert!(within_checkin_window(at(20, 0), start, end));

        assert!(!within_checkin_window(at(16, 59), start, end));
        assert!(!within_checkin_window(at(20, 1), start, end));
    }

    #[test]
    fn test_same_calendar_day_is_date_only() {
        let start = at(18, 0);

        // Very early the same day is fine; one minute past midnight is not.
        assert!(same_calendar_day(
            Utc.with_ymd_and_hms(2026, 3, 10, 0, 5, 0).unwrap(),
            start
        ));
        assert!(!same_calendar_day(
            Utc.with_ymd_and_hms(2026, 3, 11, 0, 1, 0).unwrap(),
            start
        ));
    }
}
