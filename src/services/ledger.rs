use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    package::resolve_price, CreditTransaction, MemberPackage, PackagePriceOverride,
    SessionPackage, TransactionType,
};

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("No credits available")]
    InsufficientCredits,

    #[error("Remaining credits are on expired packages")]
    CreditsExpired,

    #[error("Package not found")]
    PackageNotFound,

    #[error("Package is not available for purchase")]
    PackageUnavailable,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientCredits => "insufficient_credits",
            LedgerError::CreditsExpired => "credits_expired",
            LedgerError::PackageNotFound => "package_not_found",
            LedgerError::PackageUnavailable => "package_unavailable",
            LedgerError::Database(_) => "store_error",
        }
    }
}

/// Selects the package a debit will draw from and locks its row for the
/// rest of the enclosing transaction. Use-it-or-lose-it: among eligible
/// packages the one expiring soonest wins, deterministically.
pub async fn pick_debit_package(
    tx: &mut Transaction<'_, Postgres>,
    member_id: Uuid,
) -> Result<MemberPackage, LedgerError> {
    let package = sqlx::query_as::<_, MemberPackage>(
        r#"
        SELECT * FROM member_packages
        WHERE member_id = $1
          AND is_expired = FALSE
          AND expiry_date >= NOW()
          AND sessions_remaining > 0
        ORDER BY expiry_date ASC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(member_id)
    .fetch_optional(&mut **tx)
    .await?;

    match package {
        Some(p) => Ok(p),
        None => {
            // Distinguish "no credits at all" from "credits stranded on
            // expired packages" for the caller's error message.
            let has_stranded = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM member_packages
                    WHERE member_id = $1 AND sessions_remaining > 0
                )
                "#,
            )
            .bind(member_id)
            .fetch_one(&mut **tx)
            .await?;

            if has_stranded {
                Err(LedgerError::CreditsExpired)
            } else {
                Err(LedgerError::InsufficientCredits)
            }
        }
    }
}

/// Debits one session from a package previously locked by
/// `pick_debit_package`: balance update plus exactly one ledger row, in the
/// caller's transaction.
pub async fn apply_debit(
    tx: &mut Transaction<'_, Postgres>,
    member_package_id: Uuid,
    booking_id: Uuid,
) -> Result<CreditTransaction, LedgerError> {
    let balance_after = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE member_packages
        SET sessions_remaining = sessions_remaining - 1
        WHERE id = $1
        RETURNING sessions_remaining
        "#,
    )
    .bind(member_package_id)
    .fetch_one(&mut **tx)
    .await?;

    let transaction = insert_transaction(
        tx,
        member_package_id,
        Some(booking_id),
        TransactionType::Booking,
        -1,
        balance_after,
        None,
    )
    .await?;

    Ok(transaction)
}

/// Credits sessions back to a package: balance update plus exactly one
/// ledger row, in the caller's transaction.
pub async fn credit(
    tx: &mut Transaction<'_, Postgres>,
    member_package_id: Uuid,
    amount: i32,
    transaction_type: TransactionType,
    booking_id: Option<Uuid>,
) -> Result<CreditTransaction, LedgerError> {
    let balance_after = sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE member_packages
        SET sessions_remaining = sessions_remaining + $2
        WHERE id = $1
        RETURNING sessions_remaining
        "#,
    )
    .bind(member_package_id)
    .bind(amount)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::PackageNotFound)?;

    let transaction = insert_transaction(
        tx,
        member_package_id,
        booking_id,
        transaction_type,
        amount,
        balance_after,
        None,
    )
    .await?;

    Ok(transaction)
}

/// Issues a MemberPackage from a catalog package. Resolves the price
/// through the override chain (member > location > base) and appends the
/// purchase transaction atomically.
#[tracing::instrument(skip(pool))]
pub async fn purchase(
    pool: &PgPool,
    member_id: Uuid,
    package_id: Uuid,
    location_id: Option<Uuid>,
) -> Result<MemberPackage, LedgerError> {
    let package = SessionPackage::find_by_id(pool, package_id)
        .await?
        .ok_or(LedgerError::PackageNotFound)?;

    if !package.is_active {
        return Err(LedgerError::PackageUnavailable);
    }

    let overrides = PackagePriceOverride::list_for_package(pool, package_id).await?;
    let price_cents = resolve_price(&package, &overrides, member_id, location_id);

    let expiry_date = Utc::now() + Duration::days(package.expiry_days as i64);

    let mut tx = pool.begin().await?;

    let member_package = sqlx::query_as::<_, MemberPackage>(
        r#"
        INSERT INTO member_packages
            (member_id, package_id, sessions_total, sessions_remaining,
             price_paid_cents, expiry_date)
        VALUES ($1, $2, $3, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(member_id)
    .bind(package_id)
    .bind(package.session_count)
    .bind(price_cents)
    .bind(expiry_date)
    .fetch_one(&mut *tx)
    .await?;

    insert_transaction(
        &mut tx,
        member_package.id,
        None,
        TransactionType::Purchase,
        package.session_count,
        package.session_count,
        None,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        member_id = %member_id,
        member_package_id = %member_package.id,
        sessions = package.session_count,
        price_cents = price_cents,
        "Package purchased"
    );

    Ok(member_package)
}

/// Admin credit grant. The only path that un-sets `is_expired`; it must
/// also extend the expiry date.
#[tracing::instrument(skip(pool))]
pub async fn admin_grant(
    pool: &PgPool,
    member_package_id: Uuid,
    credits: i32,
    new_expiry: DateTime<Utc>,
) -> Result<MemberPackage, LedgerError> {
    let mut tx = pool.begin().await?;

    let member_package = sqlx::query_as::<_, MemberPackage>(
        r#"
        UPDATE member_packages
        SET sessions_remaining = sessions_remaining + $2,
            sessions_total = GREATEST(sessions_total, sessions_remaining + $2),
            is_expired = FALSE,
            expiry_date = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(member_package_id)
    .bind(credits)
    .bind(new_expiry)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(LedgerError::PackageNotFound)?;

    insert_transaction(
        &mut tx,
        member_package_id,
        None,
        TransactionType::Purchase,
        credits,
        member_package.sessions_remaining,
        Some("admin grant"),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        member_package_id = %member_package_id,
        credits = credits,
        new_expiry = %new_expiry,
        "Admin credit grant applied"
    );

    Ok(member_package)
}

#[derive(Debug, Serialize)]
pub struct ExpirySweepStats {
    pub expired_packages: usize,
    pub forfeited_credits: i64,
}

/// Marks packages past their expiry date and forfeits leftover sessions.
/// Idempotent: the `is_expired = FALSE` filter means a re-run finds
/// nothing once applied.
#[tracing::instrument(skip(pool))]
pub async fn expire_packages(pool: &PgPool) -> Result<ExpirySweepStats, LedgerError> {
    let mut tx = pool.begin().await?;

    let due = sqlx::query_as::<_, MemberPackage>(
        r#"
        SELECT * FROM member_packages
        WHERE is_expired = FALSE AND expiry_date < NOW()
        FOR UPDATE
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let mut stats = ExpirySweepStats {
        expired_packages: 0,
        forfeited_credits: 0,
    };

    for package in due {
        sqlx::query(
            r#"
            UPDATE member_packages
            SET is_expired = TRUE, sessions_remaining = 0
            WHERE id = $1
            "#,
        )
        .bind(package.id)
        .execute(&mut *tx)
        .await?;

        if package.sessions_remaining > 0 {
            insert_transaction(
                &mut tx,
                package.id,
                None,
                TransactionType::Expiry,
                -package.sessions_remaining,
                0,
                None,
            )
            .await?;

            stats.forfeited_credits += package.sessions_remaining as i64;
        }

        stats.expired_packages += 1;
    }

    tx.commit().await?;

    if stats.expired_packages > 0 {
        tracing::info!(
            expired_packages = stats.expired_packages,
            forfeited_credits = stats.forfeited_credits,
            "Package expiry sweep applied"
        );
    }

    Ok(stats)
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    member_package_id: Uuid,
    booking_id: Option<Uuid>,
    transaction_type: TransactionType,
    credits_change: i32,
    balance_after: i32,
    note: Option<&str>,
) -> Result<CreditTransaction, LedgerError> {
    let transaction = sqlx::query_as::<_, CreditTransaction>(
        r#"
        INSERT INTO credit_transactions
            (member_package_id, booking_id, transaction_type, credits_change,
             balance_after, note)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(member_package_id)
    .bind(booking_id)
    .bind(transaction_type)
    .bind(credits_change)
    .bind(balance_after)
    .bind(note)
    .fetch_one(&mut **tx)
    .await?;

    Ok(transaction)
}
