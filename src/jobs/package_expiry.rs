use sqlx::PgPool;

use crate::services::ledger::{self, ExpirySweepStats, LedgerError};

/// Background job that expires member packages past their expiry date and
/// forfeits leftover sessions. Idempotent: once a package is swept the
/// next run no longer sees it.
pub async fn run(pool: &PgPool) -> Result<ExpirySweepStats, LedgerError> {
    tracing::info!("Starting package expiry sweep");

    let stats = ledger::expire_packages(pool).await?;

    tracing::info!(
        expired_packages = stats.expired_packages,
        forfeited_credits = stats.forfeited_credits,
        "Package expiry sweep completed"
    );

    Ok(stats)
}
