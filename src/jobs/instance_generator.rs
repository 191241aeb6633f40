use sqlx::PgPool;

use crate::services::schedule_generator::{self, GenerateError, GenerationStats};

/// Background job that rolls the class-instance horizon forward.
///
/// Runs nightly; the admin API can also trigger it manually. Both entry
/// points share the generator's idempotent, conflict-tolerant apply pass,
/// so overlapping runs converge to the single-run result.
pub async fn run(pool: &PgPool, months_ahead: u32) -> Result<GenerationStats, GenerateError> {
    tracing::info!(months_ahead = months_ahead, "Starting class instance generation job");

    let stats = schedule_generator::generate(pool, months_ahead).await?;

    tracing::info!(
        created = stats.created,
        adopted = stats.adopted,
        skipped = stats.skipped,
        "Class instance generation job completed"
    );

    Ok(stats)
}
