use crate::pool::DbPool;
use anyhow::Context;
use tracing::info;

refinery::embed_migrations!("migrations");

/// Run all pending migrations against the pool.
pub async fn run(pool: &DbPool) -> anyhow::Result<()> {
    let mut client = pool
        .get()
        .await
        .context("Failed to get database connection")?;
    let report = migrations::runner()
        .run_async(&mut **client)
        .await
        .context("Failed to run migrations")?;
    info!(applied = report.applied_migrations().len(), "migrations complete");
    Ok(())
}
