// Connectivity checks run before a backup touches the source database
use sqlx::{Connection, PgConnection};

use crate::engine::DatabaseEngine;
use crate::errors::{BackupError, Result};

pub async fn check_db_connection(db_url: &str) -> bool {
    match PgConnection::connect(db_url).await {
        Ok(conn) => {
            let _ = conn.close().await;
            tracing::info!("✅ Successfully connected to source database");
            true
        }
        Err(e) => {
            tracing::error!("❌ Failed to connect to source database: {}", e);
            false
        }
    }
}

/// Engine-specific pre-flight: tools on PATH, and for PostgreSQL a live connection.
pub async fn ensure_source_reachable(engine: &DatabaseEngine) -> Result<()> {
    use crate::engine::DumpStrategy;

    engine.preflight()?;
    if let DatabaseEngine::Postgres(pg) = engine {
        if !check_db_connection(pg.url()).await {
            return Err(BackupError::dump(
                "Cannot proceed with backup - database connection failed",
            ));
        }
    }
    Ok(())
}
