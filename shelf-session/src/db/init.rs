//! Database initialization functions
//!
//! Creates the `settings` table and fills in any missing runtime setting with
//! its built-in default. Safe to run on every startup.

use crate::config::DEFAULT_SETTINGS;
use crate::error::Result;
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Create the settings table if it does not exist
pub async fn create_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize settings table with default values
///
/// Existing values are never overwritten.
pub async fn init_settings_defaults(pool: &Pool<Sqlite>) -> Result<()> {
    for &(key, default_value) in DEFAULT_SETTINGS {
        let result = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;

        if result.rows_affected() > 0 {
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
    }

    Ok(())
}

/// Initialize all required database structures
pub async fn initialize_database(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Initializing database structures");

    create_schema(pool).await?;
    init_settings_defaults(pool).await?;

    info!("Database initialization complete");
    Ok(())
}
