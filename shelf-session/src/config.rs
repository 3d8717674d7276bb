//! Configuration management for shelf-session
//!
//! Implements two-tier configuration:
//! 1. **TOML Bootstrap**: Database path, data folder, logging (static, bootstrap only)
//! 2. **Database Runtime**: All tuning settings from the `settings` table
//!
//! # Configuration Philosophy
//!
//! - **Database-first**: All runtime configuration in `settings` table
//! - **TOML minimal**: Bootstrap only (cannot change while running)
//! - **Missing handling**: Missing settings initialized with built-in defaults
//! - **Built-in defaults**: Defined in code ([`DEFAULT_SETTINGS`]), not external files
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--database, --data-folder)
//! 2. Environment variables (SHELF_DATA_FOLDER)
//! 3. TOML configuration file
//! 4. Database settings table
//! 5. Built-in defaults (code constants)

use crate::db;
use crate::error::{Error, Result};
use serde::Deserialize;
use shelf_common::config::{resolve_data_folder, DATA_FOLDER_ENV};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Database file name used when no path is configured
const DEFAULT_DATABASE_FILE: &str = "shelf.db";

/// Built-in runtime setting defaults, as stored in the settings table
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("loader_max_concurrency", "16"),
    ("loader_build_timeout_ms", "30000"),
    ("stability_check_count", "3"),
    ("stability_check_interval_ms", "150"),
    ("stability_timeout_ms", "20000"),
    ("switch_event_timeout_ms", "2000"),
    ("switch_poll_interval_ms", "100"),
    ("switch_poll_attempts", "20"),
    ("save_debounce_ms", "1500"),
    ("save_ack_timeout_ms", "1000"),
    ("periodic_save_edge_ms", "2000"),
    ("periodic_save_interval_ms", "5000"),
    ("periodic_save_edge_fraction", "0.10"),
    ("duration_tolerance_ms", "100"),
    ("sleep_tick_ms", "500"),
    ("inactivity_timeout_ms", "1800000"),
    ("snapshot_interval_ms", "1000"),
];

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    ///
    /// Defaults to `shelf.db` inside the data folder.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Data folder (optional)
    ///
    /// If not specified, will attempt environment -> OS default
    #[serde(default)]
    pub data_folder: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Read and parse a TOML config file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let toml_str = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&toml_str)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Runtime settings loaded from database
///
/// All values have built-in defaults. Missing database values are initialized
/// with defaults and written back to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    // === Playlist Loading ===
    pub loader_max_concurrency: usize,
    pub loader_build_timeout_ms: u64,
    pub stability_check_count: u32,
    pub stability_check_interval_ms: u64,
    pub stability_timeout_ms: u64,

    // === Track Switching ===
    pub switch_event_timeout_ms: u64,
    pub switch_poll_interval_ms: u64,
    pub switch_poll_attempts: u32,

    // === Position Persistence ===
    pub save_debounce_ms: u64,
    pub save_ack_timeout_ms: u64,
    pub periodic_save_edge_ms: u64,
    pub periodic_save_interval_ms: u64,
    pub periodic_save_edge_fraction: f64,
    pub duration_tolerance_ms: u64,

    // === Timers ===
    pub sleep_tick_ms: u64,
    pub inactivity_timeout_ms: u64,

    // === Events ===
    pub snapshot_interval_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            loader_max_concurrency: 16,
            loader_build_timeout_ms: 30_000,
            stability_check_count: 3,
            stability_check_interval_ms: 150,
            stability_timeout_ms: 20_000,
            switch_event_timeout_ms: 2_000,
            switch_poll_interval_ms: 100,
            switch_poll_attempts: 20,
            save_debounce_ms: 1_500,
            save_ack_timeout_ms: 1_000,
            periodic_save_edge_ms: 2_000,
            periodic_save_interval_ms: 5_000,
            periodic_save_edge_fraction: 0.10,
            duration_tolerance_ms: 100,
            sleep_tick_ms: 500,
            inactivity_timeout_ms: 1_800_000,
            snapshot_interval_ms: 1_000,
        }
    }
}

impl RuntimeSettings {
    /// Load runtime settings from database
    ///
    /// For each setting:
    /// 1. Try to read from database
    /// 2. If missing, use built-in default and write it back
    /// 3. If unparseable, warn and use built-in default (stored value is kept)
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        async fn get_or_init<T>(pool: &SqlitePool, key: &str, default: T) -> Result<T>
        where
            T: FromStr + Display,
        {
            let stored: Option<String> = db::settings::get_setting(pool, key).await?;
            match stored {
                Some(value) => match value.parse::<T>() {
                    Ok(parsed) => Ok(parsed),
                    Err(_) => {
                        warn!("Invalid value '{}' for setting '{}', using default {}", value, key, default);
                        Ok(default)
                    }
                },
                None => {
                    info!("Setting '{}' not found in database, using default: {}", key, default);
                    db::settings::set_setting(pool, key, &default).await?;
                    Ok(default)
                }
            }
        }

        let d = Self::default();
        let settings = Self {
            loader_max_concurrency: get_or_init(pool, "loader_max_concurrency", d.loader_max_concurrency).await?,
            loader_build_timeout_ms: get_or_init(pool, "loader_build_timeout_ms", d.loader_build_timeout_ms).await?,
            stability_check_count: get_or_init(pool, "stability_check_count", d.stability_check_count).await?,
            stability_check_interval_ms: get_or_init(pool, "stability_check_interval_ms", d.stability_check_interval_ms).await?,
            stability_timeout_ms: get_or_init(pool, "stability_timeout_ms", d.stability_timeout_ms).await?,

            switch_event_timeout_ms: get_or_init(pool, "switch_event_timeout_ms", d.switch_event_timeout_ms).await?,
            switch_poll_interval_ms: get_or_init(pool, "switch_poll_interval_ms", d.switch_poll_interval_ms).await?,
            switch_poll_attempts: get_or_init(pool, "switch_poll_attempts", d.switch_poll_attempts).await?,

            save_debounce_ms: get_or_init(pool, "save_debounce_ms", d.save_debounce_ms).await?,
            save_ack_timeout_ms: get_or_init(pool, "save_ack_timeout_ms", d.save_ack_timeout_ms).await?,
            periodic_save_edge_ms: get_or_init(pool, "periodic_save_edge_ms", d.periodic_save_edge_ms).await?,
            periodic_save_interval_ms: get_or_init(pool, "periodic_save_interval_ms", d.periodic_save_interval_ms).await?,
            periodic_save_edge_fraction: get_or_init(pool, "periodic_save_edge_fraction", d.periodic_save_edge_fraction).await?,
            duration_tolerance_ms: get_or_init(pool, "duration_tolerance_ms", d.duration_tolerance_ms).await?,

            sleep_tick_ms: get_or_init(pool, "sleep_tick_ms", d.sleep_tick_ms).await?,
            inactivity_timeout_ms: get_or_init(pool, "inactivity_timeout_ms", d.inactivity_timeout_ms).await?,

            snapshot_interval_ms: get_or_init(pool, "snapshot_interval_ms", d.snapshot_interval_ms).await?,
        }
        .sanitized();

        info!("Loaded runtime settings from database");
        Ok(settings)
    }

    /// Clamp values that would stall a loop or disable a bound
    pub fn sanitized(mut self) -> Self {
        self.loader_max_concurrency = self.loader_max_concurrency.max(1);
        self.stability_check_count = self.stability_check_count.max(1);
        self.stability_check_interval_ms = self.stability_check_interval_ms.max(1);
        self.switch_poll_interval_ms = self.switch_poll_interval_ms.max(1);
        self.periodic_save_edge_ms = self.periodic_save_edge_ms.max(100);
        self.periodic_save_interval_ms = self.periodic_save_interval_ms.max(100);
        if !(0.0..=0.5).contains(&self.periodic_save_edge_fraction) {
            warn!(
                "periodic_save_edge_fraction {} out of range, using 0.10",
                self.periodic_save_edge_fraction
            );
            self.periodic_save_edge_fraction = 0.10;
        }
        self.sleep_tick_ms = self.sleep_tick_ms.max(10);
        self.snapshot_interval_ms = self.snapshot_interval_ms.max(10);
        self
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.loader_build_timeout_ms)
    }

    pub fn stability_check_interval(&self) -> Duration {
        Duration::from_millis(self.stability_check_interval_ms)
    }

    pub fn stability_timeout(&self) -> Duration {
        Duration::from_millis(self.stability_timeout_ms)
    }

    pub fn switch_event_timeout(&self) -> Duration {
        Duration::from_millis(self.switch_event_timeout_ms)
    }

    pub fn switch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.switch_poll_interval_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn save_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.save_ack_timeout_ms)
    }

    pub fn sleep_tick(&self) -> Duration {
        Duration::from_millis(self.sleep_tick_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}

/// Complete application configuration
///
/// Combines bootstrap (TOML) and runtime (database) configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    pub database_path: PathBuf,

    /// Resolved data folder
    pub data_folder: PathBuf,

    pub logging: LoggingConfig,

    /// Database connection pool
    pub db_pool: SqlitePool,

    /// Runtime settings from database
    pub runtime: RuntimeSettings,
}

impl Config {
    /// Load complete configuration from TOML and database
    ///
    /// `toml_path` of `None` runs on built-in bootstrap defaults.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - TOML file cannot be read or parsed
    /// - Database connection fails
    /// - Database settings cannot be loaded
    pub async fn load(toml_path: Option<&Path>, cli_overrides: ConfigOverrides) -> Result<Self> {
        let toml_config = match toml_path {
            Some(path) => {
                let config = TomlConfig::from_file(path).await?;
                info!("Loaded TOML configuration from {:?}", path);
                config
            }
            None => {
                info!("No configuration file, using bootstrap defaults");
                TomlConfig::default()
            }
        };

        let data_folder = resolve_data_folder(
            cli_overrides.data_folder.as_deref(),
            DATA_FOLDER_ENV,
            toml_path,
        );
        info!("Data folder: {:?}", data_folder);

        let database_path = cli_overrides
            .database_path
            .or(toml_config.database_path)
            .unwrap_or_else(|| data_folder.join(DEFAULT_DATABASE_FILE));

        let db_pool = open_database(&database_path).await?;
        let runtime = RuntimeSettings::load(&db_pool).await?;

        Ok(Config {
            database_path,
            data_folder,
            logging: toml_config.logging,
            db_pool,
            runtime,
        })
    }
}

/// Open (creating if needed) the SQLite database and initialize its schema
pub async fn open_database(database_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", database_path.display());
    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Some(Duration::from_secs(60)))
        .connect(&db_url)
        .await?;

    info!("Connected to database: {:?}", database_path);

    db::initialize_database(&db_pool).await?;
    Ok(db_pool)
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub data_folder: Option<PathBuf>,
}
