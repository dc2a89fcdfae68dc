//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub host: String,
    pub port: u16,
    /// Minutes after session start during which a scan counts as present.
    pub grace_minutes: u32,
    /// Minutes after session start at which unscanned students become absent.
    pub hard_timeout_minutes: u32,
    pub batch_window_ms: u64,
    pub cooldown_max_hold_secs: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub retry_max_attempts: u32,
    pub scan_quiet_ms: u64,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Missing or malformed numeric values fall back to their defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "rfid-attendance".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "attendance=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "attendance.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/attendance.db".into()),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: parsed_or("PORT", 3000),
            grace_minutes: parsed_or("ATTENDANCE_GRACE_MINUTES", 5),
            hard_timeout_minutes: parsed_or("ATTENDANCE_HARD_TIMEOUT_MINUTES", 30),
            batch_window_ms: parsed_or("ATTENDANCE_BATCH_WINDOW_MS", 2_000),
            cooldown_max_hold_secs: parsed_or("ATTENDANCE_COOLDOWN_MAX_HOLD_SECS", 30),
            retry_base_ms: parsed_or("ATTENDANCE_RETRY_BASE_MS", 500),
            retry_max_ms: parsed_or("ATTENDANCE_RETRY_MAX_MS", 30_000),
            retry_max_attempts: parsed_or("ATTENDANCE_RETRY_MAX_ATTEMPTS", 5),
            scan_quiet_ms: parsed_or("ATTENDANCE_SCAN_QUIET_MS", 100),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock cannot be acquired.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().expect("Failed to acquire AppConfig write lock");
            *guard = AppConfig::from_env();
        }
    }

    /// Generic internal setter for any field in the config.
    ///
    /// Used by public per-field setter methods.
    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_grace_minutes(value: u32) {
        AppConfig::set_field(|cfg| cfg.grace_minutes = value);
    }

    pub fn set_hard_timeout_minutes(value: u32) {
        AppConfig::set_field(|cfg| cfg.hard_timeout_minutes = value);
    }

    pub fn set_batch_window_ms(value: u64) {
        AppConfig::set_field(|cfg| cfg.batch_window_ms = value);
    }

    pub fn set_retry_max_attempts(value: u32) {
        AppConfig::set_field(|cfg| cfg.retry_max_attempts = value);
    }
}
