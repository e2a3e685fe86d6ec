//! Configuration loading and representation.

use thiserror::Error;

use stockledger_inventory::{DEFAULT_CRITICAL_THRESHOLD, DEFAULT_MIN_THRESHOLD, Thresholds};

pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid default thresholds: {0}")]
    Thresholds(String),

    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,
}

/// Which backend holds records and the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Commit attempts per movement before a conflict is surfaced (at least 1).
    pub max_commit_attempts: u32,
    /// Thresholds given to records created lazily by their first movement.
    pub default_thresholds: Thresholds,
    pub backend: StoreBackend,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            default_thresholds: Thresholds::default(),
            backend: StoreBackend::InMemory,
        }
    }
}

impl LedgerConfig {
    /// Load from the process environment.
    ///
    /// - `STOCKLEDGER_MAX_COMMIT_ATTEMPTS`
    /// - `STOCKLEDGER_DEFAULT_MIN_THRESHOLD`, `STOCKLEDGER_DEFAULT_CRITICAL_THRESHOLD`
    /// - `USE_PERSISTENT_STORES`, `DATABASE_URL`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_commit_attempts = parse_or(
            &lookup,
            "STOCKLEDGER_MAX_COMMIT_ATTEMPTS",
            DEFAULT_MAX_COMMIT_ATTEMPTS,
        )
        .max(1);

        let min = parse_or(&lookup, "STOCKLEDGER_DEFAULT_MIN_THRESHOLD", DEFAULT_MIN_THRESHOLD);
        let critical = parse_or(
            &lookup,
            "STOCKLEDGER_DEFAULT_CRITICAL_THRESHOLD",
            DEFAULT_CRITICAL_THRESHOLD,
        );
        let default_thresholds =
            Thresholds::new(min, critical).map_err(|e| ConfigError::Thresholds(e.to_string()))?;

        let use_persistent = lookup("USE_PERSISTENT_STORES")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let backend = if use_persistent {
            let database_url = lookup("DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            StoreBackend::Postgres { database_url }
        } else {
            StoreBackend::InMemory
        };

        Ok(Self {
            max_commit_attempts,
            default_thresholds,
            backend,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: core::str::FromStr + core::fmt::Display + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, %default, "invalid config value; using default");
            default
        }),
    }
}
