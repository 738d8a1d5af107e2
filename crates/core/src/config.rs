use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("true") | Some("1") | Some("yes") => true,
        Some("false") | Some("0") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub timers: TimerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LAPSE_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LAPSE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            timers: TimerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  timers:      reconcile_every={}s, poll={}ms, max_attempts={}, rehydrate_on_boot={}",
            self.timers.reconcile_interval_secs,
            self.timers.poll_interval_ms,
            self.timers.max_attempts,
            self.timers.rehydrate_on_boot
        );
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
    /// Full URL override (`PG_URL`); takes precedence over the discrete fields.
    pub url: Option<String>,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "lapse"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
            url: profiled_env_opt(p, "PG_URL"),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Timers ────────────────────────────────────────────────────

const MAX_RETRY_BACKOFF_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Cadence of the consistency sweep.
    pub reconcile_interval_secs: u64,
    /// How often the local job queue checks for due jobs.
    pub poll_interval_ms: u64,
    /// Deliveries per job before a retryable failure is dropped.
    pub max_attempts: u32,
    /// Delay added per attempt when a delivery asks to be retried.
    pub retry_backoff_secs: u64,
    /// Resubmit every pending timer (not only due ones) on startup.
    pub rehydrate_on_boot: bool,
}

impl TimerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            reconcile_interval_secs: profiled_env_u64(p, "TIMER_RECONCILE_INTERVAL_SECS", 300),
            poll_interval_ms: profiled_env_u64(p, "TIMER_POLL_INTERVAL_MS", 1000),
            max_attempts: profiled_env_u32(p, "TIMER_MAX_ATTEMPTS", 5),
            retry_backoff_secs: profiled_env_u64(p, "TIMER_RETRY_BACKOFF_SECS", 30),
            rehydrate_on_boot: profiled_env_bool(p, "TIMER_REHYDRATE_ON_BOOT", true),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    /// Capped at one day.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs.min(MAX_RETRY_BACKOFF_SECS))
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 300,
            poll_interval_ms: 1000,
            max_attempts: 5,
            retry_backoff_secs: 30,
            rehydrate_on_boot: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_config_defaults() {
        let config = TimerConfig::default();
        assert_eq!(config.reconcile_interval(), Duration::from_secs(300));
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
        assert_eq!(config.max_attempts, 5);
        assert!(config.rehydrate_on_boot);
    }

    #[test]
    fn retry_backoff_is_capped() {
        let config = TimerConfig { retry_backoff_secs: 10_000_000_000_000, ..TimerConfig::default() };
        assert_eq!(config.retry_backoff(), Duration::from_secs(86_400));
    }

    #[test]
    fn poll_interval_has_floor() {
        let config = TimerConfig { poll_interval_ms: 0, ..TimerConfig::default() };
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn url_overrides_discrete_fields() {
        let pg = PostgresConfig {
            host: "db".into(),
            port: 5433,
            database: "timers".into(),
            username: Some("app".into()),
            password: Some("secret".into()),
            ssl_mode: "disable".into(),
            max_connections: 4,
            url: None,
        };
        assert_eq!(
            pg.connection_string(),
            "postgres://app:secret@db:5433/timers?sslmode=disable"
        );

        let pg = PostgresConfig { url: Some("postgres://elsewhere/x".into()), ..pg };
        assert_eq!(pg.connection_string(), "postgres://elsewhere/x");
        assert!(pg.is_configured());
    }
}
