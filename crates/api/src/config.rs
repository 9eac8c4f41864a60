//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `DATABASE_URL` — PostgreSQL connection string (optional; the server
///   falls back to in-memory storage when unset)
/// - `BANK_VERIFICATION_HOURS` — how long an unverified bank transfer may
///   stay pending before the sweep expires it (default: `48`)
/// - `BANK_SWEEP_INTERVAL_SECS` — how often the expiry sweep runs
///   (default: `300`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub bank_verification_hours: i64,
    pub bank_sweep_interval: Duration,
    pub log_level: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: std::env::var("DATABASE_URL").ok(),
            bank_verification_hours: std::env::var("BANK_VERIFICATION_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(48),
            bank_sweep_interval: Duration::from_secs(
                std::env::var("BANK_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            bank_verification_hours: 48,
            bank_sweep_interval: Duration::from_secs(300),
            log_level: "info".to_string(),
        }
    }
}
