use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::requests::RetryPolicy;

const DEFAULT_DWELL_SECS: u64 = 10;
const DEFAULT_STORE_MAX_RETRIES: u32 = 3;
const DEFAULT_STORE_BACKOFF_MS: u64 = 200;
const DEFAULT_STORE_MAX_BACKOFF_MS: u64 = 5_000;
const DEFAULT_IDEMPOTENCY_WINDOW_SECS: u64 = 600;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub lifecycle: LifecycleConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dwell_secs = numeric_var("BOOKING_DWELL_SECS", DEFAULT_DWELL_SECS)?;
        let max_retries = numeric_var("BOOKING_STORE_MAX_RETRIES", DEFAULT_STORE_MAX_RETRIES)?;
        let backoff_ms = numeric_var("BOOKING_STORE_BACKOFF_MS", DEFAULT_STORE_BACKOFF_MS)?;
        let max_backoff_ms =
            numeric_var("BOOKING_STORE_MAX_BACKOFF_MS", DEFAULT_STORE_MAX_BACKOFF_MS)?;
        let idempotency_window_secs = numeric_var(
            "BOOKING_IDEMPOTENCY_WINDOW_SECS",
            DEFAULT_IDEMPOTENCY_WINDOW_SECS,
        )?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            lifecycle: LifecycleConfig {
                dwell: Duration::from_secs(dwell_secs),
                store_retry: RetryPolicy {
                    max_retries,
                    backoff: Duration::from_millis(backoff_ms),
                    backoff_factor: 2,
                    max_backoff: Duration::from_millis(max_backoff_ms),
                },
                idempotency_window: Duration::from_secs(idempotency_window_secs),
            },
        })
    }
}

fn numeric_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { variable: name }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Dwell interval and store retry budget shared by submission and the scheduler.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub dwell: Duration,
    pub store_retry: RetryPolicy,
    /// How long a submission's idempotency token is remembered after it was first seen.
    pub idempotency_window: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(DEFAULT_DWELL_SECS),
            store_retry: RetryPolicy::default(),
            idempotency_window: Duration::from_secs(DEFAULT_IDEMPOTENCY_WINDOW_SECS),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
