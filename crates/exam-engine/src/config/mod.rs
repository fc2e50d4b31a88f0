use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

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
    pub engine: EngineConfig,
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                include_targets: false,
                ansi: environment == AppEnvironment::Development,
            },
            engine: EngineConfig::from_env()?,
        })
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub include_targets: bool,
    pub ansi: bool,
}

/// Tuning knobs for identifier allocation, optimistic writes, and the overdue sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Candidates tried before falling back to a timestamp suffix.
    pub identifier_attempts: u32,
    /// Whole generate-and-insert cycles retried on insert-time uniqueness violations.
    pub identifier_insert_retries: u32,
    pub access_id_length: usize,
    pub access_secret_length: usize,
    pub registration_prefix: String,
    pub registration_width: usize,
    /// Optimistic-lock retries for result-row writes.
    pub write_retries: u32,
    pub sweep_workers: usize,
    pub sweep_interval_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identifier_attempts: 10,
            identifier_insert_retries: 5,
            access_id_length: 10,
            access_secret_length: 16,
            registration_prefix: "REG".to_string(),
            registration_width: 5,
            write_retries: 3,
            sweep_workers: 4,
            sweep_interval_secs: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            identifier_attempts: parse_var("EXAM_ID_ATTEMPTS", defaults.identifier_attempts)?,
            identifier_insert_retries: parse_var(
                "EXAM_ID_INSERT_RETRIES",
                defaults.identifier_insert_retries,
            )?,
            access_id_length: parse_var("EXAM_ACCESS_ID_LENGTH", defaults.access_id_length)?,
            access_secret_length: parse_var(
                "EXAM_ACCESS_SECRET_LENGTH",
                defaults.access_secret_length,
            )?,
            registration_prefix: env::var("EXAM_REGISTRATION_PREFIX")
                .unwrap_or(defaults.registration_prefix),
            registration_width: parse_var("EXAM_REGISTRATION_WIDTH", defaults.registration_width)?,
            write_retries: parse_var("EXAM_WRITE_RETRIES", defaults.write_retries)?,
            sweep_workers: parse_var("EXAM_SWEEP_WORKERS", defaults.sweep_workers)?,
            sweep_interval_secs: match env::var("EXAM_SWEEP_INTERVAL_SECS") {
                Ok(raw) if !raw.trim().is_empty() => {
                    Some(raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                        variable: "EXAM_SWEEP_INTERVAL_SECS",
                        value: raw.clone(),
                    })?)
                }
                _ => None,
            },
        })
    }
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber {
                variable,
                value: raw,
            }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} must be a non-negative integer, got '{value}'")
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

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) fn env_guard() -> &'static std::sync::Mutex<()> {
    static GUARD: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    GUARD.get_or_init(|| std::sync::Mutex::new(()))
}
