use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub inventory: InventoryConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub worker: WorkerConfig,
    pub refund: RefundConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub json_logs: bool,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки JWT
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

// Внешний сервис рейсов (бронирование и возврат мест)
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    pub base_url: String,
    pub timeout: Duration,
}

// Настройки платежного шлюза
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub gateway_url: String,
    pub merchant_code: String,
    pub terminal_code: String,
    pub merchant_secret: String,
    pub callback_url: String,
    pub timeout: Duration,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

// Фоновый процесс истечения неоплаченных броней
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// 0 means run until shutdown.
    pub iterations: u32,
    pub concurrency: usize,
    pub batch_limit: i64,
    pub grace_period: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            iterations: 0,
            concurrency: 4,
            batch_limit: 100,
            grace_period: Duration::from_secs(15 * 60),
        }
    }
}

// Повторные попытки возврата платежа
#[derive(Debug, Clone, Deserialize)]
pub struct RefundConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RefundConfig {
    /// Exponential backoff before the given retry, `attempt` starting at 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn string_or(key: &'static str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

fn millis_or(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(key, default).map(Duration::from_millis)
}

fn secs_or(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_or(key, default).map(Duration::from_secs)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let worker_defaults = WorkerConfig::default();
        let refund_defaults = RefundConfig::default();

        Ok(Config {
            app: AppConfig {
                host: string_or("HOST", "0.0.0.0"),
                port: parse_or("PORT", 8000)?,
                rust_log: string_or("RUST_LOG", "flight_reservation=debug,tower_http=debug"),
                json_logs: string_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parse_or("DB_POOL_SIZE", 20)?,
            },
            jwt: JwtConfig {
                secret: required("JWT_SECRET")?,
            },
            inventory: InventoryConfig {
                base_url: string_or("INVENTORY_API_URL", "http://localhost:3000"),
                timeout: millis_or("INVENTORY_TIMEOUT_MS", 5_000)?,
            },
            payment: PaymentConfig {
                gateway_url: string_or("PAYMENT_GATEWAY_URL", "http://localhost:3001"),
                merchant_code: required("MERCHANT_CODE")?,
                terminal_code: required("TERMINAL_CODE")?,
                merchant_secret: required("MERCHANT_SECRET")?,
                callback_url: string_or(
                    "PAYMENT_CALLBACK_URL",
                    "http://localhost:8000/api/payments/callback",
                ),
                timeout: millis_or("PAYMENT_TIMEOUT_MS", 10_000)?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                cooldown: secs_or("CIRCUIT_BREAKER_COOLDOWN_SECONDS", 60)?,
            },
            worker: WorkerConfig {
                enabled: parse_or("WORKER_ENABLED", worker_defaults.enabled)?,
                interval: secs_or("WORKER_INTERVAL_SECONDS", worker_defaults.interval.as_secs())?,
                iterations: parse_or("WORKER_ITERATIONS", worker_defaults.iterations)?,
                concurrency: parse_or("WORKER_CONCURRENCY", worker_defaults.concurrency)?,
                batch_limit: parse_or("WORKER_BATCH_LIMIT", worker_defaults.batch_limit)?,
                grace_period: secs_or(
                    "RESERVATION_GRACE_PERIOD_SECONDS",
                    worker_defaults.grace_period.as_secs(),
                )?,
            },
            refund: RefundConfig {
                max_attempts: parse_or("REFUND_MAX_ATTEMPTS", refund_defaults.max_attempts)?,
                initial_backoff: millis_or(
                    "REFUND_INITIAL_BACKOFF_MS",
                    refund_defaults.initial_backoff.as_millis() as u64,
                )?,
                max_backoff: millis_or(
                    "REFUND_MAX_BACKOFF_MS",
                    refund_defaults.max_backoff.as_millis() as u64,
                )?,
            },
        })
    }
}
