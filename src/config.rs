//! Process configuration read from the environment (and `.env`).
//!
//! Everything is loaded and validated once in `main`; a missing gateway
//! setting stops the process before any request is served.

use std::env;
use std::str::FromStr;

use crate::payments::providers::vpc::VpcConfig;
use crate::services::payment_service::RefundFailureMode;
use crate::workers::reconciliation::ReconciliationConfig;
use crate::workers::scheduler::SchedulerConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub gateway: VpcConfig,
    pub redirect: RedirectConfig,
    pub reconciliation: ReconciliationConfig,
    pub scheduler: SchedulerConfig,
    pub webhook: WebhookConfig,
    pub logging: LoggingConfig,
    pub refund_failure_mode: RefundFailureMode,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Where transactions are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Browser landing pages after the gateway callback
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    pub success_url: String,
    pub failure_url: String,
    pub error_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub secret: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let store = StoreBackend::from_str(
            &env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string()),
        )?;

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            store,
            database: DatabaseConfig::from_env()?,
            gateway: VpcConfig::from_env()
                .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?,
            redirect: RedirectConfig::from_env(),
            reconciliation: ReconciliationConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            webhook: WebhookConfig::from_env(),
            logging: LoggingConfig::from_env(),
            refund_failure_mode: env::var("REFUND_FAILURE_MODE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.parse::<RefundFailureMode>())
                .transpose()
                .map_err(ConfigError::InvalidValue)?
                .unwrap_or_default(),
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if self.store == StoreBackend::Postgres {
            self.database.validate()?;
        }
        self.gateway
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;
        self.redirect.validate()?;
        self.logging.validate()?;

        if self.scheduler.fallback_interval < self.scheduler.interval {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_FALLBACK_INTERVAL_SECONDS must be >= RECONCILIATION_INTERVAL_SECONDS"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(ConfigError::InvalidValue("STORE_BACKEND".to_string())),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").unwrap_or_default(),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: env::var("DB_RUN_MIGRATIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_RUN_MIGRATIONS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingVariable("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl RedirectConfig {
    pub fn from_env() -> Self {
        RedirectConfig {
            success_url: env::var("REDIRECT_SUCCESS_URL")
                .unwrap_or_else(|_| "/payment/success".to_string()),
            failure_url: env::var("REDIRECT_FAILURE_URL")
                .unwrap_or_else(|_| "/payment/failure".to_string()),
            error_url: env::var("REDIRECT_ERROR_URL")
                .unwrap_or_else(|_| "/payment/error".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("REDIRECT_SUCCESS_URL", &self.success_url),
            ("REDIRECT_FAILURE_URL", &self.failure_url),
            ("REDIRECT_ERROR_URL", &self.error_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue(name.to_string()));
            }
        }
        Ok(())
    }
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        WebhookConfig {
            secret: env::var("WEBHOOK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::secure_hash::SecureHashAlgorithm;
    use std::time::Duration;

    fn gateway() -> VpcConfig {
        VpcConfig {
            payment_url: "https://gateway.example/vpcpay".to_string(),
            query_url: "https://gateway.example/vpcdps".to_string(),
            merchant_id: "TESTMERCHANT".to_string(),
            access_code: "ACCESS01".to_string(),
            secure_secret: "A1B2C3D4E5F60718".to_string(),
            hash_algorithm: SecureHashAlgorithm::Sha256,
            return_url: "https://merchant.example/payments/callback".to_string(),
            ..Default::default()
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            store: StoreBackend::Memory,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 20,
                min_connections: 5,
                connection_timeout: 30,
                idle_timeout: None,
                run_migrations: true,
            },
            gateway: gateway(),
            redirect: RedirectConfig {
                success_url: "/ok".to_string(),
                failure_url: "/failed".to_string(),
                error_url: "/error".to_string(),
            },
            reconciliation: ReconciliationConfig::default(),
            scheduler: SchedulerConfig::default(),
            webhook: WebhookConfig::default(),
            logging: LoggingConfig::default(),
            refund_failure_mode: RefundFailureMode::Distinguish,
        }
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_backend_does_not_need_database_url() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_postgres_backend_requires_database_url() {
        let mut config = config();
        config.store = StoreBackend::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingVariable(name)) if name == "DATABASE_URL"
        ));
    }

    #[test]
    fn test_missing_gateway_fields_fail_validation() {
        let mut config = config();
        config.gateway.secure_secret = String::new();
        config.gateway.merchant_id = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("VPC_SECURE_SECRET"));
        assert!(err.contains("VPC_MERCHANT_ID"));
    }

    #[test]
    fn test_fallback_interval_must_not_be_shorter() {
        let mut config = config();
        config.scheduler = SchedulerConfig {
            interval: Duration::from_secs(600),
            fallback_interval: Duration::from_secs(300),
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!(
            "PostgreSQL".parse::<StoreBackend>().unwrap(),
            StoreBackend::Postgres
        );
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut logging = LoggingConfig::default();
        assert!(logging.validate().is_ok());
        logging.level = "verbose".to_string();
        assert!(logging.validate().is_err());
    }
}
