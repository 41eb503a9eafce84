use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub accumulator: AccumulatorConfig,
    pub governance: GovernanceConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Durable-store backend selection for the governance engine. `DATABASE_URL`
/// selects Postgres; its absence falls back to the in-memory store so the
/// crate and its tests run without a live database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Stream accumulator tuning: entry time-to-live and background sweep cadence
/// (see the accumulator's cleanup pass).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    pub entry_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub pool_prewarm_size: usize,
}

/// Governance engine tuning: how often the reset ticker scans for
/// budgets/rate limits whose window has elapsed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub reset_tick_interval_secs: u64,
    pub reconciler_queue_capacity: usize,
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "gateway-core".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| AppError::Configuration("SERVER_PORT must be a valid port number".to_string()))?;

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let database_url = env::var("DATABASE_URL").ok();
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .map_err(|_| {
                AppError::Configuration("DATABASE_MAX_CONNECTIONS must be a valid number".to_string())
            })?;

        let entry_ttl_secs = env::var("ACCUMULATOR_ENTRY_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration("ACCUMULATOR_ENTRY_TTL_SECS must be a valid number".to_string())
            })?;

        let sweep_interval_secs = env::var("ACCUMULATOR_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration(
                    "ACCUMULATOR_SWEEP_INTERVAL_SECS must be a valid number".to_string(),
                )
            })?;

        let pool_prewarm_size = env::var("ACCUMULATOR_POOL_PREWARM_SIZE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<usize>()
            .map_err(|_| {
                AppError::Configuration(
                    "ACCUMULATOR_POOL_PREWARM_SIZE must be a valid number".to_string(),
                )
            })?;

        let reset_tick_interval_secs = env::var("GOVERNANCE_RESET_TICK_INTERVAL_SECS")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Configuration(
                    "GOVERNANCE_RESET_TICK_INTERVAL_SECS must be a valid number".to_string(),
                )
            })?;

        let reconciler_queue_capacity = env::var("GOVERNANCE_RECONCILER_QUEUE_CAPACITY")
            .unwrap_or_else(|_| "1024".to_string())
            .parse::<usize>()
            .map_err(|_| {
                AppError::Configuration(
                    "GOVERNANCE_RECONCILER_QUEUE_CAPACITY must be a valid number".to_string(),
                )
            })?;

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            accumulator: AccumulatorConfig {
                entry_ttl_secs,
                sweep_interval_secs,
                pool_prewarm_size,
            },
            governance: GovernanceConfig {
                reset_tick_interval_secs,
                reconciler_queue_capacity,
            },
        })
    }
}
