/// Configuration management for the flow engine
///
/// Database location, engine limits and the resumption sweep. Every value
/// can be overridden through a `CONVOFLOW_*` environment variable.

use crate::runtime::{dispatcher::DEFAULT_SWEEP_BATCH, scheduler::DEFAULT_SWEEP_SCHEDULE, ErrorPolicy};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub sweep: SweepConfig,
}

/// SQLite storage for flows, conversations and paused flows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the database file (default: "data")
    pub data_dir: String,
    /// Database file name inside `data_dir`
    pub file_name: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for `apiRequest` nodes that do not set `timeoutMs`
    pub http_timeout_ms: u64,
    /// Steps one traversal may take before it is aborted
    pub max_steps: usize,
    /// Reject authoring mistakes instead of skipping over them
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Cron expression with a seconds field
    pub schedule: String,
    /// Due records resumed per sweep
    pub batch_size: usize,
}

impl Config {
    pub fn policy(&self) -> ErrorPolicy {
        if self.engine.strict {
            ErrorPolicy::Strict
        } else {
            ErrorPolicy::Permissive
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                data_dir: std::env::var("CONVOFLOW_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                file_name: std::env::var("CONVOFLOW_DB_FILE")
                    .unwrap_or_else(|_| "convoflow.db".to_string()),
                max_connections: env_or("CONVOFLOW_DB_MAX_CONNECTIONS", 5),
            },
            engine: EngineConfig {
                http_timeout_ms: env_or("CONVOFLOW_HTTP_TIMEOUT_MS", 15_000),
                max_steps: env_or("CONVOFLOW_MAX_STEPS", 1_000),
                strict: env_or("CONVOFLOW_STRICT", false),
            },
            sweep: SweepConfig {
                schedule: std::env::var("CONVOFLOW_SWEEP_SCHEDULE")
                    .unwrap_or_else(|_| DEFAULT_SWEEP_SCHEDULE.to_string()),
                batch_size: env_or("CONVOFLOW_SWEEP_BATCH", DEFAULT_SWEEP_BATCH),
            },
        }
    }
}
