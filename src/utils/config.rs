// src/utils/config.rs
//! Engine configuration loading
//!
//! Layered configuration: defaults, then an optional `gantry` file
//! (TOML/YAML/JSON, whatever `config` recognizes), then `GANTRY__*`
//! environment variables. `GANTRY__POOL__MAX_SIZE=16` overrides
//! `pool.max_size`, for example.

use crate::runtime::factory::FactoryConfig;
use crate::runtime::pool::PoolConfig;
use crate::runtime::process::InterpreterKind;
use crate::utils::errors::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pool sizing and timing
    pub pool: PoolSettings,

    /// Runtime construction parameters
    pub runtime: RuntimeSettings,
}

/// Pool sizing and timing knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Runtimes created eagerly at start and kept through eviction
    pub min_size: usize,

    /// Hard cap on live runtimes (idle + in-use + under construction)
    pub max_size: usize,

    /// Default acquire budget in milliseconds
    pub acquire_timeout_ms: u64,

    /// Idle age after which a runtime becomes eligible for eviction
    pub idle_eviction_age_secs: u64,

    /// How long shutdown waits for in-flight requests to finish
    pub drain_timeout_secs: u64,

    /// Interval between idle-eviction sweeps
    pub sweep_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 8,
            acquire_timeout_ms: 30_000,
            idle_eviction_age_secs: 300,
            drain_timeout_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

/// Runtime construction parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Interpreter backing each runtime
    pub interpreter: InterpreterKind,

    /// Application root the interpreter is started in
    pub app_root: PathBuf,

    /// Extra environment variables for the interpreter process
    pub env_vars: Vec<(String, String)>,

    /// Start interpreters with a scrubbed host environment
    pub clear_host_env: bool,

    /// Per-request execution budget in seconds
    pub execute_timeout_secs: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            interpreter: InterpreterKind::Ruby,
            app_root: PathBuf::from("."),
            env_vars: vec![],
            clear_host_env: false,
            execute_timeout_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("gantry").required(false))
            .add_source(config::Environment::with_prefix("GANTRY").separator("__"))
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Pool configuration derived from these settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_size: self.pool.min_size,
            max_size: self.pool.max_size,
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
            idle_eviction_age: Duration::from_secs(self.pool.idle_eviction_age_secs),
        }
    }

    /// Factory configuration derived from these settings
    pub fn factory_config(&self) -> FactoryConfig {
        FactoryConfig {
            interpreter: self.runtime.interpreter,
            app_root: self.runtime.app_root.clone(),
            env_vars: self.runtime.env_vars.clone(),
            clear_host_env: self.runtime.clear_host_env,
            execute_timeout: Duration::from_secs(self.runtime.execute_timeout_secs),
        }
    }

    /// Drain budget for `RuntimePool::shutdown`
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.drain_timeout_secs)
    }

    /// Sweep interval for the maintenance task
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.pool.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.pool.min_size, 2);
        assert_eq!(cfg.pool.max_size, 8);
        assert_eq!(cfg.runtime.interpreter, InterpreterKind::Ruby);
    }

    #[test]
    fn test_pool_config_conversion() {
        let cfg = EngineConfig::default();
        let pool = cfg.pool_config();
        assert_eq!(pool.min_size, 2);
        assert_eq!(pool.max_size, 8);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(30));
        assert_eq!(pool.idle_eviction_age, Duration::from_secs(300));
    }

    #[test]
    fn test_min_never_exceeds_max_by_default() {
        let cfg = EngineConfig::default();
        assert!(cfg.pool.min_size <= cfg.pool.max_size);
    }
}
