//! Runtime configuration for the orchestration core.
//!
//! Everything here has a programmatic default, so the crate works with zero
//! configuration; environment variables and an optional `.env` file (via
//! `dotenv`) let a deployment override the defaults without recompiling.
//! Loading goes through the `config` crate rather than hand-rolled
//! `std::env::var` parsing, so additional sources (files, profiles) can be
//! layered in later without touching `RuntimeConfig` itself.

use crate::error::{OrchestratorError, Result};
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Default per-request timeout for the stdio tool-client transport, in
/// milliseconds. Overridable by `AGENTICCODER_MCP_STDIO_TIMEOUT_MS`.
pub const DEFAULT_STDIO_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Enhanced message bus processor tick cadence.
    pub bus_tick_ms: u64,
    /// Base message bus ring-buffer history cap.
    pub max_history_size: usize,
    /// Enhanced bus default `maxRetries` before dead-lettering.
    pub max_retries: u32,
    /// Enhanced bus base backoff for retried deliveries.
    pub retry_base_backoff_ms: u64,
    /// Enhanced bus backoff multiplier.
    pub retry_multiplier: f64,
    /// Enhanced bus backoff cap.
    pub retry_max_backoff_ms: u64,
    /// Soft cap logged as a warning once the dead-letter queue grows past it.
    /// Entries are never silently dropped; this is observability only.
    pub dlq_soft_limit: usize,
    /// Default per-request timeout for the stdio tool-client transport.
    pub stdio_timeout_ms: u64,
    /// Size of the stdio client's bounded stderr/stdout diagnostic ring buffer, in bytes.
    pub stdio_diagnostic_buffer_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_tick_ms: 100,
            max_history_size: 1000,
            max_retries: 3,
            retry_base_backoff_ms: 1_000,
            retry_multiplier: 2.0,
            retry_max_backoff_ms: 30_000,
            dlq_soft_limit: 500,
            stdio_timeout_ms: DEFAULT_STDIO_TIMEOUT_MS,
            stdio_diagnostic_buffer_bytes: 24 * 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn bus_tick(&self) -> Duration {
        Duration::from_millis(self.bus_tick_ms)
    }

    pub fn stdio_timeout(&self) -> Duration {
        Duration::from_millis(self.stdio_timeout_ms)
    }

    pub fn retry_backoff(&self, retry_count: u32) -> Duration {
        let scaled = self.retry_base_backoff_ms as f64 * self.retry_multiplier.powi(retry_count as i32);
        Duration::from_millis((scaled as u64).min(self.retry_max_backoff_ms))
    }

    /// Load configuration from the process environment (and `.env`, if present),
    /// falling back to defaults for anything unset.
    ///
    /// Every field reads from `ORCHESTRATOR_<FIELD_NAME>` via a `config::Environment`
    /// source (e.g. `ORCHESTRATOR_BUS_TICK_MS` -> `bus_tick_ms`); the double-underscore
    /// nesting separator keeps a single underscore inside a field name from being
    /// read as a nested path. Two historical variable names predate that convention
    /// and are layered on top as explicit overrides for backward compatibility.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("bus_tick_ms", defaults.bus_tick_ms as i64)
            .and_then(|b| b.set_default("max_history_size", defaults.max_history_size as i64))
            .and_then(|b| b.set_default("max_retries", defaults.max_retries as i64))
            .and_then(|b| b.set_default("retry_base_backoff_ms", defaults.retry_base_backoff_ms as i64))
            .and_then(|b| b.set_default("retry_multiplier", defaults.retry_multiplier))
            .and_then(|b| b.set_default("retry_max_backoff_ms", defaults.retry_max_backoff_ms as i64))
            .and_then(|b| b.set_default("dlq_soft_limit", defaults.dlq_soft_limit as i64))
            .and_then(|b| b.set_default("stdio_timeout_ms", defaults.stdio_timeout_ms as i64))
            .and_then(|b| b.set_default("stdio_diagnostic_buffer_bytes", defaults.stdio_diagnostic_buffer_bytes as i64))
            .map_err(|err| OrchestratorError::Config(err.to_string()))?
            .add_source(
                Environment::with_prefix("ORCHESTRATOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(v) = std::env::var("ORCHESTRATOR_DLQ_LIMIT") {
            builder = builder
                .set_override("dlq_soft_limit", v)
                .map_err(|err| OrchestratorError::Config(err.to_string()))?;
        }
        if let Ok(v) = std::env::var("AGENTICCODER_MCP_STDIO_TIMEOUT_MS") {
            builder = builder
                .set_override("stdio_timeout_ms", v)
                .map_err(|err| OrchestratorError::Config(err.to_string()))?;
        }

        let built = builder.build().map_err(|err| OrchestratorError::Config(err.to_string()))?;
        built.try_deserialize::<Self>().map_err(|err| OrchestratorError::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.bus_tick_ms, 100);
        assert_eq!(cfg.stdio_timeout_ms, DEFAULT_STDIO_TIMEOUT_MS);
    }

    #[test]
    fn retry_backoff_respects_cap() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.retry_backoff(0), Duration::from_millis(1_000));
        assert_eq!(cfg.retry_backoff(1), Duration::from_millis(2_000));
        assert_eq!(cfg.retry_backoff(10), Duration::from_millis(30_000));
    }

    // Environment variables are process-global, so this test owns and restores
    // every var it touches rather than running in parallel with the others.
    #[test]
    fn from_env_overlays_prefixed_vars_and_the_legacy_alias() {
        std::env::set_var("ORCHESTRATOR_BUS_TICK_MS", "250");
        std::env::set_var("ORCHESTRATOR_DLQ_LIMIT", "42");
        std::env::remove_var("AGENTICCODER_MCP_STDIO_TIMEOUT_MS");

        let cfg = RuntimeConfig::from_env().unwrap();
        assert_eq!(cfg.bus_tick_ms, 250);
        assert_eq!(cfg.dlq_soft_limit, 42);
        assert_eq!(cfg.stdio_timeout_ms, DEFAULT_STDIO_TIMEOUT_MS);

        std::env::remove_var("ORCHESTRATOR_BUS_TICK_MS");
        std::env::remove_var("ORCHESTRATOR_DLQ_LIMIT");
    }
}
