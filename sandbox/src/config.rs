//! Sandbox configuration.

use std::time::Duration;

use serde::Deserialize;

use ledgerbox_hostapi::ExecutionConfig;

/// Configuration for the contract manager and its Wasmtime engine.
///
/// Missing fields take their defaults, so a partial TOML or JSON document
/// deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 256 pages = 16 MiB. Includes the host allocation region.
    pub max_memory_pages: u32,

    /// Wasmtime fuel limit (instruction metering).
    pub fuel_limit: u64,

    /// Wall-clock budget of one invocation, in milliseconds. Also bounds how
    /// long `exit` waits for in-flight contracts.
    pub timeout_ms: u64,

    /// Period of the epoch ticker. A running contract notices cancellation
    /// or timeout within one interval, or at its next host call.
    pub checkpoint_interval_ms: u64,

    /// Worker threads serving `spawn_query`.
    pub query_workers: usize,

    /// Compiled modules kept in the cache before it is flushed.
    pub module_cache_size: usize,

    /// Per-invocation resource limits (gas, logs, storage, nesting).
    pub execution: ExecutionConfig,
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms.max(1))
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256, // 16 MiB
            fuel_limit: 100_000_000,
            timeout_ms: 1_000,
            checkpoint_interval_ms: 10,
            query_workers: 4,
            module_cache_size: 256,
            execution: ExecutionConfig::default(),
        }
    }
}
