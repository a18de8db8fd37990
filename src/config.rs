use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Environment switch for per-transfer diagnostic tracing.
pub const VERBOSE_ENV: &str = "COURIER_TRANSPORT_VERBOSE";

/// Returns true when `COURIER_TRANSPORT_VERBOSE` is set.
///
/// The environment is consulted once; the answer is cached for the
/// lifetime of the process.
pub fn verbose_enabled() -> bool {
    static VERBOSE: OnceLock<bool> = OnceLock::new();
    *VERBOSE.get_or_init(|| std::env::var_os(VERBOSE_ENV).is_some())
}

/// Tuning knobs for the dispatcher and the default handle factory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound on advance-work calls per loop iteration.
    pub max_perform_passes: usize,
    /// Upper bound on a single readiness wait while transfers are active.
    pub poll_timeout_ms: u64,
    /// Time active transfers are given to finish once shutdown starts.
    pub shutdown_grace_ms: u64,
    /// Maximum number of live handles; 0 means unlimited.
    pub max_handles: usize,
    /// Number of released handles kept for reuse.
    pub max_idle_handles: usize,
    /// Appended to every request's user agent.
    pub user_agent_suffix: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_perform_passes: 16,
            poll_timeout_ms: 1000,
            shutdown_grace_ms: 5000,
            max_handles: 0,
            max_idle_handles: 32,
            user_agent_suffix: format!("courier/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TransportConfig {
    /// Builds a config from `COURIER_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            max_perform_passes: env_or("COURIER_MAX_PERFORM_PASSES", defaults.max_perform_passes),
            poll_timeout_ms: env_or("COURIER_POLL_TIMEOUT_MS", defaults.poll_timeout_ms),
            shutdown_grace_ms: env_or("COURIER_SHUTDOWN_GRACE_MS", defaults.shutdown_grace_ms),
            max_handles: env_or("COURIER_MAX_HANDLES", defaults.max_handles),
            max_idle_handles: env_or("COURIER_MAX_IDLE_HANDLES", defaults.max_idle_handles),
            user_agent_suffix: defaults.user_agent_suffix,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("Invalid transport config")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, "Ignoring unparsable config value");
            default
        }),
        Err(_) => default,
    }
}
