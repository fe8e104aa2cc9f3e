//! Server configuration loaded from environment variables.
//!
//! All settings have defaults. Override any variable at container / process
//! startup; no config file required.
//!
//! | Variable                          | Default | Description                                   |
//! |-----------------------------------|---------|-----------------------------------------------|
//! | `GARVEN_PORT`                     | `8002`  | HTTP + WebSocket listen port                  |
//! | `GARVEN_LOG_LEVEL`                | `info`  | tracing level (trace/debug/info/warn/error)   |
//! | `GARVEN_API_KEY`                  | unset   | `X-API-KEY` for HTTP routes (unset = no auth) |
//! | `GARVEN_SECRET_KEY`               | `""`    | Shared secret clusters identify with          |
//! | `GARVEN_OVERRIDE_KEY`             | unset   | Secret allowing a connection to be replaced   |
//! | `GARVEN_IDENTIFY_TIMEOUT_SECS`    | `5`     | Time a new socket has to identify             |
//! | `GARVEN_REQUEST_TIMEOUT_SECS`     | `5`     | Per-cluster deadline for routed requests      |
//! | `GARVEN_MAX_CONSECUTIVE_TIMEOUTS` | `0`     | Drop a cluster after N timeouts (0 = never)   |
//! | `GARVEN_CLUSTER_COUNT`            | `11`    | Clusters expected to answer aggregates        |
//! | `GARVEN_TOTAL_SHARDS`             | `66`    | Shards across the whole bot                   |
//! | `GARVEN_SHARDS_PER_CLUSTER`       | `6`     | Shards owned by each cluster                  |

use std::time::Duration;

use garven_cluster::{HubConfig, IdentifyConfig};

/// Runtime configuration for the hub process.
pub struct Config {
    /// HTTP listen port.
    pub port: u16,

    /// Tracing filter string, e.g. `"garven_cluster=debug,info"`.
    pub log_level: String,

    /// API key required on HTTP routes. `None` disables the check.
    pub api_key: Option<String>,

    // ── Cluster handshake ────────────────────────────────────────────────────
    pub secret_key: String,
    pub override_key: Option<String>,
    pub identify_timeout_secs: u64,

    // ── Requests ─────────────────────────────────────────────────────────────
    pub request_timeout_secs: u64,
    pub max_consecutive_timeouts: u32,

    // ── Topology ─────────────────────────────────────────────────────────────
    pub cluster_count: usize,
    pub total_shards: u64,
    pub shards_per_cluster: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("api_key_set", &self.api_key.is_some())
            .field("override_enabled", &self.override_key.is_some())
            .field("identify_timeout_secs", &self.identify_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_consecutive_timeouts", &self.max_consecutive_timeouts)
            .field("cluster_count", &self.cluster_count)
            .field("total_shards", &self.total_shards)
            .field("shards_per_cluster", &self.shards_per_cluster)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables, applying defaults where
    /// a variable is absent or unparseable.
    pub fn from_env() -> Self {
        Self {
            port:                     env_parse("GARVEN_PORT", 8002_u16),
            log_level:                env_str("GARVEN_LOG_LEVEL", "info"),
            api_key:                  env_opt("GARVEN_API_KEY"),
            secret_key:               env_str("GARVEN_SECRET_KEY", ""),
            override_key:             env_opt("GARVEN_OVERRIDE_KEY"),
            identify_timeout_secs:    env_parse("GARVEN_IDENTIFY_TIMEOUT_SECS", 5),
            request_timeout_secs:     env_parse("GARVEN_REQUEST_TIMEOUT_SECS", 5),
            max_consecutive_timeouts: env_parse("GARVEN_MAX_CONSECUTIVE_TIMEOUTS", 0),
            cluster_count:            env_parse("GARVEN_CLUSTER_COUNT", 11),
            total_shards:             env_parse("GARVEN_TOTAL_SHARDS", 66),
            shards_per_cluster:       env_parse("GARVEN_SHARDS_PER_CLUSTER", 6),
        }
    }

    /// The part of the configuration the cluster hub consumes.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            identify: IdentifyConfig {
                secret_key:   self.secret_key.clone(),
                override_key: self.override_key.clone(),
                timeout:      Duration::from_secs(self.identify_timeout_secs),
            },
            request_timeout:          Duration::from_secs(self.request_timeout_secs),
            max_consecutive_timeouts: self.max_consecutive_timeouts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port:                     8002,
            log_level:                "info".into(),
            api_key:                  None,
            secret_key:               String::new(),
            override_key:             None,
            identify_timeout_secs:    5,
            request_timeout_secs:     5,
            max_consecutive_timeouts: 0,
            cluster_count:            11,
            total_shards:             66,
            shards_per_cluster:       6,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.port > 0);
        assert!(cfg.cluster_count > 0);
        assert!(cfg.shards_per_cluster > 0);
        assert_eq!(cfg.total_shards, cfg.cluster_count as u64 * cfg.shards_per_cluster);
    }

    #[test]
    fn env_override_applied() {
        std::env::set_var("GARVEN_REQUEST_TIMEOUT_SECS", "9");
        let cfg = Config::from_env();
        assert_eq!(cfg.request_timeout_secs, 9);
        assert_eq!(cfg.hub_config().request_timeout, Duration::from_secs(9));
        std::env::remove_var("GARVEN_REQUEST_TIMEOUT_SECS");
    }

    #[test]
    fn unparseable_value_falls_back() {
        std::env::set_var("GARVEN_CLUSTER_COUNT", "eleven");
        assert_eq!(Config::from_env().cluster_count, 11);
        std::env::remove_var("GARVEN_CLUSTER_COUNT");
    }

    #[test]
    fn debug_hides_secrets() {
        let cfg = Config { secret_key: "hunter2".into(), ..Config::default() };
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
