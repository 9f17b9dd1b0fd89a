// crates/server/src/config.rs
//! Server configuration read from the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_report_jobs::{RegistryConfig, StagingMode};
use serde::Serialize;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47893;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_DIALOG_THRESHOLD_MS: u64 = 1500;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Client-facing settings served at `GET /api/jobs/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerConfig {
    pub support_async: bool,
    pub polling_interval_milliseconds: u64,
    pub dialog_threshold_milliseconds: u64,
    pub prompt_for_location: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            support_async: true,
            polling_interval_milliseconds: DEFAULT_POLL_INTERVAL_MS,
            dialog_threshold_milliseconds: DEFAULT_DIALOG_THRESHOLD_MS,
            prompt_for_location: false,
        }
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub registry: RegistryConfig,
    pub manager: ManagerConfig,
    pub sweep_interval: Duration,
}

impl ServerConfig {
    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparsable values fall back to
    /// their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = parse_var(&lookup, "ASYNC_REPORT_PORT")
            .or_else(|| parse_var(&lookup, "PORT"))
            .unwrap_or(DEFAULT_PORT);
        let ip = parse_var::<IpAddr>(&lookup, "ASYNC_REPORT_BIND")
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let prompt_for_location =
            parse_var(&lookup, "ASYNC_REPORT_PROMPT_FOR_LOCATION").unwrap_or(false);

        let mut registry = RegistryConfig::default().with_scheduling_location(prompt_for_location);
        if let Some(limit) = parse_var::<usize>(&lookup, "ASYNC_REPORT_MAX_CONCURRENT") {
            registry = registry.with_max_concurrent_renders(limit);
        }
        if let Some(staging) = parse_var::<StagingMode>(&lookup, "ASYNC_REPORT_STAGING") {
            registry = registry.with_staging(staging);
        }
        if let Some(limit) = parse_var::<u64>(&lookup, "ASYNC_REPORT_MAX_CONTENT_BYTES") {
            registry = registry.with_max_content_bytes(limit);
        }

        let manager = ManagerConfig {
            support_async: parse_var(&lookup, "ASYNC_REPORT_SUPPORT_ASYNC").unwrap_or(true),
            polling_interval_milliseconds: parse_var(&lookup, "ASYNC_REPORT_POLL_INTERVAL_MS")
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            dialog_threshold_milliseconds: parse_var(&lookup, "ASYNC_REPORT_DIALOG_THRESHOLD_MS")
                .unwrap_or(DEFAULT_DIALOG_THRESHOLD_MS),
            prompt_for_location,
        };

        let sweep_secs = parse_var::<u64>(&lookup, "ASYNC_REPORT_SWEEP_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);

        Self {
            bind: SocketAddr::new(ip, port),
            registry,
            manager,
            sweep_interval: Duration::from_secs(sweep_secs),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.bind, SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)));
        assert_eq!(config.manager, ManagerConfig::default());
        assert!(!config.registry.scheduling_location_enabled);
        assert_eq!(config.registry.max_concurrent_renders, None);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_port_falls_back_to_generic_var() {
        assert_eq!(config(&[("PORT", "9000")]).bind.port(), 9000);
        assert_eq!(
            config(&[("ASYNC_REPORT_PORT", "9100"), ("PORT", "9000")]).bind.port(),
            9100
        );
    }

    #[test]
    fn test_invalid_values_use_defaults() {
        let config = config(&[
            ("ASYNC_REPORT_PORT", "not-a-port"),
            ("ASYNC_REPORT_STAGING", "floppy"),
            ("ASYNC_REPORT_SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.bind.port(), DEFAULT_PORT);
        assert_eq!(config.registry.staging, StagingMode::Memory);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_registry_and_manager_settings() {
        let config = config(&[
            ("ASYNC_REPORT_BIND", "0.0.0.0"),
            ("ASYNC_REPORT_MAX_CONCURRENT", "4"),
            ("ASYNC_REPORT_STAGING", "tempfile"),
            ("ASYNC_REPORT_MAX_CONTENT_BYTES", "1048576"),
            ("ASYNC_REPORT_PROMPT_FOR_LOCATION", "true"),
            ("ASYNC_REPORT_POLL_INTERVAL_MS", "250"),
        ]);
        assert_eq!(config.bind.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.registry.max_concurrent_renders, Some(4));
        assert_eq!(config.registry.staging, StagingMode::TempFile);
        assert_eq!(config.registry.max_content_bytes, Some(1_048_576));
        assert!(config.registry.scheduling_location_enabled);
        assert!(config.manager.prompt_for_location);
        assert_eq!(config.manager.polling_interval_milliseconds, 250);
    }

    #[test]
    fn test_manager_config_serialization() {
        let json = serde_json::to_value(ManagerConfig::default()).unwrap();
        assert_eq!(json["supportAsync"], true);
        assert_eq!(json["pollingIntervalMilliseconds"], 500);
        assert_eq!(json["dialogThresholdMilliseconds"], 1500);
        assert_eq!(json["promptForLocation"], false);
    }
}
