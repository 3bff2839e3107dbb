//! Configuration, spec §6 "Configuration" (ambient: env-var sourced, no
//! CLI parsing or config-file loading per the stated non-goals).
//!
//! Grounded on the teacher's `AppConfig::from_env` (`lib.rs`): the same
//! `parse_optional_u64`/`parse_bool_env` helper pair, reused verbatim in
//! spirit, applied to the agent's own recognised keys (spec §6 table).

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashSet};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub collector_url: String,
    pub license_key: String,
    pub max_inventory_size: u64,
    pub startup_connection_retries: i64,
    pub startup_connection_timeout_ms: u64,
    pub disable_cloud_metadata: bool,
    pub enable_process_metrics: bool,
    pub include_metrics_matchers: BTreeMap<String, Vec<String>>,
    pub ignored_inventory_paths: HashSet<String>,
    pub windows_services_refresh_sec: u64,
    pub display_name: Option<String>,
    pub run_mode: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let collector_url = env::var("INFRA_COLLECTOR_URL")
            .map_err(|_| anyhow!("INFRA_COLLECTOR_URL must be set"))?;
        let license_key =
            env::var("INFRA_LICENSE_KEY").map_err(|_| anyhow!("INFRA_LICENSE_KEY must be set"))?;

        let max_inventory_size = parse_optional_u64("INFRA_MAX_INVENTORY_SIZE")?.unwrap_or(1000);
        let startup_connection_retries = parse_optional_i64("INFRA_STARTUP_CONNECTION_RETRIES")?.unwrap_or(-1);
        let startup_connection_timeout_ms =
            parse_optional_u64("INFRA_STARTUP_CONNECTION_TIMEOUT_MS")?.unwrap_or(10_000);
        let disable_cloud_metadata = parse_bool_env("INFRA_DISABLE_CLOUD_METADATA")?.unwrap_or(false);
        let enable_process_metrics = parse_bool_env("INFRA_ENABLE_PROCESS_METRICS")?.unwrap_or(false);

        let include_metrics_matchers = env::var("INFRA_INCLUDE_METRICS_MATCHERS")
            .ok()
            .map(|raw| parse_matchers(&raw))
            .transpose()?
            .unwrap_or_default();

        let ignored_inventory_paths = env::var("INFRA_IGNORED_INVENTORY_PATHS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<HashSet<_>>()
            })
            .unwrap_or_default();

        let windows_services_refresh_sec =
            parse_optional_u64("INFRA_WINDOWS_SERVICES_REFRESH_SEC")?.unwrap_or(30);
        let display_name = env::var("INFRA_DISPLAY_NAME").ok();
        let run_mode = env::var("INFRA_RUN_MODE").ok();

        Ok(Self {
            collector_url,
            license_key,
            max_inventory_size,
            startup_connection_retries,
            startup_connection_timeout_ms,
            disable_cloud_metadata,
            enable_process_metrics,
            include_metrics_matchers,
            ignored_inventory_paths,
            windows_services_refresh_sec,
            display_name,
            run_mode,
        })
    }
}

/// Parses `field1:pattern1|pattern2,field2:pattern3` into a field→patterns
/// map (spec §6 "include_metrics_matchers"). No richer syntax is defined
/// by the spec, so this is the whole grammar.
fn parse_matchers(raw: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map = BTreeMap::new();
    for clause in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (field, patterns) = clause
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid include_metrics_matchers clause: '{clause}'"))?;
        let patterns = patterns
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        map.insert(field.trim().to_string(), patterns);
    }
    Ok(map)
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_optional_i64(var: &str) -> Result<Option<i64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be an integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const ALL_VARS: &[&str] = &[
        "INFRA_COLLECTOR_URL",
        "INFRA_LICENSE_KEY",
        "INFRA_MAX_INVENTORY_SIZE",
        "INFRA_STARTUP_CONNECTION_RETRIES",
        "INFRA_STARTUP_CONNECTION_TIMEOUT_MS",
        "INFRA_DISABLE_CLOUD_METADATA",
        "INFRA_ENABLE_PROCESS_METRICS",
        "INFRA_INCLUDE_METRICS_MATCHERS",
        "INFRA_IGNORED_INVENTORY_PATHS",
        "INFRA_WINDOWS_SERVICES_REFRESH_SEC",
        "INFRA_DISPLAY_NAME",
        "INFRA_RUN_MODE",
    ];

    fn clear_all() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_collector_url_is_an_error() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_all();
        std::env::set_var("INFRA_LICENSE_KEY", "abc");
        assert!(Config::from_env().is_err());
        clear_all();
    }

    #[test]
    fn parses_defaults_and_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_all();
        std::env::set_var("INFRA_COLLECTOR_URL", "https://collector.example.com");
        std::env::set_var("INFRA_LICENSE_KEY", "abc123");
        std::env::set_var("INFRA_MAX_INVENTORY_SIZE", "500");
        std::env::set_var("INFRA_STARTUP_CONNECTION_RETRIES", "-1");
        std::env::set_var("INFRA_DISABLE_CLOUD_METADATA", "true");
        std::env::set_var("INFRA_IGNORED_INVENTORY_PATHS", "metadata.secret, top.token");
        std::env::set_var("INFRA_INCLUDE_METRICS_MATCHERS", "process.name:nginx|redis");

        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.collector_url, "https://collector.example.com");
        assert_eq!(cfg.max_inventory_size, 500);
        assert_eq!(cfg.startup_connection_retries, -1);
        assert!(cfg.disable_cloud_metadata);
        assert!(cfg.ignored_inventory_paths.contains("metadata.secret"));
        assert_eq!(
            cfg.include_metrics_matchers.get("process.name").unwrap(),
            &vec!["nginx".to_string(), "redis".to_string()]
        );
        assert_eq!(cfg.windows_services_refresh_sec, 30);
        clear_all();
    }
}
