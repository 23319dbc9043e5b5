//! Process configuration, read once from `.env` and the environment.

use once_cell::sync::OnceCell;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::sync::RetryPolicy;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_LOG_FILTER: &str = "attendanced=info";

static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    pub sync_max_attempts: u32,
    pub sync_base_delay: Duration,
    pub pending_refresh: Duration,
    pub user_agent: String,
    pub log_filter: String,
    /// Device-wide prefs file holding the device id. Unset keeps the id in
    /// each workspace's `prefs.json`.
    pub device_prefs: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(30),
            sync_max_attempts: 3,
            sync_base_delay: Duration::from_millis(5_000),
            pending_refresh: Duration::from_secs(60),
            user_agent: format!("attendanced/{}", env!("CARGO_PKG_VERSION")),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            device_prefs: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset, blank or unparsable
    /// values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_base_url: text("ATTENDANCED_API_BASE_URL").unwrap_or(d.api_base_url),
            access_token: text("ATTENDANCED_ACCESS_TOKEN"),
            request_timeout: parsed(&lookup, "ATTENDANCED_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.request_timeout),
            sync_max_attempts: parsed::<u32>(&lookup, "ATTENDANCED_SYNC_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(d.sync_max_attempts),
            sync_base_delay: parsed(&lookup, "ATTENDANCED_SYNC_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.sync_base_delay),
            pending_refresh: parsed::<u64>(&lookup, "ATTENDANCED_PENDING_REFRESH_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.pending_refresh),
            user_agent: text("ATTENDANCED_USER_AGENT").unwrap_or(d.user_agent),
            log_filter: text("ATTENDANCED_LOG").unwrap_or(d.log_filter),
            device_prefs: text("ATTENDANCED_DEVICE_PREFS").map(PathBuf::from),
        }
    }

    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync_max_attempts,
            base_delay: self.sync_base_delay,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            // Logging may not be up yet; stderr keeps stdout clean for IPC.
            eprintln!("attendanced: ignoring invalid {key}={raw:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(cfg.access_token, None);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.pending_refresh, Duration::from_secs(60));
        assert_eq!(cfg.device_prefs, None);
    }

    #[test]
    fn overrides_and_bad_values() {
        let cfg = Config::from_lookup(lookup(&[
            ("ATTENDANCED_API_BASE_URL", "https://school.example/api/v1"),
            ("ATTENDANCED_ACCESS_TOKEN", "  "),
            ("ATTENDANCED_SYNC_MAX_ATTEMPTS", "0"),
            ("ATTENDANCED_SYNC_BASE_DELAY_MS", "25"),
            ("ATTENDANCED_REQUEST_TIMEOUT_SECS", "soon"),
            ("ATTENDANCED_DEVICE_PREFS", "/var/lib/attendanced/device.json"),
        ]));
        assert_eq!(cfg.api_base_url, "https://school.example/api/v1");
        assert_eq!(cfg.access_token, None);
        assert_eq!(cfg.sync_max_attempts, 3);
        assert_eq!(cfg.sync_base_delay, Duration::from_millis(25));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(
            cfg.device_prefs,
            Some(PathBuf::from("/var/lib/attendanced/device.json"))
        );
    }
}
