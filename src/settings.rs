use std::{env, fmt::Display, str::FromStr, time::Duration};
use tracing::{info, warn};

pub const ENV_BASE_URL: &str = "CAMPUS_API_BASE_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "CAMPUS_API_TIMEOUT_MS";
pub const ENV_BOOTSTRAP_TIMEOUT_MS: &str = "CAMPUS_BOOTSTRAP_TIMEOUT_MS";
pub const ENV_FRESH_AUTH_GRACE_MS: &str = "CAMPUS_FRESH_AUTH_GRACE_MS";
pub const ENV_AUTO_REFRESH_SECS: &str = "CAMPUS_AUTO_REFRESH_SECS";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BOOTSTRAP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FRESH_AUTH_GRACE_MS: u64 = 2_000;
// Access tokens live 15 minutes.
const DEFAULT_AUTO_REFRESH_SECS: u64 = 14 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub fresh_auth_grace: Duration,
    pub auto_refresh_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            bootstrap_timeout: Duration::from_millis(DEFAULT_BOOTSTRAP_TIMEOUT_MS),
            fresh_auth_grace: Duration::from_millis(DEFAULT_FRESH_AUTH_GRACE_MS),
            auto_refresh_interval: Duration::from_secs(DEFAULT_AUTO_REFRESH_SECS),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset or unparsable values fall
    /// back to the defaults with a log line.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = try_load(&lookup, ENV_BASE_URL, DEFAULT_BASE_URL.to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_millis(try_load(
                &lookup,
                ENV_REQUEST_TIMEOUT_MS,
                DEFAULT_REQUEST_TIMEOUT_MS,
            )),
            bootstrap_timeout: Duration::from_millis(try_load(
                &lookup,
                ENV_BOOTSTRAP_TIMEOUT_MS,
                DEFAULT_BOOTSTRAP_TIMEOUT_MS,
            )),
            fresh_auth_grace: Duration::from_millis(try_load(
                &lookup,
                ENV_FRESH_AUTH_GRACE_MS,
                DEFAULT_FRESH_AUTH_GRACE_MS,
            )),
            auto_refresh_interval: Duration::from_secs(try_load(
                &lookup,
                ENV_AUTO_REFRESH_SECS,
                DEFAULT_AUTO_REFRESH_SECS,
            )),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        info!("{key} not set, using default: {default}");
        return default;
    };
    raw.trim().parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value: {e}, using default: {default}");
        default
    })
}
