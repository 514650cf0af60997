use crate::error::ConfigError;
use napoli_core::push::DEFAULT_MAX_FRAME_BYTES;
use napoli_core::DEFAULT_CLIENT_ID;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_RECONNECT_SECS: u64 = 5;
pub const DEFAULT_LOG_CAP: usize = 50;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const BACKOFF_CEILING: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    /// Doubles per consecutive failure up to `max`; resets after a handshake.
    Backoff { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(DEFAULT_RECONNECT_SECS))
    }
}

impl ReconnectPolicy {
    /// `failures` counts consecutive attempts since the last successful handshake.
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            ReconnectPolicy::Fixed(delay) => delay,
            ReconnectPolicy::Backoff { initial, max } => {
                let factor = 1u32 << failures.min(16);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub backend_url: Url,
    pub client_id: String,
    pub reconnect: ReconnectPolicy,
    pub log_cap: usize,
    pub operation_timeout: Option<Duration>,
    pub request_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl SyncConfig {
    pub fn new(backend_url: Url) -> Self {
        Self {
            backend_url,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            reconnect: ReconnectPolicy::default(),
            log_cap: DEFAULT_LOG_CAP,
            operation_timeout: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend = read("NAPOLI_BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let mut config = Self::new(parse_backend_url(&backend)?);
        if let Some(client_id) = read("NAPOLI_CLIENT_ID") {
            config.client_id = client_id.trim().to_string();
        }

        let reconnect_secs = match read("NAPOLI_RECONNECT_SECS") {
            Some(value) => parse_secs("NAPOLI_RECONNECT_SECS", &value)?,
            None => DEFAULT_RECONNECT_SECS,
        };
        let backoff = read("NAPOLI_RECONNECT_BACKOFF")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(false);
        config.reconnect = reconnect_policy(reconnect_secs, backoff);

        if let Some(value) = read("NAPOLI_OP_TIMEOUT_SECS") {
            let secs = parse_secs("NAPOLI_OP_TIMEOUT_SECS", &value)?;
            config.operation_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Base of every REST call: `{backend}/api`.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let mut base = self.backend_url.clone();
        base.set_query(None);
        base.set_fragment(None);
        base.path_segments_mut()
            .map_err(|_| ConfigError::UnsupportedScheme(self.backend_url.scheme().to_string()))?
            .pop_if_empty()
            .push("api");
        Ok(base)
    }

    /// Push channel endpoint `{ws|wss}://{host}/ws/{client_id}`.
    pub fn push_endpoint(&self, client_id: &str) -> Result<Url, ConfigError> {
        let scheme = match self.backend_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        let mut endpoint = self.backend_url.clone();
        endpoint
            .set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(self.backend_url.scheme().to_string()))?;
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        endpoint.set_path("");
        endpoint
            .path_segments_mut()
            .map_err(|_| ConfigError::UnsupportedScheme(scheme.to_string()))?
            .clear()
            .push("ws")
            .push(client_id);
        Ok(endpoint)
    }
}

pub fn reconnect_policy(base_secs: u64, backoff: bool) -> ReconnectPolicy {
    let base = Duration::from_secs(base_secs);
    if backoff {
        ReconnectPolicy::Backoff {
            initial: BACKOFF_FLOOR.min(base),
            max: base.max(BACKOFF_CEILING),
        }
    } else {
        ReconnectPolicy::Fixed(base)
    }
}

pub fn parse_backend_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|err| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
}
