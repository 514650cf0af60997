use anyhow::{bail, Context, Result};
use napoli_sync::config::{parse_backend_url, parse_bool_flag, reconnect_policy};
use napoli_sync::{ReconnectPolicy, SyncConfig};
use std::time::Duration;

/// Console default for giving up on async operations; the library keeps none.
pub const DEFAULT_OP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LOG_DIR: &str = ".napoli/logs";

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub sync: SyncConfig,
    pub log_dir: String,
    pub debug: bool,
    pub log_stdout: bool,
}

/// Raw global flags; empty strings mean "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: String,
    pub client_id: String,
    pub reconnect_secs: String,
    pub backoff: bool,
    pub op_timeout_secs: String,
    pub log_dir: String,
    pub debug: bool,
}

pub fn load_config(overrides: &Overrides) -> Result<ConsoleConfig> {
    load_with(overrides, |key| std::env::var(key).ok())
}

/// Flag, then environment, then default for every setting.
pub fn load_with<F>(overrides: &Overrides, lookup: F) -> Result<ConsoleConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut sync = SyncConfig::from_lookup(&lookup).context("invalid NAPOLI_* environment")?;

    if !overrides.backend.trim().is_empty() {
        sync.backend_url = parse_backend_url(&overrides.backend)
            .with_context(|| format!("invalid --backend {:?}", overrides.backend))?;
    }
    if !overrides.client_id.trim().is_empty() {
        sync.client_id = overrides.client_id.trim().to_string();
    }
    sync.reconnect = resolve_reconnect(sync.reconnect, &overrides.reconnect_secs, overrides.backoff)?;
    sync.operation_timeout = resolve_op_timeout(sync.operation_timeout, &overrides.op_timeout_secs, &lookup)?;

    let debug = overrides.debug || env_true(&lookup, "NAPOLI_DEBUG");
    Ok(ConsoleConfig {
        sync,
        log_dir: resolve_log_dir(&overrides.log_dir, &lookup),
        debug,
        log_stdout: env_true(&lookup, "NAPOLI_LOG_STDOUT"),
    })
}

fn resolve_reconnect(current: ReconnectPolicy, secs_flag: &str, backoff: bool) -> Result<ReconnectPolicy> {
    let secs = match secs_flag.trim() {
        "" => match current {
            ReconnectPolicy::Fixed(delay) => delay.as_secs(),
            ReconnectPolicy::Backoff { .. } => return Ok(current),
        },
        value => value
            .parse::<u64>()
            .with_context(|| format!("invalid --reconnect-secs {value:?}"))?,
    };
    if secs == 0 {
        bail!("reconnect delay must be at least one second");
    }
    Ok(reconnect_policy(secs, backoff))
}

fn resolve_op_timeout<F>(
    current: Option<Duration>,
    flag: &str,
    lookup: &F,
) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match flag.trim() {
        "" => {
            let env_set = lookup("NAPOLI_OP_TIMEOUT_SECS").is_some_and(|value| !value.trim().is_empty());
            if env_set {
                return Ok(current);
            }
            DEFAULT_OP_TIMEOUT_SECS
        }
        value => value
            .parse::<u64>()
            .with_context(|| format!("invalid --op-timeout-secs {value:?}"))?,
    };
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn resolve_log_dir<F>(flag: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    match lookup("NAPOLI_LOG_DIR") {
        Some(value) if !value.trim().is_empty() => value,
        _ => DEFAULT_LOG_DIR.to_string(),
    }
}

fn env_true<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}
