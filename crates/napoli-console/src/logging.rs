use crate::config::ConsoleConfig;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where tracing output goes. Stdout belongs to command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    /// File plus a stderr mirror, enabled with `NAPOLI_LOG_STDOUT`.
    Both(PathBuf),
}

impl LogTarget {
    pub fn for_config(config: &ConsoleConfig) -> Self {
        let dir = config.log_dir.trim();
        if dir.is_empty() {
            return Self::Stderr;
        }
        let name = format!(
            "napoli-console-{}.log",
            sanitize_component(&config.sync.client_id)
        );
        let path = Path::new(dir).join(name);
        if config.log_stdout {
            Self::Both(path)
        } else {
            Self::File(path)
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::Stderr => None,
            Self::File(path) | Self::Both(path) => Some(path),
        }
    }

    fn mirrors_stderr(&self) -> bool {
        matches!(self, Self::Stderr | Self::Both(_))
    }
}

/// Installs the global subscriber. Returns the log file in use, if any.
/// A log file that cannot be opened falls back to stderr.
pub fn init_logging(config: &ConsoleConfig) -> Option<PathBuf> {
    let directive = level_directive(config.debug, |key| std::env::var(key).ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let mut target = LogTarget::for_config(config);
    let opened = target.file_path().map(open_log_file);
    let file = match opened {
        Some(Ok(file)) => Some(file),
        Some(Err(err)) => {
            eprintln!("log_file_error: {err}");
            target = LogTarget::Stderr;
            None
        }
        None => None,
    };

    let stderr_layer = target
        .mirrors_stderr()
        .then(|| fmt::layer().with_writer(io::stderr));
    let file_layer = file.map(|file| fmt::layer().with_writer(Mutex::new(file)).with_ansi(false));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .ok()?;
    target.file_path().map(Path::to_path_buf)
}

fn level_directive<F>(debug: bool, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if debug {
        return "debug".to_string();
    }
    lookup("NAPOLI_LOG_LEVEL")
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_with, Overrides};

    fn config(log_dir: &str, client_id: &str, stdout: bool) -> ConsoleConfig {
        let overrides = Overrides {
            log_dir: log_dir.to_string(),
            client_id: client_id.to_string(),
            ..Overrides::default()
        };
        let mirror = stdout.then(|| "1".to_string());
        load_with(&overrides, move |key| {
            (key == "NAPOLI_LOG_STDOUT").then(|| mirror.clone()).flatten()
        })
        .expect("config")
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_component("admin_dash"), "admin_dash");
        assert_eq!(sanitize_component("ops desk/2"), "ops_desk_2");
        assert_eq!(sanitize_component(""), "default");
    }

    #[test]
    fn target_follows_log_dir_and_mirror_flag() {
        assert_eq!(
            LogTarget::for_config(&config("logs", "ops desk", false)),
            LogTarget::File(PathBuf::from("logs/napoli-console-ops_desk.log"))
        );
        let mirrored = LogTarget::for_config(&config("logs", "admin_dash", true));
        assert_eq!(
            mirrored,
            LogTarget::Both(PathBuf::from("logs/napoli-console-admin_dash.log"))
        );
        assert!(mirrored.mirrors_stderr());

        let mut bare = config("", "admin_dash", false);
        bare.log_dir = "  ".to_string();
        let target = LogTarget::for_config(&bare);
        assert_eq!(target, LogTarget::Stderr);
        assert_eq!(target.file_path(), None);
    }

    #[test]
    fn level_prefers_debug_then_environment() {
        assert_eq!(level_directive(true, |_| Some("warn".to_string())), "debug");
        assert_eq!(level_directive(false, |_| Some("warn".to_string())), "warn");
        assert_eq!(level_directive(false, |_| Some(" ".to_string())), "info");
        assert_eq!(level_directive(false, |_| None), "info");
    }

    #[test]
    fn log_file_and_its_directory_are_created() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("napoli-console-logs-{}", std::process::id()));
        let path = dir.join("nested").join("napoli-console-ops.log");
        open_log_file(&path).expect("open");
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
