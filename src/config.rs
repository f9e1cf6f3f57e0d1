//! Configuration loading and management

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::announce::Strategy;

const ENV_PREFIX: &str = "PREVIEWER_";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Hotkey bindings file
    pub bindings_path: PathBuf,

    /// SQLite label database
    pub db_path: PathBuf,

    /// Where the screen reader client DLLs live
    pub dll_dir: PathBuf,

    /// Local address of the UI bridge
    pub ipc_addr: SocketAddr,

    pub debounce: Duration,
    /// Seconds per fast-forward/rewind step
    pub seek_step: f64,
    pub seek_repeat: Duration,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,

    pub announcer: Strategy,

    /// Filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Config {
    /// Defaults next to the executable, overridden by `PREVIEWER_*` variables
    pub fn load() -> Result<Self> {
        let exe = std::env::current_exe().context("failed to locate executable")?;
        let base = exe.parent().unwrap_or_else(|| Path::new("."));
        Self::from_lookup(base, |key| std::env::var(key).ok())
    }

    fn defaults(base: &Path) -> Self {
        Self {
            bindings_path: base.join("hotkeys.json"),
            db_path: base.join("audio_labels.db"),
            dll_dir: base.to_path_buf(),
            ipc_addr: SocketAddr::from(([127, 0, 0, 1], 47_810)),
            debounce: Duration::from_millis(100),
            seek_step: 1.0,
            seek_repeat: Duration::from_millis(200),
            poll_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(5),
            announcer: Strategy::default(),
            log_filter: "info".to_string(),
        }
    }

    fn from_lookup(base: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::defaults(base);
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BINDINGS") {
            config.bindings_path = PathBuf::from(v);
        }
        if let Some(v) = var("DB") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("DLL_DIR") {
            config.dll_dir = PathBuf::from(v);
        }
        if let Some(v) = var("IPC_ADDR") {
            config.ipc_addr = v
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_PREFIX}IPC_ADDR `{v}`"))?;
        }
        if let Some(v) = var("DEBOUNCE_MS") {
            config.debounce = millis("DEBOUNCE_MS", &v)?;
        }
        if let Some(v) = var("SEEK_STEP") {
            let step: f64 = v
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_PREFIX}SEEK_STEP `{v}`"))?;
            anyhow::ensure!(step.is_finite() && step > 0.0, "{ENV_PREFIX}SEEK_STEP must be positive");
            config.seek_step = step;
        }
        if let Some(v) = var("SEEK_REPEAT_MS") {
            config.seek_repeat = millis("SEEK_REPEAT_MS", &v)?;
        }
        if let Some(v) = var("POLL_MS") {
            config.poll_interval = millis("POLL_MS", &v)?;
        }
        if let Some(v) = var("PROBE_TIMEOUT_MS") {
            config.probe_timeout = millis("PROBE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("ANNOUNCER") {
            config.announcer = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = var("LOG") {
            config.log_filter = v;
        }

        Ok(config)
    }

    /// Make sure the files' parent directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for path in [&self.bindings_path, &self.db_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        Ok(())
    }
}

fn millis(name: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {ENV_PREFIX}{name} `{value}`"))?;
    anyhow::ensure!(ms > 0, "{ENV_PREFIX}{name} must be greater than zero");
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load_with(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(Path::new("/opt/previewer"), |k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults_live_next_to_executable() {
        let config = load_with(&[]).unwrap();
        assert_eq!(config.bindings_path, Path::new("/opt/previewer/hotkeys.json"));
        assert_eq!(config.db_path, Path::new("/opt/previewer/audio_labels.db"));
        assert_eq!(config.debounce, Duration::from_millis(100));
        assert_eq!(config.seek_repeat, Duration::from_millis(200));
        assert_eq!(config.announcer, Strategy::Broadcast);
        assert!(config.ipc_addr.ip().is_loopback());
    }

    #[test]
    fn test_env_overrides() {
        let config = load_with(&[
            ("PREVIEWER_BINDINGS", "/tmp/keys.json"),
            ("PREVIEWER_IPC_ADDR", "127.0.0.1:9000"),
            ("PREVIEWER_DEBOUNCE_MS", "250"),
            ("PREVIEWER_SEEK_STEP", "2.5"),
            ("PREVIEWER_ANNOUNCER", "nvda"),
            ("PREVIEWER_LOG", "debug"),
        ])
        .unwrap();
        assert_eq!(config.bindings_path, Path::new("/tmp/keys.json"));
        assert_eq!(config.ipc_addr.port(), 9000);
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.seek_step, 2.5);
        assert_eq!(config.announcer, Strategy::Nvda);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = load_with(&[("PREVIEWER_DB", "  ")]).unwrap();
        assert_eq!(config.db_path, Path::new("/opt/previewer/audio_labels.db"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load_with(&[("PREVIEWER_DEBOUNCE_MS", "fast")]).is_err());
        assert!(load_with(&[("PREVIEWER_POLL_MS", "0")]).is_err());
        assert!(load_with(&[("PREVIEWER_SEEK_STEP", "-1")]).is_err());
        assert!(load_with(&[("PREVIEWER_ANNOUNCER", "jaws")]).is_err());
        assert!(load_with(&[("PREVIEWER_IPC_ADDR", "localhost")]).is_err());
    }

    #[test]
    fn test_ensure_dirs_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = load_with(&[]).unwrap();
        config.bindings_path = dir.path().join("conf").join("hotkeys.json");
        config.db_path = dir.path().join("data").join("labels.db");
        config.ensure_dirs().unwrap();
        assert!(dir.path().join("conf").is_dir());
        assert!(dir.path().join("data").is_dir());
    }
}
