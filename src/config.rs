//! # Configuration
//!
//! [`ServerConfig`] is read from an optional YAML file, then overridden by
//! environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `STANZA_ADDR` | `addr` |
//! | `STANZA_STACK_SIZE` | `stack_size` (decimal or `0x` hex) |
//! | `STANZA_MAX_BODY_BYTES` | `max_body_bytes` |
//! | `STANZA_READ_TIMEOUT_MS` | `read_timeout_ms` (`0` disables) |
//! | `STANZA_TEMPLATES_DIR` | `templates_dir` |
//! | `STANZA_SESSION_IDLE_SECS` | `session.idle_timeout_secs` (`0` disables) |
//!
//! ```yaml
//! addr: 0.0.0.0:8080
//! stack_size: 0x10000
//! max_body_bytes: 1048576
//! read_timeout_ms: 30000
//! templates_dir: ./templates
//! session:
//!   idle_timeout_secs: 86400
//!   cookie_max_age_secs: null
//!   sweep_interval_secs: 300
//! ```

use crate::server::ConnectionLimits;
use crate::session::SessionStore;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value {value:?} for {var}: expected {expected}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub addr: String,
    /// Coroutine stack size in bytes.
    #[serde(deserialize_with = "deserialize_size")]
    pub stack_size: usize,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    /// Per-read socket deadline; `0` waits forever.
    pub read_timeout_ms: u64,
    /// Directory of `<name>.html` views; HTML rendering is off when unset.
    pub templates_dir: Option<PathBuf>,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Sessions unseen this long are forgotten; `None` or `0` keeps them
    /// until destroyed.
    pub idle_timeout_secs: Option<u64>,
    /// `Max-Age` of the session cookie; `None` makes it a browser-session cookie.
    pub cookie_max_age_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = ConnectionLimits::default();
        Self {
            addr: "127.0.0.1:8080".to_string(),
            stack_size: limits.stack_size,
            max_header_bytes: limits.max_header_bytes,
            max_body_bytes: limits.max_body_bytes,
            read_timeout_ms: 30_000,
            templates_dir: None,
            session: SessionConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: Some(24 * 60 * 60),
            cookie_max_age_secs: None,
            sweep_interval_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Defaults, or the YAML file at `path`, with environment overrides applied.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        debug!(config = ?config, "Configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Config file read");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Apply `STANZA_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("STANZA_ADDR") {
            self.addr = addr;
        }
        if let Some(raw) = lookup("STANZA_STACK_SIZE") {
            self.stack_size = parse_size(&raw).ok_or(ConfigError::InvalidEnv {
                var: "STANZA_STACK_SIZE",
                value: raw,
                expected: "a byte count, decimal or 0x hex",
            })?;
        }
        if let Some(raw) = lookup("STANZA_MAX_BODY_BYTES") {
            self.max_body_bytes = parse_env("STANZA_MAX_BODY_BYTES", raw)?;
        }
        if let Some(raw) = lookup("STANZA_READ_TIMEOUT_MS") {
            self.read_timeout_ms = parse_env("STANZA_READ_TIMEOUT_MS", raw)?;
        }
        if let Some(dir) = lookup("STANZA_TEMPLATES_DIR") {
            self.templates_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("STANZA_SESSION_IDLE_SECS") {
            self.session.idle_timeout_secs = Some(parse_env("STANZA_SESSION_IDLE_SECS", raw)?);
        }
        Ok(())
    }

    #[must_use]
    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
            read_timeout: (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms)),
            stack_size: self.stack_size,
        }
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.session
            .idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session.sweep_interval_secs.max(1))
    }

    /// An empty store honouring the configured idle timeout.
    #[must_use]
    pub fn session_store(&self) -> SessionStore {
        match self.idle_timeout() {
            Some(timeout) => SessionStore::new().with_idle_timeout(timeout),
            None => SessionStore::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: raw,
        expected: "a non-negative integer",
    })
}

/// `"0x8000"` or `"32768"`.
fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(usize),
        Text(String),
    }
    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => parse_size(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid size {s:?}"))),
    }
}
