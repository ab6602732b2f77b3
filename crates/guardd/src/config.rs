//! Daemon settings (`guardd.toml`).
//!
//! These are the knobs that are not user preferences: where the
//! authenticator lives, which shell runs demos, where the socket goes,
//! how user input is noticed. Every field is optional; a missing file
//! yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Default authenticator program, looked up on `PATH`.
pub const DEFAULT_AUTH_PROGRAM: &str = "guard-auth";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("auth_command must not be empty")]
    EmptyAuthCommand,
}

/// Where keyboard and pointer activity comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    /// The X display when built with `x11` and `DISPLAY` is set, else
    /// the terminal.
    #[default]
    Auto,
    X11,
    Tty,
    /// Only commands wake the session.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Authenticator program and leading arguments.
    pub auth_command: Vec<String>,

    /// Extra seconds granted on top of `passwdTimeout` before the
    /// authenticator is killed.
    pub auth_grace_secs: u64,

    /// Shell used to run demo programs (`<shell> -c <command>`).
    pub shell: String,

    /// Socket path; `GUARD_SOCKET` wins over this.
    pub socket_path: Option<PathBuf>,

    /// Preferences file; defaults to `~/.saverguard`.
    pub init_file: Option<PathBuf>,

    /// How often the preferences file is checked for changes.
    pub prefs_poll_secs: u64,

    pub activity_source: ActivitySource,

    /// Terminal for the unlock prompt and tty activity. Defaults to the
    /// terminal `guardd` was started from.
    pub tty: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            auth_command: vec![DEFAULT_AUTH_PROGRAM.to_string()],
            auth_grace_secs: 5,
            shell: "/bin/sh".to_string(),
            socket_path: None,
            init_file: None,
            prefs_poll_secs: 5,
            activity_source: ActivitySource::Auto,
            tty: None,
        }
    }
}

impl DaemonConfig {
    /// `$XDG_CONFIG_HOME/saverguard/guardd.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("saverguard").join("guardd.toml"))
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.auth_command.is_empty() {
            return Err(ConfigError::EmptyAuthCommand);
        }
        Ok(config)
    }

    /// Reads `path`. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Explicit path, then the default location, then built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => {
                warn!("No config directory; using built-in daemon settings");
                Ok(Self::default())
            }
        }
    }

    pub fn auth_grace(&self) -> Duration {
        Duration::from_secs(self.auth_grace_secs)
    }

    pub fn prefs_poll_interval(&self) -> Duration {
        Duration::from_secs(self.prefs_poll_secs.max(1))
    }

    /// The configured terminal, else the one on standard input.
    pub fn terminal(&self) -> Option<PathBuf> {
        self.tty.clone().or_else(crate::activity::stdin_tty)
    }

    /// The preferences file to watch.
    pub fn init_file(&self) -> Option<PathBuf> {
        self.init_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| guard_core::Preferences::default_path(&home)))
    }
}
