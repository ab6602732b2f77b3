//! Preferences file watcher.
//!
//! Polls the init file's modification time and pushes a fresh
//! [`Preferences`] to the session actor whenever it changes. A file that
//! disappears reverts to the built-in defaults.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use guard_core::{LoadedPreferences, Preferences};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionHandle;

/// Loads `path`, logging each bad line. Unreadable files give defaults.
pub fn load_preferences(path: &std::path::Path) -> LoadedPreferences {
    match Preferences::load(path) {
        Ok(loaded) => {
            for warning in &loaded.warnings {
                warn!(file = %path.display(), line = warning.line(), "{warning}");
            }
            loaded
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Cannot read init file, using defaults");
            LoadedPreferences {
                preferences: Preferences::default(),
                warnings: Vec::new(),
                modified: None,
            }
        }
    }
}

fn modified_time(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub struct PrefsWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    session: SessionHandle,
}

impl PrefsWatcher {
    pub fn new(path: PathBuf, last_modified: Option<SystemTime>, session: SessionHandle) -> Self {
        Self {
            path,
            last_modified,
            session,
        }
    }

    /// Reloads if the file changed since the last look. Returns whether
    /// a reload was sent.
    pub async fn check(&mut self) -> bool {
        let modified = modified_time(&self.path);
        if modified == self.last_modified {
            return false;
        }
        self.last_modified = modified;

        let loaded = load_preferences(&self.path);
        info!(
            file = %self.path.display(),
            warnings = loaded.warnings.len(),
            "Init file changed, reloading preferences"
        );

        if let Err(e) = self.session.reload(loaded.preferences).await {
            debug!(error = %e, "Session gone, preferences not applied");
            return false;
        }
        true
    }

    pub async fn run(mut self, every: Duration, cancel: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the caller already loaded the file.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check().await;
                }
            }
        }
        debug!("Preferences watcher stopped");
    }
}

/// Spawns a [`PrefsWatcher`] polling every `every`.
pub fn spawn_prefs_watcher(
    path: PathBuf,
    every: Duration,
    last_modified: Option<SystemTime>,
    session: SessionHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let watcher = PrefsWatcher::new(path, last_modified, session);
    tokio::spawn(watcher.run(every, cancel))
}
