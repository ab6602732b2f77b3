//! The user's preference set, backed by the dotfile.
//!
//! Preferences are read at daemon startup and whenever the file's
//! modification time changes. A missing file is not an error: the
//! built-in defaults apply.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dotfile::{ConfigParseError, Dotfile};
use crate::error::DomainError;
use crate::machine::MachineConfig;
use crate::time::{format_time, parse_time, TimeUnit};

/// Default dotfile name in the user's home directory.
pub const DOTFILE_NAME: &str = ".saverguard";

// ============================================================================
// Keys
// ============================================================================

/// How a key's value is parsed and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Time(TimeUnit),
    Bool,
    Int,
    Programs,
    Mode,
}

/// The fixed set of recognised dotfile keys.
///
/// Keys match case-insensitively; they are written back in the
/// camel-case spelling returned by [`PrefKey::name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    Timeout,
    Cycle,
    Lock,
    LockTimeout,
    PasswdTimeout,
    Verbose,
    Timestamp,
    Splash,
    SplashDuration,
    Nice,
    Fade,
    Unfade,
    FadeSeconds,
    FadeTicks,
    CaptureStderr,
    Mode,
    Selected,
    Programs,
    PointerPollTime,
    InitialDelay,
}

impl PrefKey {
    /// All keys, in the order they are written.
    pub const ALL: [PrefKey; 20] = [
        PrefKey::Timeout,
        PrefKey::Cycle,
        PrefKey::Lock,
        PrefKey::LockTimeout,
        PrefKey::PasswdTimeout,
        PrefKey::Verbose,
        PrefKey::Timestamp,
        PrefKey::Splash,
        PrefKey::SplashDuration,
        PrefKey::Nice,
        PrefKey::Fade,
        PrefKey::Unfade,
        PrefKey::FadeSeconds,
        PrefKey::FadeTicks,
        PrefKey::CaptureStderr,
        PrefKey::Mode,
        PrefKey::Selected,
        PrefKey::PointerPollTime,
        PrefKey::InitialDelay,
        PrefKey::Programs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Cycle => "cycle",
            Self::Lock => "lock",
            Self::LockTimeout => "lockTimeout",
            Self::PasswdTimeout => "passwdTimeout",
            Self::Verbose => "verbose",
            Self::Timestamp => "timestamp",
            Self::Splash => "splash",
            Self::SplashDuration => "splashDuration",
            Self::Nice => "nice",
            Self::Fade => "fade",
            Self::Unfade => "unfade",
            Self::FadeSeconds => "fadeSeconds",
            Self::FadeTicks => "fadeTicks",
            Self::CaptureStderr => "captureStderr",
            Self::Mode => "mode",
            Self::Selected => "selected",
            Self::Programs => "programs",
            Self::PointerPollTime => "pointerPollTime",
            Self::InitialDelay => "initialDelay",
        }
    }

    /// Looks a key up case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    fn kind(&self) -> ValueKind {
        match self {
            Self::Timeout | Self::Cycle | Self::LockTimeout => ValueKind::Time(TimeUnit::Minutes),
            Self::PasswdTimeout
            | Self::SplashDuration
            | Self::FadeSeconds
            | Self::PointerPollTime
            | Self::InitialDelay => ValueKind::Time(TimeUnit::Seconds),
            Self::Lock
            | Self::Verbose
            | Self::Timestamp
            | Self::Splash
            | Self::Fade
            | Self::Unfade
            | Self::CaptureStderr => ValueKind::Bool,
            Self::Nice | Self::FadeTicks | Self::Selected => ValueKind::Int,
            Self::Programs => ValueKind::Programs,
            Self::Mode => ValueKind::Mode,
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// Hack-selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaverMode {
    /// Pick a random enabled program each activation and cycle.
    #[default]
    Random,
    /// Always run the `selected` program.
    One,
    /// Blank the screen, run nothing.
    Blank,
    /// Never blank on idle (explicit commands still work).
    Off,
}

impl SaverMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::One => "one",
            Self::Blank => "blank",
            Self::Off => "off",
        }
    }
}

impl FromStr for SaverMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "one" => Ok(Self::One),
            "blank" => Ok(Self::Blank),
            "off" => Ok(Self::Off),
            other => Err(DomainError::invalid("mode", other, "random, one, blank or off")),
        }
    }
}

/// One configured demo program.
///
/// A leading `-` in the dotfile marks the program as disabled; disabled
/// programs are kept so they survive a save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub command: String,
    pub enabled: bool,
}

impl ProgramEntry {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            enabled: true,
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match line.strip_prefix('-') {
            Some(rest) => Some(Self {
                command: rest.trim().to_string(),
                enabled: false,
            }),
            None => Some(Self::new(line)),
        }
    }

    fn render(&self) -> String {
        if self.enabled {
            self.command.clone()
        } else {
            format!("- {}", self.command)
        }
    }
}

fn parse_bool(value: &str) -> Result<bool, DomainError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => Ok(true),
        "false" | "off" | "no" => Ok(false),
        other => Err(DomainError::invalid("boolean", other, "True or False")),
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

// ============================================================================
// Preferences
// ============================================================================

/// The mutable configuration of the session guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Idle time before blanking.
    pub timeout: Duration,
    /// How long each demo runs before the next one.
    pub cycle: Duration,
    /// Whether blanking also locks.
    pub lock: bool,
    /// Grace period after blanking during which input does not lock.
    pub lock_timeout: Duration,
    /// How long the password prompt waits for input.
    pub passwd_timeout: Duration,
    /// Debug logging when no `-v` is given.
    pub verbose: bool,
    /// Timestamps on log lines.
    pub timestamp: bool,
    // Splash and fade settings only matter to a drawing front end. They
    // are parsed and written back so a save loses nothing.
    pub splash: bool,
    pub splash_duration: Duration,
    /// Nice increment applied to demo subprocesses.
    pub nice: i32,
    pub fade: bool,
    pub unfade: bool,
    pub fade_seconds: Duration,
    pub fade_ticks: i32,
    pub capture_stderr: bool,
    pub mode: SaverMode,
    /// Zero-based index into `programs` used in `one` mode.
    pub selected: usize,
    pub programs: Vec<ProgramEntry>,
    /// How often the idle-time source is polled for input.
    pub pointer_poll_time: Duration,
    pub initial_delay: Duration,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60),
            cycle: Duration::from_secs(10 * 60),
            lock: false,
            lock_timeout: Duration::ZERO,
            passwd_timeout: Duration::from_secs(30),
            verbose: false,
            timestamp: true,
            splash: true,
            splash_duration: Duration::from_secs(5),
            nice: 10,
            fade: true,
            unfade: false,
            fade_seconds: Duration::from_secs(3),
            fade_ticks: 20,
            capture_stderr: true,
            mode: SaverMode::Random,
            selected: 0,
            programs: Vec::new(),
            pointer_poll_time: Duration::from_secs(5),
            initial_delay: Duration::ZERO,
        }
    }
}

/// Result of reading the dotfile from disk.
#[derive(Debug, Clone)]
pub struct LoadedPreferences {
    pub preferences: Preferences,
    pub warnings: Vec<ConfigParseError>,
    /// Modification time of the file read, `None` when it was missing.
    pub modified: Option<SystemTime>,
}

impl Preferences {
    /// Returns the default dotfile path, `~/.saverguard`.
    pub fn default_path(home: &Path) -> PathBuf {
        home.join(DOTFILE_NAME)
    }

    /// Builds preferences from parsed dotfile entries on top of the defaults.
    ///
    /// Unknown keys and bad values are reported, one warning per entry,
    /// and otherwise ignored.
    pub fn from_dotfile(file: &Dotfile) -> (Self, Vec<ConfigParseError>) {
        let mut prefs = Self::default();
        let mut warnings = Vec::new();

        for entry in file.entries() {
            let Some(key) = PrefKey::from_name(&entry.key) else {
                warnings.push(ConfigParseError::UnknownKey {
                    line: entry.line,
                    key: entry.key.clone(),
                });
                continue;
            };

            if let Err(e) = prefs.apply(key, &entry.value) {
                warnings.push(ConfigParseError::InvalidValue {
                    line: entry.line,
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                    reason: e.to_string(),
                });
            }
        }

        (prefs, warnings)
    }

    /// Parses dotfile text directly.
    pub fn parse(text: &str) -> (Self, Vec<ConfigParseError>) {
        let (file, mut warnings) = Dotfile::parse(text);
        let (prefs, more) = Self::from_dotfile(&file);
        warnings.extend(more);
        warnings.sort_by_key(ConfigParseError::line);
        (prefs, warnings)
    }

    /// Sets one key from its textual value.
    pub fn apply(&mut self, key: PrefKey, value: &str) -> Result<(), DomainError> {
        match key.kind() {
            ValueKind::Time(unit) => {
                let d = parse_time(value, unit)?;
                match key {
                    PrefKey::Timeout => self.timeout = d,
                    PrefKey::Cycle => self.cycle = d,
                    PrefKey::LockTimeout => self.lock_timeout = d,
                    PrefKey::PasswdTimeout => self.passwd_timeout = d,
                    PrefKey::SplashDuration => self.splash_duration = d,
                    PrefKey::FadeSeconds => self.fade_seconds = d,
                    PrefKey::PointerPollTime => self.pointer_poll_time = d,
                    PrefKey::InitialDelay => self.initial_delay = d,
                    _ => {}
                }
            }
            ValueKind::Bool => {
                let b = parse_bool(value)?;
                match key {
                    PrefKey::Lock => self.lock = b,
                    PrefKey::Verbose => self.verbose = b,
                    PrefKey::Timestamp => self.timestamp = b,
                    PrefKey::Splash => self.splash = b,
                    PrefKey::Fade => self.fade = b,
                    PrefKey::Unfade => self.unfade = b,
                    PrefKey::CaptureStderr => self.capture_stderr = b,
                    _ => {}
                }
            }
            ValueKind::Int => {
                let n: i64 = value
                    .trim()
                    .parse()
                    .map_err(|_| DomainError::invalid(key.name(), value, "an integer"))?;
                match key {
                    PrefKey::Nice => {
                        self.nice = i32::try_from(n)
                            .map_err(|_| DomainError::invalid("nice", value, "a small integer"))?;
                    }
                    PrefKey::FadeTicks => {
                        self.fade_ticks = i32::try_from(n)
                            .map_err(|_| DomainError::invalid("fadeTicks", value, "a small integer"))?;
                    }
                    PrefKey::Selected => {
                        self.selected = usize::try_from(n)
                            .map_err(|_| DomainError::invalid("selected", value, "a non-negative integer"))?;
                    }
                    _ => {}
                }
            }
            ValueKind::Programs => {
                self.programs = value.lines().filter_map(ProgramEntry::parse).collect();
            }
            ValueKind::Mode => {
                self.mode = value.parse()?;
            }
        }
        Ok(())
    }

    /// Returns the textual value of one key, as written to the dotfile.
    pub fn value_of(&self, key: PrefKey) -> String {
        match key {
            PrefKey::Timeout => format_time(self.timeout),
            PrefKey::Cycle => format_time(self.cycle),
            PrefKey::Lock => bool_str(self.lock).to_string(),
            PrefKey::LockTimeout => format_time(self.lock_timeout),
            PrefKey::PasswdTimeout => format_time(self.passwd_timeout),
            PrefKey::Verbose => bool_str(self.verbose).to_string(),
            PrefKey::Timestamp => bool_str(self.timestamp).to_string(),
            PrefKey::Splash => bool_str(self.splash).to_string(),
            PrefKey::SplashDuration => format_time(self.splash_duration),
            PrefKey::Nice => self.nice.to_string(),
            PrefKey::Fade => bool_str(self.fade).to_string(),
            PrefKey::Unfade => bool_str(self.unfade).to_string(),
            PrefKey::FadeSeconds => format_time(self.fade_seconds),
            PrefKey::FadeTicks => self.fade_ticks.to_string(),
            PrefKey::CaptureStderr => bool_str(self.capture_stderr).to_string(),
            PrefKey::Mode => self.mode.name().to_string(),
            PrefKey::Selected => self.selected.to_string(),
            PrefKey::Programs => self
                .programs
                .iter()
                .map(ProgramEntry::render)
                .collect::<Vec<_>>()
                .join("\n"),
            PrefKey::PointerPollTime => format_time(self.pointer_poll_time),
            PrefKey::InitialDelay => format_time(self.initial_delay),
        }
    }

    /// Converts the preferences into dotfile entries, one per key.
    pub fn to_dotfile(&self) -> Dotfile {
        let mut file = Dotfile::new();
        for key in PrefKey::ALL {
            file.push(key.name(), self.value_of(key));
        }
        file
    }

    /// Commands of the enabled programs, in dotfile order.
    pub fn enabled_programs(&self) -> Vec<&str> {
        self.programs
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.command.as_str())
            .collect()
    }

    /// The parts of the preferences the session state machine needs.
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            lock: self.lock,
            lock_timeout: self.lock_timeout,
            mode: self.mode,
            selected: self.selected,
        }
    }

    /// Reads the dotfile at `path`.
    ///
    /// A missing file yields the defaults with no warnings.
    pub fn load(path: &Path) -> io::Result<LoadedPreferences> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No init file, using built-in defaults");
                return Ok(LoadedPreferences {
                    preferences: Self::default(),
                    warnings: Vec::new(),
                    modified: None,
                });
            }
            Err(e) => return Err(e),
        };

        let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        let (preferences, warnings) = Self::parse(&text);

        Ok(LoadedPreferences {
            preferences,
            warnings,
            modified,
        })
    }

    /// Writes the dotfile atomically: a `.tmp` sibling is written and
    /// renamed over `path`. The result is owner read/write and never
    /// executable.
    pub fn save(&self, path: &Path, program: &str, version: &str) -> io::Result<()> {
        let tmp = tmp_path(path);
        let _ = fs::remove_file(&tmp);

        let mut out = fs::File::create(&tmp)?;
        set_dotfile_mode(path, &out)?;

        let user = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "<unknown>".to_string());
        let header = format!(
            "# saverguard preferences file\n# Written by {program} {version} for {user} on {}.\n\n",
            Local::now().format("%a %b %e %H:%M:%S %Y")
        );

        let result = out
            .write_all(header.as_bytes())
            .and_then(|_| out.write_all(self.to_dotfile().render().as_bytes()))
            .and_then(|_| out.write_all(b"\n"))
            .and_then(|_| out.sync_all());

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Copies the old file's mode, forcing owner rw and clearing exec bits.
#[cfg(unix)]
fn set_dotfile_mode(original: &Path, out: &fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(original)
        .map(|m| m.permissions().mode())
        .unwrap_or(0o600);
    let mode = (mode | 0o600) & !0o111;
    out.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_dotfile_mode(_original: &Path, _out: &fs::File) -> io::Result<()> {
    Ok(())
}
