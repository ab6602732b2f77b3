//! User activity sources.
//!
//! The session learns about the keyboard and pointer only through
//! [`SessionHandle::user_activity`]. Sources report an idle time; an
//! [`IdleTracker`] turns a reset of that clock into one [`ActivityEvent`],
//! and the forwarder hands events to the session actor.
//!
//! ```text
//! ┌──────────────┐  idle_time()  ┌──────────────┐  ActivityEvent  ┌──────────────┐
//! │  IdleSource  │──────────────▶│  idle poller │────────────────▶│  forwarder   │──▶ SessionHandle
//! │ (tty, X11)   │               │ IdleTracker  │     (mpsc)      │              │
//! └──────────────┘               └──────────────┘                 └──────────────┘
//! ```
//!
//! The X11 bridge feeds the same channel from its own thread, with
//! `ClientMessage` commands alongside input.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use guard_core::SaverCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionHandle;

const ACTIVITY_BUFFER: usize = 32;

/// Idle clocks and the poll timer drift apart by a few milliseconds.
const CLOCK_SLACK: Duration = Duration::from_millis(50);

/// Something that knows how long the user has been idle.
pub trait IdleSource: Send {
    fn name(&self) -> &'static str;

    fn idle_time(&mut self) -> io::Result<Duration>;
}

/// What a source reports to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    /// Keyboard or pointer input since the last report.
    Input,
    /// A `SCREENSAVER` client message from the display.
    Command(SaverCommand),
}

pub type ActivitySender = mpsc::Sender<ActivityEvent>;
pub type ActivityReceiver = mpsc::Receiver<ActivityEvent>;

pub fn activity_channel() -> (ActivitySender, ActivityReceiver) {
    mpsc::channel(ACTIVITY_BUFFER)
}

/// Detects input between two idle-time readings.
///
/// Input happened if the idle clock went backwards, or if it reads less
/// than the time since the previous reading.
#[derive(Debug, Default)]
pub struct IdleTracker {
    last: Option<Duration>,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reading taken `since_last` after the previous one.
    /// The first reading only sets the baseline.
    pub fn observe(&mut self, idle: Duration, since_last: Duration) -> bool {
        let active = match self.last {
            None => false,
            Some(last) => idle < last || idle + CLOCK_SLACK < since_last,
        };
        self.last = Some(idle);
        active
    }
}

/// Idle time of a terminal, from the access time the kernel bumps on
/// every keystroke. Coarse, but needs no display.
#[derive(Debug, Clone)]
pub struct TtyIdle {
    path: PathBuf,
}

impl TtyIdle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdleSource for TtyIdle {
    fn name(&self) -> &'static str {
        "tty"
    }

    fn idle_time(&mut self) -> io::Result<Duration> {
        let accessed = std::fs::metadata(&self.path)?.accessed()?;
        // An access time in the future counts as "just now".
        Ok(SystemTime::now()
            .duration_since(accessed)
            .unwrap_or(Duration::ZERO))
    }
}

/// Polls `source` every `every` and reports input on `tx`.
///
/// Read errors are logged once per run of failures; polling goes on.
pub fn spawn_idle_poller<S>(
    mut source: S,
    every: Duration,
    tx: ActivitySender,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: IdleSource + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tracker = IdleTracker::new();
        let mut last_poll = Instant::now();
        let mut failing = false;

        info!(source = source.name(), every_ms = every.as_millis() as u64, "Idle poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let since_last = now.duration_since(last_poll);
            last_poll = now;

            let idle = match source.idle_time() {
                Ok(idle) => {
                    failing = false;
                    idle
                }
                Err(e) => {
                    if !failing {
                        warn!(source = source.name(), error = %e, "Cannot read idle time");
                    }
                    failing = true;
                    continue;
                }
            };

            if tracker.observe(idle, since_last) {
                debug!(source = source.name(), idle_ms = idle.as_millis() as u64, "User input");
                if tx.send(ActivityEvent::Input).await.is_err() {
                    break;
                }
            }
        }
        debug!(source = source.name(), "Idle poller stopped");
    })
}

/// Hands activity events to the session actor until every sender is
/// gone or the token is cancelled.
pub fn spawn_activity_forwarder(
    mut rx: ActivityReceiver,
    session: SessionHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let result = match event {
                ActivityEvent::Input => session.user_activity().await,
                ActivityEvent::Command(command) => session.command(command).await,
            };

            match result {
                Ok(transition) if transition.is_applied() => {
                    debug!(?event, from = %transition.from, to = %transition.to, "Activity applied");
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Session gone, activity forwarder stopping");
                    break;
                }
            }
        }
        debug!("Activity forwarder stopped");
    })
}

/// The controlling terminal of standard input, if there is one.
pub fn stdin_tty() -> Option<PathBuf> {
    // SAFETY: ttyname returns static storage or null; copied out at once.
    unsafe {
        let name = libc::ttyname(0);
        if name.is_null() {
            return None;
        }
        let path = std::ffi::CStr::from_ptr(name).to_string_lossy().into_owned();
        Some(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{spawn_session, SessionEvent, SessionSettings};
    use guard_core::{Preferences, SessionState};
    use std::collections::VecDeque;
    use std::fs::{File, FileTimes};

    /// Replays fixed readings, then fails.
    struct Scripted(VecDeque<Duration>);

    impl IdleSource for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn idle_time(&mut self) -> io::Result<Duration> {
            self.0
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script finished"))
        }
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_tracker_first_reading_is_baseline() {
        let mut t = IdleTracker::new();
        assert!(!t.observe(secs(0.0), secs(5.0)));
    }

    #[test]
    fn test_tracker_detects_clock_reset() {
        let mut t = IdleTracker::new();
        t.observe(secs(10.0), secs(0.0));
        // No input: the clock advanced by the poll period.
        assert!(!t.observe(secs(15.0), secs(5.0)));
        // Reset.
        assert!(t.observe(secs(2.0), secs(5.0)));
        // Steady typing keeps the clock below the period even as it grows.
        assert!(t.observe(secs(3.0), secs(5.0)));
        assert!(!t.observe(secs(8.0), secs(5.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_input_unblanks_session() {
        let cancel = CancellationToken::new();
        let (session, _task) =
            spawn_session(Preferences::default(), SessionSettings::default(), cancel.clone());
        let mut events = session.subscribe();

        session.command(SaverCommand::Blank).await.unwrap();
        assert_eq!(session.status().await.unwrap().state, SessionState::Blanked);

        let (tx, rx) = activity_channel();
        let source = Scripted(VecDeque::from([secs(10.0), secs(15.0), secs(0.2)]));
        spawn_idle_poller(source, Duration::from_secs(5), tx, cancel.clone());
        spawn_activity_forwarder(rx, session.clone(), cancel.clone());

        let unblanked = tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if let Ok(SessionEvent::StatusChanged(status)) = events.recv().await {
                    if status.state == SessionState::Unlocked {
                        return;
                    }
                }
            }
        })
        .await;
        assert!(unblanked.is_ok(), "input never reached the session");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_forwarder_delivers_commands() {
        let cancel = CancellationToken::new();
        let (session, _task) =
            spawn_session(Preferences::default(), SessionSettings::default(), cancel.clone());

        let (tx, rx) = activity_channel();
        let forwarder = spawn_activity_forwarder(rx, session.clone(), cancel.clone());
        tx.send(ActivityEvent::Command(SaverCommand::Blank)).await.unwrap();
        drop(tx);
        forwarder.await.unwrap();

        assert_eq!(session.status().await.unwrap().state, SessionState::Blanked);
        cancel.cancel();
    }

    #[test]
    fn test_tty_idle_follows_access_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tty");
        let file = File::create(&path).unwrap();
        let then = SystemTime::now() - Duration::from_secs(30);
        file.set_times(FileTimes::new().set_accessed(then).set_modified(then))
            .unwrap();
        drop(file);

        let mut tty = TtyIdle::new(&path);
        let idle = tty.idle_time().unwrap();
        assert!(idle >= Duration::from_secs(29), "{idle:?}");
        assert!(idle < Duration::from_secs(120), "{idle:?}");

        let mut missing = TtyIdle::new(dir.path().join("absent"));
        assert!(missing.idle_time().is_err());
    }
}
