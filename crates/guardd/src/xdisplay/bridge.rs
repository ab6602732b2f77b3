//! Xlib bridge: mirrors root properties onto a real display, reads
//! `SCREENSAVER` client messages and polls XScreenSaver idle time.
//!
//! Xlib connections are not `Send`, so the whole bridge lives on one
//! OS thread. It talks to the async side through the root window's
//! change feed and the activity channel.

use std::ffi::CString;
use std::mem::zeroed;
use std::os::raw::{c_int, c_long, c_uchar};
use std::ptr::null;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use x11::xlib;
use x11::xss;

use super::atoms::{AtomMap, Target, XProperty, XWrite};
use crate::activity::{ActivityEvent, ActivitySender, IdleTracker};
use crate::root::{PropertyChange, RootWindow};

/// How long the thread sleeps between looks at the display.
const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("cannot open X display {0}")]
    OpenDisplay(String),

    #[error("X bridge thread failed to start: {0}")]
    Thread(String),
}

struct XBridge {
    display: *mut xlib::Display,
    root: xlib::Window,
    owner: xlib::Window,
    atoms: AtomMap,
    has_idle: bool,
}

unsafe extern "C" fn log_x_error(_display: *mut xlib::Display, event: *mut xlib::XErrorEvent) -> c_int {
    if let Some(event) = event.as_ref() {
        warn!(
            code = event.error_code,
            request = event.request_code,
            resource = event.resourceid,
            "X protocol error"
        );
    }
    0
}

impl XBridge {
    fn open() -> Result<Self, BridgeError> {
        let name = std::env::var("DISPLAY").unwrap_or_default();

        // SAFETY: plain Xlib calls on a display this thread owns; every
        // pointer passed in outlives the call.
        unsafe {
            let display = xlib::XOpenDisplay(null());
            if display.is_null() {
                return Err(BridgeError::OpenDisplay(name));
            }
            xlib::XSetErrorHandler(Some(log_x_error));

            let root = xlib::XDefaultRootWindow(display);
            let owner = xlib::XCreateSimpleWindow(display, root, 0, 0, 1, 1, 0, 0, 0);

            let atoms = AtomMap::new(|name| {
                let name = CString::new(name).ok()?;
                Some(xlib::XInternAtom(display, name.as_ptr(), xlib::False))
            });

            let mut event_base = 0;
            let mut error_base = 0;
            let has_idle =
                xss::XScreenSaverQueryExtension(display, &mut event_base, &mut error_base) != 0;
            if !has_idle {
                warn!("X server lacks MIT-SCREEN-SAVER; input will not be detected");
            }

            xlib::XFlush(display);
            info!(display = %name, owner, "Connected to X display");

            Ok(Self {
                display,
                root,
                owner,
                atoms,
                has_idle,
            })
        }
    }

    fn write(&self, change: &PropertyChange) {
        let Some(XWrite {
            target,
            property,
            value,
        }) = self.atoms.export(change)
        else {
            return;
        };
        let window = match target {
            Target::Root => self.root,
            Target::Owner => self.owner,
        };

        // SAFETY: the data pointers stay valid for the duration of each call.
        unsafe {
            match &value {
                XProperty::Integers(words) => {
                    xlib::XChangeProperty(
                        self.display,
                        window,
                        property,
                        xlib::XA_INTEGER,
                        32,
                        xlib::PropModeReplace,
                        words.as_ptr().cast::<c_uchar>(),
                        c_int::try_from(words.len()).unwrap_or(0),
                    );
                }
                XProperty::Text(text) => {
                    xlib::XChangeProperty(
                        self.display,
                        window,
                        property,
                        xlib::XA_STRING,
                        8,
                        xlib::PropModeReplace,
                        text.as_ptr(),
                        c_int::try_from(text.len()).unwrap_or(0),
                    );
                }
            }
            xlib::XFlush(self.display);
        }
        debug!(atom = %change.atom, "Mirrored property to X");
    }

    /// Pending `SCREENSAVER` messages, already decoded.
    fn drain_messages(&self) -> Vec<ActivityEvent> {
        let mut out = Vec::new();
        // SAFETY: XNextEvent fills the zeroed event; XPending > 0 means it
        // will not block.
        unsafe {
            while xlib::XPending(self.display) > 0 {
                let mut event: xlib::XEvent = zeroed();
                xlib::XNextEvent(self.display, &mut event);
                if event.get_type() != xlib::ClientMessage {
                    continue;
                }

                let message = xlib::XClientMessageEvent::from(event);
                let data: Vec<c_long> = (0..5).map(|i| message.data.get_long(i)).collect();
                let Some(event) = self.atoms.import(message.message_type, message.format, &data) else {
                    continue;
                };
                match event.decode() {
                    Ok(command) => out.push(ActivityEvent::Command(command)),
                    Err(e) => warn!(error = %e, "Rejected X client message"),
                }
            }
        }
        out
    }

    fn idle_time(&self) -> Option<Duration> {
        if !self.has_idle {
            return None;
        }
        // SAFETY: the info struct is plain data and fully written by the call.
        unsafe {
            let mut info: xss::XScreenSaverInfo = zeroed();
            if xss::XScreenSaverQueryInfo(self.display, self.root, &mut info) == 0 {
                return None;
            }
            Some(Duration::from_millis(u64::from(info.idle)))
        }
    }
}

impl Drop for XBridge {
    fn drop(&mut self) {
        // SAFETY: the display was opened by us and is not used afterwards.
        unsafe {
            xlib::XDestroyWindow(self.display, self.owner);
            xlib::XCloseDisplay(self.display);
        }
    }
}

/// Starts the bridge thread and waits until the display is open.
///
/// The current properties are written first; later values come from
/// `root`'s change feed. Input is checked every `poll`.
pub async fn spawn_x11_bridge(
    root: &RootWindow,
    tx: ActivitySender,
    poll: Duration,
    cancel: CancellationToken,
) -> Result<thread::JoinHandle<()>, BridgeError> {
    let mut changes = root.subscribe();
    let initial = root.snapshot().await;
    let (ready_tx, ready_rx) = oneshot::channel();

    let handle = thread::Builder::new()
        .name("guardd-x11".to_string())
        .spawn(move || {
            let bridge = match XBridge::open() {
                Ok(bridge) => {
                    let _ = ready_tx.send(Ok(()));
                    bridge
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            for change in &initial {
                bridge.write(change);
            }

            let mut tracker = IdleTracker::new();
            let mut last_poll = Instant::now();
            let mut next_poll = last_poll;

            while !cancel.is_cancelled() {
                loop {
                    match changes.try_recv() {
                        Ok(change) => bridge.write(&change),
                        Err(broadcast::error::TryRecvError::Lagged(n)) => {
                            warn!(skipped = n, "X bridge lagged behind property changes");
                        }
                        Err(broadcast::error::TryRecvError::Empty) => break,
                        Err(broadcast::error::TryRecvError::Closed) => return,
                    }
                }

                for event in bridge.drain_messages() {
                    if tx.blocking_send(event).is_err() {
                        return;
                    }
                }

                let now = Instant::now();
                if now >= next_poll {
                    next_poll = now + poll;
                    if let Some(idle) = bridge.idle_time() {
                        let since_last = now.duration_since(last_poll);
                        last_poll = now;
                        if tracker.observe(idle, since_last) && tx.blocking_send(ActivityEvent::Input).is_err() {
                            return;
                        }
                    }
                }

                thread::sleep(TICK);
            }
            debug!("X bridge stopped");
        })
        .map_err(|e| BridgeError::Thread(e.to_string()))?;

    match ready_rx.await {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BridgeError::Thread("bridge thread exited early".to_string())),
    }
}

