//! The real X display.
//!
//! With the `x11` feature the daemon mirrors its root properties onto
//! the display, accepts `SCREENSAVER` client messages sent to its
//! window and reads idle time from the MIT-SCREEN-SAVER extension. The
//! atom translation is plain data and always built.

mod atoms;
#[cfg(feature = "x11")]
mod bridge;

pub use atoms::{AtomMap, Target, XProperty, XWrite};
#[cfg(feature = "x11")]
pub use bridge::{spawn_x11_bridge, BridgeError};
