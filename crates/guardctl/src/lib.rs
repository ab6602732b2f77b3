//! saverguard command client
//!
//! The library half of `guardctl`: a small client for the daemon's
//! display socket and the command line built on it. Commands travel as
//! `SCREENSAVER` client messages; status comes from the root properties
//! the daemon publishes.

pub mod cli;
pub mod client;
pub mod error;

pub use client::GuardClient;
pub use error::{ClientError, Result};
