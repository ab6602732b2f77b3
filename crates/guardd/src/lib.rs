//! saverguard daemon - session state machine, root properties and display socket
//!
//! This crate provides the daemon's moving parts:
//! - `session` - the actor that owns the session state machine and its timers
//! - `auth` - supervision of the external authenticator child
//! - `demo` - the display-hack child processes
//! - `root` - the root-window property table clients read
//! - `server` - Unix socket server for display clients
//! - `prefs` - the init-file watcher
//! - `activity` - idle-time sources that report user input
//! - `xdisplay` - the X display bridge (`x11` feature)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        guardd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│       SessionActor          │   │
//! │  │ (Unix Socket)   │     │  (session state owner)      │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ PropertyNotify              │ events            │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│◀────│        RootWindow           │   │
//! │  │  (per client)   │     │  (_SCREENSAVER_* props)     │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code does not call `.unwrap()`, `.expect()` or `panic!()`.
//! Channel operations handle closure gracefully.

pub mod activity;
pub mod auth;
pub mod cli;
pub mod config;
pub mod demo;
pub mod prefs;
pub mod root;
pub mod server;
pub mod session;
pub mod xdisplay;
