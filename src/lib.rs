//! Session and display engine for an IBM 5250 (IBM i) terminal emulator.
//!
//! The crate speaks TN5250 over any async byte transport, keeps the screen,
//! format table and keyboard state of a 5250 workstation, and hands finished
//! screens to a pluggable [`terminal::Terminal`].

/// Error types shared by every layer
pub mod error;

/// Session configuration (JSON file, command line, code)
pub mod config;

/// EBCDIC code pages and character classes
pub mod ebcdic;

/// Operator keys
pub mod keyboard;

/// Rendering backends
pub mod terminal;

/// LIB5250: IBM 5250 protocol implementation
pub mod lib5250;

pub use config::SessionConfig;
pub use error::{TN5250Error, TN5250Result};
pub use keyboard::Key;
pub use lib5250::{Display, Session, SessionEnd};
pub use terminal::{Terminal, TextTerminal};
