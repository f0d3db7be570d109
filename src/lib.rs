//! conmux: a Windows-native, tmux-subset session daemon over ConPTY.
//!
//! One daemon per session. The daemon owns a pseudo-console running the
//! session's child process, keeps a scrollback ring and a live virtual
//! screen fed from the console's output stream, and serves a small
//! length-prefixed JSON protocol (`send-keys`, `capture-pane`,
//! `has-session`, `kill-session`, `set-option`, `pipe-pane`) over a
//! loopback TCP port advertised by a control file.

pub mod cli;
pub mod client;
pub mod control;
pub mod daemon;
pub mod keys;
pub mod protocol;
pub mod pty;
pub mod screen;
pub mod scrollback;
pub mod spawn;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
