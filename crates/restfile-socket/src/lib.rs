//! # restfile socket
//!
//! The WebSocket session engine: dial the socket described by the file,
//! run a concurrent receive listener, and drive one of three send modes:
//! the ordered playbook, a single named entry, or the interactive REPL. They are
//! all coordinated by one fire-at-most-once completion signal.

#![forbid(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod repl;
pub mod session;

pub use repl::Repl;
pub use session::{Mode, Session};
