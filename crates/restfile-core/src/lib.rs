//! # restfile core
//!
//! Shared types for the restfile workspace: the run-level error enum and the
//! response dump handed to operators and post-hooks.

#![forbid(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod dump;
pub mod error;

pub use dump::ResponseDump;
pub use error::{Error, ExpectationFailure, Result};
