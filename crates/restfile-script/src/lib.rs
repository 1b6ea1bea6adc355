//! # restfile scripting
//!
//! Runs a request's post-hook in a fresh, sandboxed rhai engine. Each
//! invocation gets its own engine and scope: `req`, `res`, and a mutable
//! `exports` map the caller reads back afterward. A global `fail(message)`
//! raises an explicit application error distinct from syntax/runtime errors.

#![forbid(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod context;
pub mod engine;
pub mod error;

pub use context::{HookContext, RequestState, ResponseState};
pub use engine::{run_hook, HookOutput};
pub use error::ScriptError;
