//! # restfile client
//!
//! Turns a resolved [`Request`](restfile_config::Request) into a wire call:
//! applies run policy (redirects, cookies, TLS, delay), sends it, and either
//! verifies the declared expectation or hands the response to the post-hook
//! runtime, returning the hook's exports.

#![forbid(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod client;
pub mod verify;

pub use client::{Client, Outcome};
pub use verify::check_expectation;
