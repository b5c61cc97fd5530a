//! Causerie is a multi-thread chat client core for OpenAI-compatible APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the session state: the message model, the multi-thread
//!   session store with its persistence port, the completion gateway, and
//!   runtime configuration.
//! - [`api`] defines the wire payloads exchanged with the completion
//!   endpoint.
//! - [`cli`] parses arguments and runs the line-oriented chat REPL that
//!   renders store state; it holds no conversation logic of its own.
//! - [`utils`] carries small shared helpers (URL construction, text
//!   truncation).
//!
//! The runtime entrypoint lives in the binary crate (`src/main.rs`) and
//! routes through [`cli::run`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
