//! # Observability Infrastructure
//!
//! Structured logging for the broker and its CLI.

pub mod logging;

pub use logging::{env_filter, init_logging};
