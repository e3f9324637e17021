//! # Bus Runtime Library
//!
//! Process plumbing around the message bus, exposed as a library so it can be
//! tested. The entry point is the `main.rs` binary.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod error;
pub mod logging;
pub mod routing_file;
pub mod runtime;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use logging::init_logging;
pub use routing_file::{FileRoutingSource, FileVersion};
pub use runtime::GatewayRuntime;
