//! Logging setup shared by the mirrorsync binaries and tests.
//!
//! Output goes to stderr in either a human-readable or a JSON format, so
//! stdout stays free for machine-readable reports.

pub mod logging;

pub use logging::{init_logging, init_logging_json, LogFormat};
