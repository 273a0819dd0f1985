//! # PwaKit Common
//!
//! Logging configuration shared by the PwaKit crates.
//!
//! Each crate owns its error type; this crate only carries the ambient
//! pieces every binary and test harness needs to set up once.

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat, LoggingError};
