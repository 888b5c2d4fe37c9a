#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Process bootstrap for the `ZonoChat` migrator: layered configuration,
//! logging and shutdown signals.

pub mod config;
pub mod logging;
pub mod signals;

pub use config::*;
pub use logging::*;
pub use signals::*;
