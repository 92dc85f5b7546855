//! Common utilities for usb-tree
//!
//! This crate provides the pieces shared between the monitoring engine and
//! the command line front-end: the error type and the tracing setup.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::setup_logging;
