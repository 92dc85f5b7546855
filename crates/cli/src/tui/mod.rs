//! Terminal User Interface
//!
//! Interactive view of the device tree and change log.

pub mod app;
pub mod events;
pub mod ui;

pub use app::run;
