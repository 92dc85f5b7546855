//! USB device monitoring engine for usb-tree
//!
//! This crate watches the locally attached USB devices: it enumerates the
//! bus, enriches raw identities with names from the OS device database,
//! reconciles every snapshot against the previous one, rebuilds the hub
//! topology as a forest and keeps a change log. [`Poller`] drives the cycle
//! in the background and hands updates to a consumer.

pub mod changelog;
pub mod config;
pub mod device;
pub mod enumerator;
pub mod metadata;
pub mod monitor;
pub mod poller;
pub mod reconcile;
pub mod test_utils;
pub mod tree;

pub use changelog::{ChangeLog, LogEntry};
pub use config::MonitorConfig;
pub use device::{Device, DeviceKey, DeviceState};
pub use enumerator::{DeviceEnumerator, UsbEnumerator};
pub use metadata::{DeviceDatabase, DeviceMetadata, MetadataCache, MetadataKey};
pub use monitor::{Monitor, PollOutcome, Snapshot};
pub use poller::{PollUpdate, Poller, PollerState, update_queue};
pub use reconcile::{Reconciler, Reconciliation};
pub use tree::{TreeNode, build_forest};
