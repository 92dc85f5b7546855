//! Append-only device change log
//!
//! Every state transition the reconciliation engine observes, and every
//! absorbed failure (enumeration unavailable, metadata lookup exhausted),
//! becomes one [`LogEntry`]. Entries are never modified or pruned.

use crate::device::{Device, DeviceState};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// One line of the change history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub time: DateTime<Local>,
    /// Device name, or the error message for [`DeviceState::Error`] entries
    pub text: String,
    pub state: DeviceState,
    pub speed: String,
}

impl LogEntry {
    /// Entry describing a device transition
    pub fn for_device(device: &Device, time: DateTime<Local>) -> Self {
        Self {
            time,
            text: device.display_name(),
            state: device.state,
            speed: device.speed.clone(),
        }
    }

    /// Entry describing an absorbed failure
    pub fn error(message: impl Into<String>, time: DateTime<Local>) -> Self {
        Self {
            time,
            text: message.into(),
            state: DeviceState::Error,
            speed: String::new(),
        }
    }
}

/// Thread-safe append-only log shared by the engine components
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Copy of every entry appended so far, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the entries appended after the first `start` ones
    pub fn entries_since(&self, start: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(start..).map(<[LogEntry]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
