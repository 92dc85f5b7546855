//! Monitoring engine instance
//!
//! A [`Monitor`] owns one enumerator, one metadata cache, one reconciler and
//! one change log. Instances are independent of each other; share one behind
//! an `Arc` between the poller and the UI.

use crate::changelog::{ChangeLog, LogEntry};
use crate::config::MonitorConfig;
use crate::device::Device;
use crate::enumerator::{DeviceEnumerator, UsbEnumerator};
use crate::metadata::{DeviceDatabase, MetadataCache, MetadataKey, default_database};
use crate::reconcile::{Reconciler, Reconciliation};
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Device list returned by [`Monitor::refresh`] and [`Monitor::poll_snapshot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub timestamp: DateTime<Local>,
    /// Enriched, sorted devices (all Normal after a refresh)
    pub devices: Vec<Device>,
}

/// Outcome of a single poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The USB stack could not be queried; the baseline is untouched
    Unavailable { timestamp: DateTime<Local> },
    /// Nothing attached or detached since the previous cycle
    Unchanged,
    /// Merged, sorted device list after at least one change
    Changed {
        timestamp: DateTime<Local>,
        devices: Vec<Device>,
    },
}

/// One independent monitoring engine
pub struct Monitor {
    enumerator: Box<dyn DeviceEnumerator>,
    cache: MetadataCache,
    /// Held for a whole cycle so polls and refreshes never interleave
    reconciler: Mutex<Reconciler>,
    log: Arc<ChangeLog>,
}

impl Monitor {
    pub fn new(
        enumerator: Box<dyn DeviceEnumerator>,
        database: Box<dyn DeviceDatabase>,
        config: &MonitorConfig,
    ) -> Self {
        let log = Arc::new(ChangeLog::new());
        Self {
            enumerator,
            cache: MetadataCache::new(database, config, log.clone()),
            reconciler: Mutex::new(Reconciler::new(log.clone())),
            log,
        }
    }

    /// Engine backed by libusb and the platform metadata database
    pub fn system(config: &MonitorConfig) -> Self {
        info!("Creating USB monitor (poll interval {:?})", config.poll_interval());
        Self::new(Box::new(UsbEnumerator::new()), default_database(), config)
    }

    /// Take a fresh snapshot and make it the baseline without logging changes
    ///
    /// On enumeration failure an Error entry is logged and the previous
    /// baseline stays in place.
    pub fn refresh(&self) -> common::Result<Snapshot> {
        let mut reconciler = self.reconciler.lock().unwrap_or_else(PoisonError::into_inner);

        let (timestamp, devices) = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.record_unavailable(&e, Local::now());
                return Err(e);
            }
        };

        let devices = reconciler.reset(devices);
        debug!("Refreshed baseline with {} devices", devices.len());
        Ok(Snapshot { timestamp, devices })
    }

    /// Run one enumerate, enrich and reconcile cycle
    pub fn poll(&self) -> PollOutcome {
        match self.cycle() {
            Ok((timestamp, reconciliation)) if reconciliation.changed => PollOutcome::Changed {
                timestamp,
                devices: reconciliation.devices,
            },
            Ok(_) => PollOutcome::Unchanged,
            Err(_) => PollOutcome::Unavailable {
                timestamp: Local::now(),
            },
        }
    }

    /// Run one reconcile cycle and return the merged devices, changed or not
    ///
    /// Unlike [`refresh`](Self::refresh) this keeps the baseline: changes
    /// since the previous cycle are tagged and logged. The very first cycle
    /// of an engine is silent either way.
    pub fn poll_snapshot(&self) -> common::Result<Snapshot> {
        let (timestamp, reconciliation) = self.cycle()?;
        Ok(Snapshot {
            timestamp,
            devices: reconciliation.devices,
        })
    }

    /// Copy of the change log, oldest first
    pub fn log(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    pub fn change_log(&self) -> &Arc<ChangeLog> {
        &self.log
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Enumerate, enrich and reconcile under the reconciler lock
    fn cycle(&self) -> common::Result<(DateTime<Local>, Reconciliation)> {
        let mut reconciler = self.reconciler.lock().unwrap_or_else(PoisonError::into_inner);

        let (timestamp, devices) = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.record_unavailable(&e, Local::now());
                return Err(e);
            }
        };

        let reconciliation = reconciler.reconcile(devices, timestamp);
        for device in &reconciliation.departed {
            self.cache.evict(&MetadataKey::of(device));
        }
        Ok((timestamp, reconciliation))
    }

    fn snapshot(&self) -> common::Result<(DateTime<Local>, Vec<Device>)> {
        let mut devices = self.enumerator.enumerate()?;
        let timestamp = Local::now();
        for device in &mut devices {
            self.cache.enrich(device);
        }
        Ok((timestamp, devices))
    }

    fn record_unavailable(&self, error: &common::Error, timestamp: DateTime<Local>) {
        warn!("USB enumeration unavailable: {}", error);
        self.log.append(LogEntry::error(
            format!("USB enumeration unavailable: {}", error),
            timestamp,
        ));
    }
}
