//! Snapshot reconciliation
//!
//! Diffs every new enumeration against the previously emitted merged state
//! and tags each device Normal, Added or Removed. Removed devices stay in the
//! merged state until they come back or the baseline is reset, so the user
//! can see what left the bus.

use crate::changelog::{ChangeLog, LogEntry};
use crate::device::{Device, DeviceKey, DeviceState, sort_devices};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Whether any device appeared, disappeared or came back
    pub changed: bool,
    /// Merged, sorted device list
    pub devices: Vec<Device>,
    /// Devices that left the bus during this pass
    pub departed: Vec<Device>,
}

/// Owner of the reconciliation baseline
///
/// Not synchronized on its own; the engine keeps it behind a single mutex so
/// poll cycles and refreshes never interleave.
#[derive(Debug)]
pub struct Reconciler {
    /// `None` until the first snapshot has been accepted
    baseline: Option<HashMap<DeviceKey, Device>>,
    log: Arc<ChangeLog>,
}

impl Reconciler {
    pub fn new(log: Arc<ChangeLog>) -> Self {
        Self {
            baseline: None,
            log,
        }
    }

    /// Whether a baseline has been established
    pub fn is_initialized(&self) -> bool {
        self.baseline.is_some()
    }

    /// Diff `snapshot` against the baseline and make the result the new baseline
    ///
    /// A device is logged once when its key is new to the baseline, when it
    /// disappears, or when a removed device reappears. A device that was
    /// Added last time settles to Normal silently, so reconciling the same
    /// snapshot twice reports no change. The very first call only
    /// establishes the baseline.
    pub fn reconcile(&mut self, snapshot: Vec<Device>, time: DateTime<Local>) -> Reconciliation {
        let Some(baseline) = self.baseline.take() else {
            let devices = self.reset(snapshot);
            debug!("Baseline established with {} devices", devices.len());
            return Reconciliation {
                changed: false,
                devices,
                departed: Vec::new(),
            };
        };

        let mut merged: HashMap<DeviceKey, Device> = baseline
            .iter()
            .map(|(key, device)| {
                let mut device = device.clone();
                device.state = DeviceState::Removed;
                (key.clone(), device)
            })
            .collect();

        for mut device in snapshot {
            device.state = if merged.contains_key(&device.key()) {
                DeviceState::Normal
            } else {
                DeviceState::Added
            };
            merged.insert(device.key(), device);
        }

        let mut changed = false;
        let mut departed = Vec::new();
        for (key, device) in &merged {
            let logged = match baseline.get(key) {
                None => true,
                Some(previous) => {
                    let was_present = previous.state != DeviceState::Removed;
                    let is_present = device.state != DeviceState::Removed;
                    if was_present && !is_present {
                        departed.push(device.clone());
                    }
                    was_present != is_present
                }
            };
            if logged {
                self.log.append(LogEntry::for_device(device, time));
                changed = true;
            }
        }

        let mut devices: Vec<Device> = merged.values().cloned().collect();
        sort_devices(&mut devices);
        sort_devices(&mut departed);
        self.baseline = Some(merged);

        if changed {
            debug!(
                "Reconciled {} devices, {} departed",
                devices.len(),
                departed.len()
            );
        }

        Reconciliation {
            changed,
            devices,
            departed,
        }
    }

    /// Replace the baseline with `snapshot`, every device Normal, without logging
    pub fn reset(&mut self, snapshot: Vec<Device>) -> Vec<Device> {
        let mut devices = snapshot;
        for device in &mut devices {
            device.state = DeviceState::Normal;
        }
        sort_devices(&mut devices);
        self.baseline = Some(
            devices
                .iter()
                .map(|device| (device.key(), device.clone()))
                .collect(),
        );
        devices
    }
}
