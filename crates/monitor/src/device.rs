//! USB device model
//!
//! A [`Device`] is a flat record produced by one enumeration pass. Devices are
//! rebuilt from scratch every poll cycle; two devices from different cycles
//! are "the same" only when their [`DeviceKey`]s are equal.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a device relative to the previous accepted snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Present now and in the previous snapshot
    #[default]
    Normal,
    /// Present now, absent from the previous snapshot
    Added,
    /// Absent now, present in the previous snapshot
    Removed,
    /// Used by change-log entries that describe a failure rather than a device
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Normal => "normal",
            DeviceState::Added => "added",
            DeviceState::Removed => "removed",
            DeviceState::Error => "error",
        };
        f.write_str(s)
    }
}

/// A USB device as seen by one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Bus number
    pub bus: u8,
    /// Hub port numbers from the root hub down to this device (empty = root hub)
    pub path: Vec<u8>,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Human-readable name (blank until enriched)
    pub name: String,
    /// Negotiated link speed in Mbit/s as reported by the OS (blank if unknown)
    pub speed: String,
    /// Device address on the bus
    pub address: u8,
    pub state: DeviceState,
}

impl Device {
    /// Identity key used for diffing snapshots
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            bus: self.bus,
            path: self.path.clone(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            speed: self.speed.clone(),
        }
    }

    /// Whether this device is a root hub
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Whether `other` is an immediate child of this device in the USB topology
    pub fn is_parent_of(&self, other: &Device) -> bool {
        self.bus == other.bus
            && self.path.len() + 1 == other.path.len()
            && other.path.starts_with(&self.path)
    }

    /// Name for display and logging, falling back to the VID:PID pair
    pub fn display_name(&self) -> String {
        let name = self.name.trim();
        if name.is_empty() {
            format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
        } else {
            name.to_string()
        }
    }

    /// Topology path formatted like the kernel does ("1-2.3"); root hubs print as "usbN"
    pub fn port_path(&self) -> String {
        if self.path.is_empty() {
            return format!("usb{}", self.bus);
        }
        let ports: Vec<String> = self.path.iter().map(|p| p.to_string()).collect();
        format!("{}-{}", self.bus, ports.join("."))
    }
}

/// Identity of a device across snapshots
///
/// Field order defines the display order: bus first, then the topology path
/// compared port by port with shorter prefixes first. The remaining fields
/// only break ties between devices that share a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub bus: u8,
    pub path: Vec<u8>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub speed: String,
}

/// Sort devices by bus, then by topology path
pub fn sort_devices(devices: &mut [Device]) {
    devices.sort_by_cached_key(Device::key);
}
