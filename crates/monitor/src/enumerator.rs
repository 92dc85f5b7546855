//! USB device enumeration
//!
//! Queries the OS USB stack (libusb through rusb) for every attached device.
//! Each call opens its own USB context and drops it before returning, so no
//! handle outlives a single snapshot, even when enumeration fails.

use crate::device::{Device, DeviceState};
use rusb::{Context, UsbContext};
use tracing::{debug, warn};

/// Source of flat USB device snapshots
///
/// `Err` means the OS stack could not be queried at all and must never be
/// treated as "no devices attached".
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate(&self) -> common::Result<Vec<Device>>;
}

/// Enumerator backed by libusb
#[derive(Debug, Default, Clone, Copy)]
pub struct UsbEnumerator;

impl UsbEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceEnumerator for UsbEnumerator {
    fn enumerate(&self) -> common::Result<Vec<Device>> {
        let context = Context::new().map_err(|e| common::Error::Usb(e.to_string()))?;
        let list = context
            .devices()
            .map_err(|e| common::Error::Usb(e.to_string()))?;

        let mut devices = Vec::with_capacity(list.len());
        for device in list.iter() {
            let bus = device.bus_number();
            let address = device.address();

            // A device can disappear between listing and reading its descriptor
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    warn!(
                        "Skipping device bus={} addr={}: descriptor unavailable: {}",
                        bus, address, e
                    );
                    continue;
                }
            };
            let path = match device.port_numbers() {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        "Skipping device bus={} addr={}: port path unavailable: {}",
                        bus, address, e
                    );
                    continue;
                }
            };

            devices.push(Device {
                bus,
                path,
                vendor_id: descriptor.vendor_id(),
                product_id: descriptor.product_id(),
                name: String::new(),
                speed: speed_mbps(device.speed()).to_string(),
                address,
                state: DeviceState::Normal,
            });
        }

        debug!("Enumerated {} USB devices", devices.len());
        Ok(devices)
    }
}

/// Map a libusb speed to the Mbit/s string the kernel reports in sysfs
pub fn speed_mbps(speed: rusb::Speed) -> &'static str {
    match speed {
        rusb::Speed::Low => "1.5",
        rusb::Speed::Full => "12",
        rusb::Speed::High => "480",
        rusb::Speed::Super => "5000",
        rusb::Speed::SuperPlus => "10000",
        _ => "",
    }
}
