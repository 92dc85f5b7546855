//! Test utilities for the monitoring engine
//!
//! Provides scriptable stand-ins for the OS USB stack and the OS metadata
//! database so the engine can be exercised without hardware.
//!
//! # Example
//!
//! ```
//! use monitor::test_utils::{MockEnumerator, mock_device};
//! use monitor::DeviceEnumerator;
//!
//! let enumerator = MockEnumerator::new(vec![mock_device(1, &[], 0x1d6b, 0x0002)]);
//! assert_eq!(enumerator.enumerate().unwrap().len(), 1);
//!
//! enumerator.set_unavailable("Access denied (insufficient permissions)");
//! assert!(enumerator.enumerate().is_err());
//! ```

use crate::device::{Device, DeviceState};
use crate::enumerator::DeviceEnumerator;
use crate::metadata::{DatabaseRecord, DeviceDatabase, MetadataKey};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Create a device with a deterministic name, 480 Mbit/s speed and Normal state
///
/// The address is the last port of the path (1 for root hubs).
pub fn mock_device(bus: u8, path: &[u8], vendor_id: u16, product_id: u16) -> Device {
    Device {
        bus,
        path: path.to_vec(),
        vendor_id,
        product_id,
        name: format!("Test Device {:04x}:{:04x}", vendor_id, product_id),
        speed: "480".to_string(),
        address: path.last().copied().unwrap_or(1),
        state: DeviceState::Normal,
    }
}

/// Database record matching the device built by [`mock_device`] for the same arguments
pub fn mock_device_record(device: &Device) -> DatabaseRecord {
    DatabaseRecord {
        key: MetadataKey::of(device),
        vendor_name: "Test".to_string(),
        model_name: format!("Device {:04x}:{:04x}", device.vendor_id, device.product_id),
        speed: device.speed.clone(),
    }
}

/// Create a metadata database record
pub fn mock_record(
    vendor_id: u16,
    product_id: u16,
    bus: u8,
    address: u8,
    vendor_name: &str,
    model_name: &str,
    speed: &str,
) -> DatabaseRecord {
    DatabaseRecord {
        key: MetadataKey {
            vendor_id,
            product_id,
            bus,
            address,
        },
        vendor_name: vendor_name.to_string(),
        model_name: model_name.to_string(),
        speed: speed.to_string(),
    }
}

/// Scriptable enumerator; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockEnumerator {
    inner: Arc<MockEnumeratorInner>,
}

#[derive(Debug)]
struct MockEnumeratorInner {
    outcome: Mutex<Result<Vec<Device>, String>>,
    calls: AtomicUsize,
}

impl Default for MockEnumeratorInner {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(Ok(Vec::new())),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockEnumerator {
    pub fn new(devices: Vec<Device>) -> Self {
        let enumerator = Self::default();
        enumerator.set_devices(devices);
        enumerator
    }

    /// Devices returned by every following enumeration
    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.outcome() = Ok(devices);
    }

    /// Make every following enumeration fail
    pub fn set_unavailable(&self, message: &str) {
        *self.outcome() = Err(message.to_string());
    }

    /// Number of enumerations performed so far
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> std::sync::MutexGuard<'_, Result<Vec<Device>, String>> {
        self.inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn enumerate(&self) -> common::Result<Vec<Device>> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome().clone().map_err(common::Error::Usb)
    }
}

/// Scriptable metadata database; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    inner: Arc<MockDatabaseInner>,
}

#[derive(Debug, Default)]
struct MockDatabaseInner {
    records: Mutex<Vec<DatabaseRecord>>,
    /// Records that become visible starting with the given scan number
    delayed: Mutex<Vec<(usize, DatabaseRecord)>>,
    scans: AtomicUsize,
    failing: AtomicBool,
}

impl MockDatabase {
    pub fn new(records: Vec<DatabaseRecord>) -> Self {
        let database = Self::default();
        database.set_records(records);
        database
    }

    /// Database that knows every given device
    pub fn knowing(devices: &[Device]) -> Self {
        Self::new(devices.iter().map(mock_device_record).collect())
    }

    pub fn set_records(&self, records: Vec<DatabaseRecord>) {
        *self
            .inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = records;
    }

    /// Add a record that only shows up from the `scan`-th scan on (1-based)
    pub fn insert_after(&self, scan: usize, record: DatabaseRecord) {
        self.inner
            .delayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((scan, record));
    }

    /// Make every following scan fail
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of scans performed so far
    pub fn scans(&self) -> usize {
        self.inner.scans.load(Ordering::SeqCst)
    }
}

impl DeviceDatabase for MockDatabase {
    fn scan(&self) -> common::Result<Vec<DatabaseRecord>> {
        let scan = self.inner.scans.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(common::Error::Metadata("mock scan failure".to_string()));
        }

        let mut records = self
            .inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        records.extend(
            self.inner
                .delayed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(from, _)| scan >= *from)
                .map(|(_, record)| record.clone()),
        );
        Ok(records)
    }
}
