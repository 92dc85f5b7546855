//! Device metadata enrichment
//!
//! libusb only reports raw identity and topology. Human-readable names and
//! the kernel's negotiated link speed live in a separate OS database (sysfs
//! or the udev hardware database) that only supports full scans.
//!
//! [`MetadataCache`] keeps the last scan in memory keyed by
//! `(vendor, product, bus, address)`. A miss triggers a full rescan that
//! replaces the whole map in one swap. Freshly attached devices can show up
//! on the bus before the database has indexed them, so a miss is retried a
//! bounded number of times before the lookup gives up.

use crate::changelog::{ChangeLog, LogEntry};
use crate::config::MonitorConfig;
use crate::device::Device;
use chrono::Local;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Cache key: the address part makes it unique per attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetadataKey {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
}

impl MetadataKey {
    pub fn of(device: &Device) -> Self {
        Self {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            bus: device.bus,
            address: device.address,
        }
    }
}

/// Resolved name and speed for one device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceMetadata {
    pub name: String,
    pub speed: String,
}

/// One row of a database scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub key: MetadataKey,
    pub vendor_name: String,
    pub model_name: String,
    /// Raw speed attribute (Mbit/s)
    pub speed: String,
}

impl DatabaseRecord {
    fn metadata(&self) -> DeviceMetadata {
        DeviceMetadata {
            name: format!("{} {}", self.vendor_name.trim(), self.model_name.trim())
                .trim()
                .to_string(),
            speed: self.speed.trim().to_string(),
        }
    }
}

/// OS device-metadata database (full-table scan only)
pub trait DeviceDatabase: Send + Sync {
    fn scan(&self) -> common::Result<Vec<DatabaseRecord>>;
}

/// Database for platforms without a metadata source
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyDatabase;

impl DeviceDatabase for EmptyDatabase {
    fn scan(&self) -> common::Result<Vec<DatabaseRecord>> {
        Ok(Vec::new())
    }
}

/// Reads `/sys/bus/usb/devices/*` attributes directly
#[cfg(target_os = "linux")]
#[derive(Debug, Clone)]
pub struct SysfsDatabase {
    root: std::path::PathBuf,
}

#[cfg(target_os = "linux")]
impl Default for SysfsDatabase {
    fn default() -> Self {
        Self::with_root("/sys/bus/usb/devices")
    }
}

#[cfg(target_os = "linux")]
impl SysfsDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another directory laid out like `/sys/bus/usb/devices`
    pub fn with_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_record(dir: &std::path::Path) -> Option<DatabaseRecord> {
        let attr = |name: &str| -> Option<String> {
            std::fs::read_to_string(dir.join(name))
                .ok()
                .map(|s| s.trim().to_string())
        };

        // Interface directories ("1-1:1.0") have no idVendor
        let vendor_id = u16::from_str_radix(&attr("idVendor")?, 16).ok()?;
        let product_id = u16::from_str_radix(&attr("idProduct")?, 16).ok()?;
        let bus = attr("busnum")?.parse().ok()?;
        let address = attr("devnum")?.parse().ok()?;

        Some(DatabaseRecord {
            key: MetadataKey {
                vendor_id,
                product_id,
                bus,
                address,
            },
            vendor_name: attr("manufacturer").unwrap_or_default(),
            model_name: attr("product").unwrap_or_default(),
            speed: attr("speed").unwrap_or_default(),
        })
    }
}

#[cfg(target_os = "linux")]
impl DeviceDatabase for SysfsDatabase {
    fn scan(&self) -> common::Result<Vec<DatabaseRecord>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            common::Error::Metadata(format!("Failed to read {}: {}", self.root.display(), e))
        })?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Self::read_record(&entry.path()))
            .collect())
    }
}

/// Reads the udev database, preferring hwdb vendor/model names
#[cfg(all(target_os = "linux", feature = "udev"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct UdevDatabase;

#[cfg(all(target_os = "linux", feature = "udev"))]
impl UdevDatabase {
    pub fn new() -> Self {
        Self
    }

    fn record(device: &udev::Device) -> Option<DatabaseRecord> {
        let property = |name: &str| -> Option<String> {
            device
                .property_value(name)
                .map(|v| v.to_string_lossy().trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let attribute = |name: &str| -> Option<String> {
            device
                .attribute_value(name)
                .map(|v| v.to_string_lossy().trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let vendor_id = u16::from_str_radix(&property("ID_VENDOR_ID")?, 16).ok()?;
        let product_id = u16::from_str_radix(&property("ID_MODEL_ID")?, 16).ok()?;
        let bus = property("BUSNUM")?.parse().ok()?;
        let address = property("DEVNUM")?.parse().ok()?;

        Some(DatabaseRecord {
            key: MetadataKey {
                vendor_id,
                product_id,
                bus,
                address,
            },
            vendor_name: property("ID_VENDOR_FROM_DATABASE")
                .or_else(|| attribute("manufacturer"))
                .unwrap_or_default(),
            model_name: property("ID_MODEL_FROM_DATABASE")
                .or_else(|| attribute("product"))
                .unwrap_or_default(),
            speed: attribute("speed").unwrap_or_default(),
        })
    }
}

#[cfg(all(target_os = "linux", feature = "udev"))]
impl DeviceDatabase for UdevDatabase {
    fn scan(&self) -> common::Result<Vec<DatabaseRecord>> {
        let to_error = |e: std::io::Error| common::Error::Metadata(format!("udev: {}", e));

        let mut enumerator = udev::Enumerator::new().map_err(to_error)?;
        enumerator.match_subsystem("usb").map_err(to_error)?;
        let devices = enumerator.scan_devices().map_err(to_error)?;

        Ok(devices.filter_map(|device| Self::record(&device)).collect())
    }
}

/// The metadata database best suited to the current platform
pub fn default_database() -> Box<dyn DeviceDatabase> {
    #[cfg(all(target_os = "linux", feature = "udev"))]
    {
        Box::new(UdevDatabase::new())
    }
    #[cfg(all(target_os = "linux", not(feature = "udev")))]
    {
        Box::new(SysfsDatabase::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(EmptyDatabase)
    }
}

/// Enrichment cache over a [`DeviceDatabase`]
///
/// The write lock is only taken to swap in a freshly scanned map or to evict
/// a single key; scans run without holding any lock.
pub struct MetadataCache {
    database: Box<dyn DeviceDatabase>,
    entries: RwLock<HashMap<MetadataKey, DeviceMetadata>>,
    /// Keys whose last full lookup ran out of retries
    exhausted: Mutex<HashSet<MetadataKey>>,
    retry_attempts: u32,
    retry_delay: Duration,
    log: Arc<ChangeLog>,
}

impl MetadataCache {
    pub fn new(
        database: Box<dyn DeviceDatabase>,
        config: &MonitorConfig,
        log: Arc<ChangeLog>,
    ) -> Self {
        Self {
            database,
            entries: RwLock::new(HashMap::new()),
            exhausted: Mutex::new(HashSet::new()),
            retry_attempts: config.metadata_retry_attempts.max(1),
            retry_delay: config.retry_delay(),
            log,
        }
    }

    /// Resolve name and speed for a device identity
    ///
    /// Returns `None` once the retry budget is spent; exactly one Error entry
    /// is appended to the change log for that lookup. Later lookups of the
    /// same key get a single rescan without delay or further log entries until
    /// the key is evicted.
    pub fn resolve(&self, key: MetadataKey) -> Option<DeviceMetadata> {
        if let Some(metadata) = self.lookup(&key) {
            return Some(metadata);
        }

        if self.is_exhausted(&key) {
            self.rebuild();
            let found = self.lookup(&key);
            if found.is_some() {
                self.exhausted_set().remove(&key);
            }
            return found;
        }

        for attempt in 1..=self.retry_attempts {
            self.rebuild();
            if let Some(metadata) = self.lookup(&key) {
                if attempt > 1 {
                    debug!(
                        "Metadata for {:04x}:{:04x} indexed after {} rebuilds",
                        key.vendor_id, key.product_id, attempt
                    );
                }
                return Some(metadata);
            }
            if attempt < self.retry_attempts {
                std::thread::sleep(self.retry_delay);
            }
        }

        let message = format!(
            "No metadata for {:04x}:{:04x} (bus {:03} device {:03}) after {} attempts",
            key.vendor_id, key.product_id, key.bus, key.address, self.retry_attempts
        );
        warn!("{}", message);
        self.exhausted_set().insert(key);
        self.log.append(LogEntry::error(message, Local::now()));
        None
    }

    /// Fill in name and speed; returns whether metadata was found
    ///
    /// The descriptor-level speed reported by the enumerator is part of the
    /// device identity, so it is only replaced when the enumerator left it
    /// blank. Without metadata the name stays blank.
    pub fn enrich(&self, device: &mut Device) -> bool {
        match self.resolve(MetadataKey::of(device)) {
            Some(metadata) => {
                if !metadata.name.is_empty() {
                    device.name = metadata.name;
                }
                if device.speed.is_empty() {
                    device.speed = metadata.speed;
                }
                true
            }
            None => false,
        }
    }

    /// Drop the entry for a device that has left the bus
    pub fn evict(&self, key: &MetadataKey) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.exhausted_set().remove(key);
    }

    /// Rescan the database and replace the whole cache
    pub fn rebuild(&self) {
        let records = match self.database.scan() {
            Ok(records) => records,
            Err(e) => {
                warn!("Metadata scan failed, keeping previous cache: {}", e);
                return;
            }
        };

        let fresh: HashMap<MetadataKey, DeviceMetadata> = records
            .iter()
            .map(|record| (record.key, record.metadata()))
            .collect();

        let previous = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *entries, fresh)
        };
        drop(previous);
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &MetadataKey) -> Option<DeviceMetadata> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn is_exhausted(&self, key: &MetadataKey) -> bool {
        self.exhausted_set().contains(key)
    }

    fn exhausted_set(&self) -> std::sync::MutexGuard<'_, HashSet<MetadataKey>> {
        self.exhausted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
