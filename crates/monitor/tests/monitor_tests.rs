//! Integration tests for the monitoring engine
//!
//! Exercises the engine through its public API only, including:
//! - Attach, detach and re-attach across poll cycles
//! - Silent baseline resets
//! - Metadata lookups that never succeed
//! - Tree reconstruction of a realistic bus
//! - The background poller and its update queue
//! - Refreshes racing an in-flight poll cycle

use monitor::metadata::DatabaseRecord;
use monitor::test_utils::{MockDatabase, MockEnumerator, mock_device, mock_device_record};
use monitor::{
    Device, DeviceDatabase, DeviceState, Monitor, MonitorConfig, PollOutcome, PollUpdate, Poller,
    build_forest, update_queue,
};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

fn laptop_bus() -> Vec<Device> {
    vec![
        mock_device(1, &[], 0x1d6b, 0x0002),
        mock_device(1, &[1], 0x05e3, 0x0610),
        mock_device(1, &[1, 1], 0x046d, 0xc52b),
        mock_device(1, &[1, 4], 0x0bda, 0x8153),
        mock_device(1, &[3], 0x8087, 0x0026),
        mock_device(2, &[], 0x1d6b, 0x0003),
    ]
}

fn engine(devices: &[Device]) -> (Monitor, MockEnumerator, MockDatabase) {
    let enumerator = MockEnumerator::new(devices.to_vec());
    let database = MockDatabase::knowing(devices);
    let monitor = Monitor::new(
        Box::new(enumerator.clone()),
        Box::new(database.clone()),
        &MonitorConfig::default(),
    );
    (monitor, enumerator, database)
}

/// Metadata database whose next scan can be held open by the test
#[derive(Clone)]
struct GatedDatabase {
    inner: MockDatabase,
    gate: Arc<Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>>,
}

impl GatedDatabase {
    fn new(inner: MockDatabase) -> Self {
        Self {
            inner,
            gate: Arc::new(Mutex::new(None)),
        }
    }

    /// Block the next scan; returns (scan entered, release scan)
    fn arm(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

impl DeviceDatabase for GatedDatabase {
    fn scan(&self) -> common::Result<Vec<DatabaseRecord>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.inner.scan()
    }
}

fn changed(outcome: PollOutcome) -> Vec<Device> {
    match outcome {
        PollOutcome::Changed { devices, .. } => devices,
        other => panic!("expected a change, got {:?}", other),
    }
}

mod reconciliation {
    use super::*;

    #[test]
    fn test_identical_cycles_are_quiet() {
        let (monitor, _, _) = engine(&laptop_bus());
        monitor.refresh().unwrap();

        for _ in 0..5 {
            assert_eq!(monitor.poll(), PollOutcome::Unchanged);
        }
        assert!(monitor.log().is_empty());
    }

    #[test]
    fn test_hub_unplugged_with_children() {
        let bus = laptop_bus();
        let (monitor, enumerator, _) = engine(&bus);
        monitor.refresh().unwrap();

        // Pull the hub at port 1 together with everything behind it
        let remaining: Vec<Device> = bus
            .iter()
            .filter(|d| d.path.first() != Some(&1))
            .cloned()
            .collect();
        enumerator.set_devices(remaining);

        let devices = changed(monitor.poll());
        let removed: Vec<&Device> = devices
            .iter()
            .filter(|d| d.state == DeviceState::Removed)
            .collect();
        assert_eq!(removed.len(), 3);
        assert_eq!(monitor.log().len(), 3);

        // Removed devices keep their place in the tree
        let forest = build_forest(&devices);
        let hub = &forest[0].children[0];
        assert_eq!(hub.device.state, DeviceState::Removed);
        assert_eq!(hub.children.len(), 2);
    }

    #[test]
    fn test_reattach_after_refresh_is_added() {
        let bus = laptop_bus();
        let (monitor, enumerator, _) = engine(&bus);
        monitor.refresh().unwrap();

        let without_dongle: Vec<Device> = bus
            .iter()
            .filter(|d| d.product_id != 0xc52b)
            .cloned()
            .collect();
        enumerator.set_devices(without_dongle);
        changed(monitor.poll());

        // A refresh forgets the removed dongle entirely
        let snapshot = monitor.refresh().unwrap();
        assert_eq!(snapshot.devices.len(), bus.len() - 1);

        enumerator.set_devices(bus);
        let devices = changed(monitor.poll());
        let dongle = devices.iter().find(|d| d.product_id == 0xc52b).unwrap();
        assert_eq!(dongle.state, DeviceState::Added);
    }

    #[test]
    fn test_logs_carry_enriched_names() {
        let mut bus = laptop_bus();
        let (monitor, enumerator, database) = engine(&bus);
        monitor.refresh().unwrap();

        let mut raw = mock_device(2, &[2], 0x0781, 0x5581);
        let record = mock_device_record(&raw);
        raw.name.clear();
        bus.push(raw);
        let mut records: Vec<_> = laptop_bus().iter().map(mock_device_record).collect();
        records.push(record);
        database.set_records(records);
        enumerator.set_devices(bus);

        changed(monitor.poll());
        let log = monitor.log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "Test Device 0781:5581");
        assert_eq!(log[0].state, DeviceState::Added);
    }
}

mod enrichment {
    use super::*;

    #[test]
    fn test_unknown_device_is_accepted_after_bounded_retries() {
        let bus = laptop_bus();
        let (monitor, enumerator, database) = engine(&bus);
        monitor.refresh().unwrap();

        let mut stranger = mock_device(1, &[2], 0xdead, 0xbeef);
        stranger.name.clear();
        let mut attached = bus.clone();
        attached.push(stranger.clone());
        enumerator.set_devices(attached);

        let scans_before = database.scans();
        let started = Instant::now();
        let devices = changed(monitor.poll());
        let elapsed = started.elapsed();

        let config = MonitorConfig::default();
        assert_eq!(
            database.scans() - scans_before,
            config.metadata_retry_attempts as usize
        );
        let budget = config.retry_delay() * config.metadata_retry_attempts + Duration::from_secs(2);
        assert!(elapsed < budget);

        let found = devices.iter().find(|d| d.key() == stranger.key()).unwrap();
        assert!(found.name.is_empty());
        assert_eq!(found.display_name(), "dead:beef");

        let errors = monitor
            .log()
            .iter()
            .filter(|e| e.state == DeviceState::Error)
            .count();
        assert_eq!(errors, 1);

        // The next cycle does not stall on the same device again
        let scans_before = database.scans();
        assert_eq!(monitor.poll(), PollOutcome::Unchanged);
        assert_eq!(database.scans() - scans_before, 1);
    }
}

mod serialization {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_refresh_waits_for_poll_in_flight() {
        let bus = laptop_bus();
        let enumerator = MockEnumerator::new(bus.clone());
        let database = GatedDatabase::new(MockDatabase::knowing(&bus));
        let monitor = Arc::new(Monitor::new(
            Box::new(enumerator.clone()),
            Box::new(database.clone()),
            &MonitorConfig::default(),
        ));
        monitor.refresh().unwrap();

        let stick = mock_device(1, &[2], 0x0781, 0x5581);
        let mut attached = bus.clone();
        attached.push(stick.clone());
        database
            .inner
            .set_records(attached.iter().map(mock_device_record).collect());
        enumerator.set_devices(attached);
        let calls_before = enumerator.calls();

        // The stick is a cache miss, so the poll stops inside the rescan
        let (entered, release) = database.arm();
        let poll = {
            let monitor = monitor.clone();
            thread::spawn(move || monitor.poll())
        };
        entered.recv_timeout(WAIT).unwrap();

        let refresh = {
            let monitor = monitor.clone();
            thread::spawn(move || monitor.refresh())
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!refresh.is_finished());
        // The refresh has not even enumerated while the poll holds the engine
        assert_eq!(enumerator.calls(), calls_before + 1);

        release.send(()).unwrap();
        let devices = changed(poll.join().unwrap());
        let added = devices.iter().find(|d| d.key() == stick.key()).unwrap();
        assert_eq!(added.state, DeviceState::Added);

        let snapshot = refresh.join().unwrap().unwrap();
        assert_eq!(snapshot.devices.len(), bus.len() + 1);
        assert!(snapshot.devices.iter().all(|d| d.state == DeviceState::Normal));
        assert_eq!(enumerator.calls(), calls_before + 2);

        // The refresh became the baseline after the poll finished
        let entries = monitor.log().len();
        assert_eq!(entries, 1);
        assert_eq!(monitor.poll(), PollOutcome::Unchanged);
        assert_eq!(monitor.log().len(), entries);
    }
}

mod polling {
    use super::*;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_poller_follows_attach_and_detach() {
        let bus = laptop_bus();
        let (monitor, enumerator, _) = engine(&bus);
        let poller = Poller::new(Arc::new(monitor), Duration::from_millis(10));
        let (callback, updates) = update_queue(1);
        poller.start(callback).unwrap();

        let first = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        let PollUpdate::Forest { roots, .. } = first else {
            panic!("expected forest");
        };
        assert_eq!(roots.len(), 2);

        enumerator.set_devices(bus[..bus.len() - 1].to_vec());
        let second = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
        let PollUpdate::Forest { roots, .. } = second else {
            panic!("expected forest");
        };
        assert_eq!(roots[1].device.state, DeviceState::Removed);

        poller.stop();
        timeout(WAIT, poller.join()).await.unwrap();
        assert_eq!(poller.log().len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_engines_do_not_interfere() {
        let bus = laptop_bus();
        let (first, first_enumerator, _) = engine(&bus);
        let (second, _, _) = engine(&bus);
        let first = Poller::new(Arc::new(first), Duration::from_millis(10));
        let second = Poller::new(Arc::new(second), Duration::from_millis(10));

        let (first_callback, first_updates) = update_queue(1);
        let (second_callback, second_updates) = update_queue(1);
        first.start(first_callback).unwrap();
        second.start(second_callback).unwrap();
        timeout(WAIT, first_updates.recv()).await.unwrap().unwrap();
        timeout(WAIT, second_updates.recv()).await.unwrap().unwrap();

        first_enumerator.set_unavailable("Access denied (insufficient permissions)");
        let update = timeout(WAIT, first_updates.recv()).await.unwrap().unwrap();
        assert!(matches!(update, PollUpdate::NoData { .. }));

        first.stop();
        second.stop();
        first.join().await;
        second.join().await;

        assert!(!first.log().is_empty());
        assert!(second.log().is_empty());
    }
}
