//! Beacon scanning session.
//!
//! A session wires a [`BeaconScanner`] to the filter and floor tracker, and
//! publishes a `ble_readings` snapshot on a fixed period over its own uplink
//! bus. Tearing the session down stops the scanner, the timer and the uplink
//! connection together.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::beacon::parse_beacon_name;
use super::filter::SignalFilter;
use super::floor::FloorTracker;
use crate::bus::{Bus, BusConfig};
use crate::models::{FloorKey, Outbound, Reading};

/// Floor reported upstream before any inference has happened.
pub const FALLBACK_FLOOR: FloorKey = FloorKey::B2;

// ---

/// One advertisement as delivered by the radio.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    // ---
    pub name: String,
    pub rssi: Option<f64>,
}

#[derive(Debug, Error)]
pub enum ScanError {
    // ---
    #[error("permission to scan for beacons was denied")]
    PermissionDenied,

    #[error("scanner unavailable: {0}")]
    Unavailable(String),
}

/// Source of beacon advertisements.
pub trait BeaconScanner: Send {
    /// Begin scanning, pushing every advertisement into `sink`.
    fn start(&mut self, sink: mpsc::UnboundedSender<Advertisement>) -> Result<(), ScanError>;

    /// Stop scanning. Must not block.
    fn stop(&mut self);
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    // ---
    pub alpha: f64,
    pub emit_interval: Duration,
    /// Consecutive accepted samples needed before the floor flips.
    pub floor_samples: u32,
    pub uplink: BusConfig,
}

// ---

/// Filter plus floor tracker, fed one advertisement at a time.
#[derive(Debug)]
pub struct BeaconPipeline {
    // ---
    filter: SignalFilter,
    tracker: FloorTracker,
}

impl BeaconPipeline {
    // ---
    pub fn new(alpha: f64, floor_samples: u32) -> Self {
        Self {
            filter: SignalFilter::new(alpha),
            tracker: FloorTracker::new(floor_samples),
        }
    }

    /// Process one advertisement. Returns the new floor on a transition.
    ///
    /// Names that are not `alias_digits` are ignored outright; rejected
    /// samples are recorded but never move the floor.
    pub fn ingest(&mut self, adv: &Advertisement) -> Option<FloorKey> {
        // ---
        let Some(beacon) = parse_beacon_name(&adv.name) else {
            trace!(name = %adv.name, "ignoring foreign advertisement");
            return None;
        };

        let sample = self.filter.ingest(beacon, adv.rssi);
        if !sample.accepted {
            trace!(beacon = %sample.reading.name, rssi = ?adv.rssi, "outlier rejected");
            return None;
        }
        self.tracker.observe(sample.reading.floor)
    }

    pub fn current_floor(&self) -> Option<FloorKey> {
        self.tracker.current()
    }

    pub fn latest(&self) -> Vec<Reading> {
        self.filter.latest()
    }

    /// The periodic uplink message for the current state.
    pub fn snapshot(&self) -> Outbound {
        Outbound::BleReadings {
            floor: self.tracker.current().unwrap_or(FALLBACK_FLOOR),
            list: self.filter.uplink(),
        }
    }
}

type SharedPipeline = Arc<Mutex<BeaconPipeline>>;

fn lock(pipeline: &SharedPipeline) -> MutexGuard<'_, BeaconPipeline> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A running scan. Dropping it tears everything down.
pub struct ScanSession {
    // ---
    pipeline: SharedPipeline,
    scanner: Box<dyn BeaconScanner>,
    uplink: Bus,
    pump: JoinHandle<()>,
    ticker: JoinHandle<()>,
    stopped: bool,
}

impl ScanSession {
    // ---
    /// Start scanning. `on_floor` runs once per inferred floor transition.
    ///
    /// Must be called from within a tokio runtime. If the scanner refuses to
    /// start (e.g. permission denied) nothing else is started either.
    pub fn start<S, F>(config: ScanConfig, mut scanner: S, on_floor: F) -> Result<ScanSession, ScanError>
    where
        S: BeaconScanner + 'static,
        F: FnMut(FloorKey) + Send + 'static,
    {
        // ---
        let rt = tokio::runtime::Handle::try_current()
            .map_err(|_| ScanError::Unavailable("no async runtime".into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        scanner.start(tx)?;

        let pipeline: SharedPipeline = Arc::new(Mutex::new(BeaconPipeline::new(
            config.alpha,
            config.floor_samples,
        )));
        let uplink = Bus::new(config.uplink).ensure_connected();

        let pump = rt.spawn(pump(rx, Arc::clone(&pipeline), on_floor));
        let ticker = rt.spawn(emit(Arc::clone(&pipeline), uplink.clone(), config.emit_interval));

        info!(
            alpha = config.alpha,
            emit_ms = config.emit_interval.as_millis() as u64,
            floor_samples = config.floor_samples,
            "beacon scan started"
        );

        Ok(ScanSession {
            pipeline,
            scanner: Box::new(scanner),
            uplink,
            pump,
            ticker,
            stopped: false,
        })
    }

    pub fn current_floor(&self) -> Option<FloorKey> {
        lock(&self.pipeline).current_floor()
    }

    pub fn latest(&self) -> Vec<Reading> {
        lock(&self.pipeline).latest()
    }

    pub fn uplink(&self) -> &Bus {
        &self.uplink
    }

    /// Stop the scanner, the uplink timer and the uplink connection.
    pub fn stop(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        // ---
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.scanner.stop();
        self.pump.abort();
        self.ticker.abort();
        self.uplink.close();
        info!("beacon scan stopped");
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn pump<F>(mut rx: mpsc::UnboundedReceiver<Advertisement>, pipeline: SharedPipeline, mut on_floor: F)
where
    F: FnMut(FloorKey) + Send + 'static,
{
    // ---
    while let Some(adv) = rx.recv().await {
        let transition = lock(&pipeline).ingest(&adv);
        // called with the pipeline unlocked so the callback may query it
        if let Some(floor) = transition {
            on_floor(floor);
        }
    }
    debug!("advertisement stream ended");
}

async fn emit(pipeline: SharedPipeline, uplink: Bus, period: Duration) {
    // ---
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let message = lock(&pipeline).snapshot();
        uplink.publish(&message);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::bus::QueuePolicy;
    use crate::models::UplinkReading;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn adv(name: &str, rssi: Option<f64>) -> Advertisement {
        Advertisement {
            name: name.into(),
            rssi,
        }
    }

    fn scan_config() -> ScanConfig {
        // ---
        ScanConfig {
            alpha: 0.1,
            emit_interval: Duration::from_millis(20),
            floor_samples: 1,
            uplink: BusConfig {
                label: "ble-test".into(),
                url: "ws://127.0.0.1:9".into(),
                reconnect_delay: Duration::from_millis(50),
                policy: QueuePolicy::DropWhileClosed,
            },
        }
    }

    /// Scanner fed by the test through a shared sender slot.
    #[derive(Clone, Default)]
    struct ManualScanner {
        sink: Arc<Mutex<Option<mpsc::UnboundedSender<Advertisement>>>>,
        stopped: Arc<AtomicBool>,
    }

    impl ManualScanner {
        fn push(&self, a: Advertisement) {
            if let Some(tx) = self.sink.lock().unwrap().as_ref() {
                tx.send(a).unwrap();
            }
        }
    }

    impl BeaconScanner for ManualScanner {
        fn start(&mut self, sink: mpsc::UnboundedSender<Advertisement>) -> Result<(), ScanError> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
            self.sink.lock().unwrap().take();
        }
    }

    struct DeniedScanner;

    impl BeaconScanner for DeniedScanner {
        fn start(&mut self, _: mpsc::UnboundedSender<Advertisement>) -> Result<(), ScanError> {
            Err(ScanError::PermissionDenied)
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn test_pipeline_ignores_foreign_names() {
        // ---
        let mut pipeline = BeaconPipeline::new(0.1, 1);
        assert_eq!(pipeline.ingest(&adv("garbage", Some(-60.0))), None);
        assert_eq!(pipeline.ingest(&adv("Galaxy Buds", Some(-60.0))), None);
        assert!(pipeline.latest().is_empty());
    }

    #[test]
    fn test_pipeline_floor_follows_accepted_samples() {
        // ---
        let mut pipeline = BeaconPipeline::new(0.1, 1);
        assert_eq!(pipeline.ingest(&adv("B1_7", Some(-70.0))), Some(FloorKey::B1));

        // an outlier on another floor does not move the floor
        assert_eq!(pipeline.ingest(&adv("F4_2", Some(127.0))), None);
        assert_eq!(pipeline.current_floor(), Some(FloorKey::B1));

        assert_eq!(pipeline.ingest(&adv("F4_2", Some(-75.0))), Some(FloorKey::F4));
        assert_eq!(pipeline.latest().len(), 2);
    }

    #[test]
    fn test_snapshot_shape() {
        // ---
        let mut pipeline = BeaconPipeline::new(0.1, 1);
        assert_eq!(
            pipeline.snapshot(),
            Outbound::BleReadings {
                floor: FALLBACK_FLOOR,
                list: vec![],
            }
        );

        pipeline.ingest(&adv("4F_9", Some(-60.0)));
        pipeline.ingest(&adv("4F_3", None));
        assert_eq!(
            pipeline.snapshot(),
            Outbound::BleReadings {
                floor: FloorKey::F4,
                list: vec![
                    UplinkReading {
                        id: 3,
                        filtered: None,
                        rssi: None
                    },
                    UplinkReading {
                        id: 9,
                        filtered: Some(-60.0),
                        rssi: Some(-60.0)
                    },
                ],
            }
        );
    }

    #[test]
    fn test_start_outside_runtime_is_unavailable() {
        // ---
        let result = ScanSession::start(scan_config(), ManualScanner::default(), |_| {});
        assert!(matches!(result, Err(ScanError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_permission_denied_starts_nothing() {
        // ---
        let result = ScanSession::start(scan_config(), DeniedScanner, |_| {});
        assert!(matches!(result, Err(ScanError::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_session_reports_floor_and_tears_down() {
        // ---
        let scanner = ManualScanner::default();
        let (floor_tx, mut floor_rx) = mpsc::unbounded_channel();

        let session = ScanSession::start(scan_config(), scanner.clone(), move |floor| {
            let _ = floor_tx.send(floor);
        })
        .unwrap();

        scanner.push(adv("B1_7", Some(-70.0)));
        scanner.push(adv("B1_8", Some(-72.0)));
        scanner.push(adv("1F_1", Some(-65.0)));

        assert_eq!(floor_rx.recv().await, Some(FloorKey::B1));
        assert_eq!(floor_rx.recv().await, Some(FloorKey::F1));
        assert_eq!(session.current_floor(), Some(FloorKey::F1));
        assert_eq!(session.latest().len(), 3);

        let uplink = session.uplink().clone();
        session.stop();
        assert!(scanner.stopped.load(Ordering::SeqCst));
        assert!(uplink.is_closed());
    }
}
