//! Beacon sensing gateway: name parsing, RSSI filtering, floor inference and
//! the scanning session that ties them to the uplink bus.

mod beacon;
mod filter;
mod floor;
mod replay;
mod session;

pub use beacon::{parse_beacon_name, BeaconId};
pub use filter::{
    is_outlier, smooth, DistanceModel, EmaTable, LogDistance, Sample, SignalFilter, DEFAULT_ALPHA,
    RSSI_FLOOR, RSSI_UNKNOWN,
};
pub use floor::{FloorCallback, FloorTracker};
pub use replay::LineScanner;
pub use session::{
    Advertisement, BeaconPipeline, BeaconScanner, ScanConfig, ScanError, ScanSession, FALLBACK_FLOOR,
};
