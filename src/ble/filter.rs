//! Per-beacon RSSI filtering.
//!
//! Raw samples pass through outlier rejection first, then an exponential
//! moving average. A rejected sample never touches the EMA state: the last
//! filtered value is carried forward and the raw value is only kept for
//! display. Distances come from a pluggable [`DistanceModel`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::beacon::BeaconId;
use crate::models::{Reading, UplinkReading};

/// Hardware sentinel for "RSSI unknown".
pub const RSSI_UNKNOWN: f64 = 127.0;

/// Samples at or below this level are treated as noise.
pub const RSSI_FLOOR: f64 = -99.0;

pub const DEFAULT_ALPHA: f64 = 0.1;

// ---

/// Converts a filtered RSSI into a distance estimate in meters.
pub trait DistanceModel: Send + Sync {
    fn distance_m(&self, rssi: f64) -> f64;
}

/// Log-distance path loss: `10 ^ ((tx_power - rssi) / (10 * n))`.
///
/// The defaults are placeholders until the beacons are surveyed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogDistance {
    // ---
    /// RSSI measured at one meter.
    pub tx_power: f64,
    /// Path loss exponent, 2.0 in free space.
    pub exponent: f64,
}

impl Default for LogDistance {
    fn default() -> Self {
        Self {
            tx_power: -59.0,
            exponent: 2.0,
        }
    }
}

impl DistanceModel for LogDistance {
    fn distance_m(&self, rssi: f64) -> f64 {
        10f64.powf((self.tx_power - rssi) / (10.0 * self.exponent))
    }
}

/// True when a raw sample must not reach the EMA.
pub fn is_outlier(raw: Option<f64>) -> bool {
    // ---
    match raw {
        None => true,
        Some(v) if !v.is_finite() => true,
        Some(v) if v == RSSI_UNKNOWN => true,
        Some(v) => v <= RSSI_FLOOR,
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq)]
struct EmaState {
    filtered: f64,
    updated_at: DateTime<Utc>,
}

/// Smoothing accumulators keyed by beacon id.
#[derive(Debug, Default)]
pub struct EmaTable {
    states: HashMap<u64, EmaState>,
}

impl EmaTable {
    // ---
    pub fn filtered(&self, id: u64) -> Option<f64> {
        self.states.get(&id).map(|s| s.filtered)
    }

    /// When the beacon's average last absorbed an accepted sample.
    pub fn updated_at(&self, id: u64) -> Option<DateTime<Utc>> {
        self.states.get(&id).map(|s| s.updated_at)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Fold one accepted sample into the beacon's EMA and return the new value.
///
/// The first sample for a beacon seeds the average with the raw value.
pub fn smooth(table: &mut EmaTable, id: u64, raw: f64, alpha: f64, now: DateTime<Utc>) -> f64 {
    // ---
    let filtered = match table.states.get(&id) {
        Some(prev) => alpha * raw + (1.0 - alpha) * prev.filtered,
        None => raw,
    };
    table.states.insert(
        id,
        EmaState {
            filtered,
            updated_at: now,
        },
    );
    filtered
}

/// Result of feeding one sample to the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    // ---
    pub reading: Reading,
    /// False when the raw value was rejected as an outlier.
    pub accepted: bool,
}

/// Outlier rejection, EMA smoothing and the latest reading per beacon.
///
/// Readings are keyed by beacon id for the whole scan session; a beacon that
/// reappears under another floor alias supersedes its previous entry.
#[derive(Debug)]
pub struct SignalFilter<M = LogDistance> {
    // ---
    alpha: f64,
    model: M,
    ema: EmaTable,
    latest: HashMap<u64, Reading>,
}

impl SignalFilter<LogDistance> {
    pub fn new(alpha: f64) -> Self {
        Self::with_model(alpha, LogDistance::default())
    }
}

impl Default for SignalFilter<LogDistance> {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl<M: DistanceModel> SignalFilter<M> {
    // ---
    pub fn with_model(alpha: f64, model: M) -> Self {
        Self {
            alpha,
            model,
            ema: EmaTable::default(),
            latest: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, beacon: BeaconId, raw: Option<f64>) -> Sample {
        self.ingest_at(beacon, raw, Utc::now())
    }

    /// Record one raw sample taken at `now`.
    pub fn ingest_at(&mut self, beacon: BeaconId, raw: Option<f64>, now: DateTime<Utc>) -> Sample {
        // ---
        let accepted = !is_outlier(raw);

        let filtered = match raw {
            Some(v) if accepted => Some(smooth(&mut self.ema, beacon.id, v, self.alpha, now)),
            _ => self.ema.filtered(beacon.id),
        };

        let reading = Reading {
            id: beacon.id,
            name: beacon.display_name(),
            floor: beacon.floor,
            rssi: raw,
            filtered,
            distance: filtered.map(|f| self.model.distance_m(f)),
        };
        self.latest.insert(beacon.id, reading.clone());

        Sample { reading, accepted }
    }

    pub fn reading(&self, id: u64) -> Option<&Reading> {
        self.latest.get(&id)
    }

    pub fn ema(&self) -> &EmaTable {
        &self.ema
    }

    /// Latest readings for display, ordered by floor label (`1F` < `4F` < `B1`
    /// < `B2`) then beacon id.
    pub fn latest(&self) -> Vec<Reading> {
        // ---
        let mut list: Vec<Reading> = self.latest.values().cloned().collect();
        list.sort_by(|a, b| a.floor.as_str().cmp(b.floor.as_str()).then(a.id.cmp(&b.id)));
        list
    }

    /// Latest readings in uplink shape, ordered by beacon id.
    pub fn uplink(&self) -> Vec<UplinkReading> {
        // ---
        let mut list: Vec<UplinkReading> = self
            .latest
            .values()
            .map(|r| UplinkReading {
                id: r.id,
                filtered: r.filtered,
                rssi: r.rssi,
            })
            .collect();
        list.sort_by_key(|r| r.id);
        list
    }
}
