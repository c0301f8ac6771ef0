//! Floor-scoped render state and the reducers that maintain it.
//!
//! Reducers are looked up by [`MessageKind`] in a small registry. A message
//! whose floor is not the store's floor is ignored entirely. Side effects of
//! accepted fire alerts are returned as [`Effect`]s for the caller to run.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::models::{FireAlert, FloorKey, Inbound, MessageKind, Xy};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(3000);

/// Vibration length for an accepted fire alert.
pub const ALERT_HAPTIC_MS: u64 = 500;

// ---

/// Side effect requested by a reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    // ---
    Haptic { millis: u64 },
    ShowGuidance(FireAlert),
    Notify { title: String, body: String },
}

type Reducer = fn(&mut FloorStore, &Inbound, i64) -> Vec<Effect>;

const REDUCERS: &[(MessageKind, Reducer)] = &[
    (MessageKind::Position, reduce_position),
    (MessageKind::FireAlert, reduce_fire_alert),
    (MessageKind::Hazard, reduce_hazard),
    (MessageKind::HazardState, reduce_hazard_state),
];

/// Render-ready state for one floor.
#[derive(Debug, Clone)]
pub struct FloorStore {
    // ---
    floor: FloorKey,
    cooldown_ms: i64,
    current: Option<Xy>,
    path: Vec<Xy>,
    hazards: Vec<Xy>,
    active_alert: Option<FireAlert>,
    last_alert_ms: Option<i64>,
    /// Origin of the monotonic clock used by [`FloorStore::apply`].
    epoch: Instant,
}

impl FloorStore {
    // ---
    pub fn new(floor: FloorKey, cooldown: Duration) -> Self {
        Self {
            floor,
            cooldown_ms: i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX),
            current: None,
            path: Vec::new(),
            hazards: Vec::new(),
            active_alert: None,
            last_alert_ms: None,
            epoch: Instant::now(),
        }
    }

    /// Apply one message at the store's monotonic time.
    pub fn apply(&mut self, msg: &Inbound) -> Vec<Effect> {
        let now_ms = i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.apply_at(msg, now_ms)
    }

    /// Apply one message as if received `now_ms` milliseconds after the
    /// store was created.
    pub fn apply_at(&mut self, msg: &Inbound, now_ms: i64) -> Vec<Effect> {
        // ---
        if msg.floor() != Some(self.floor) {
            return Vec::new();
        }

        match REDUCERS.iter().find(|(kind, _)| *kind == msg.kind()) {
            Some((_, reducer)) => reducer(self, msg, now_ms),
            None => {
                debug!(floor = %self.floor, kind = ?msg.kind(), "no reducer for message");
                Vec::new()
            }
        }
    }

    pub fn floor(&self) -> FloorKey {
        self.floor
    }

    pub fn current(&self) -> Option<Xy> {
        self.current
    }

    pub fn path(&self) -> &[Xy] {
        &self.path
    }

    pub fn hazards(&self) -> &[Xy] {
        &self.hazards
    }

    pub fn active_alert(&self) -> Option<&FireAlert> {
        self.active_alert.as_ref()
    }

    /// Hide the alert banner. Does not reset the cooldown.
    pub fn dismiss_alert(&mut self) {
        self.active_alert = None;
    }
}

fn reduce_position(store: &mut FloorStore, msg: &Inbound, _now_ms: i64) -> Vec<Effect> {
    // ---
    let Inbound::Position { current, path, .. } = msg else {
        return Vec::new();
    };

    if let Some(xy) = current {
        store.current = Some(*xy);
    }
    if let Some(path) = path {
        store.path = path.clone();
    }
    Vec::new()
}

fn reduce_fire_alert(store: &mut FloorStore, msg: &Inbound, now_ms: i64) -> Vec<Effect> {
    // ---
    let Inbound::FireAlert(alert) = msg else {
        return Vec::new();
    };

    if let Some(last) = store.last_alert_ms {
        if now_ms - last < store.cooldown_ms {
            debug!(floor = %store.floor, since_ms = now_ms - last, "fire alert within cooldown dropped");
            return Vec::new();
        }
    }

    info!(floor = %alert.floor, confidence = alert.confidence, "fire alert accepted");
    store.last_alert_ms = Some(now_ms);
    store.active_alert = Some(alert.clone());

    vec![
        Effect::Haptic {
            millis: ALERT_HAPTIC_MS,
        },
        Effect::ShowGuidance(alert.clone()),
        Effect::Notify {
            title: "Fire detected".to_string(),
            body: format!("A fire was detected on floor {}. Evacuate now.", alert.floor),
        },
    ]
}

fn reduce_hazard(store: &mut FloorStore, msg: &Inbound, _now_ms: i64) -> Vec<Effect> {
    // ---
    let Inbound::Hazard { node, active, .. } = msg else {
        return Vec::new();
    };

    if *active {
        if !store.hazards.contains(node) {
            store.hazards.push(*node);
        }
    } else {
        store.hazards.retain(|h| h != node);
    }
    Vec::new()
}

fn reduce_hazard_state(store: &mut FloorStore, msg: &Inbound, _now_ms: i64) -> Vec<Effect> {
    // ---
    let Inbound::HazardState { nodes, .. } = msg else {
        return Vec::new();
    };

    store.hazards = nodes.clone();
    Vec::new()
}
