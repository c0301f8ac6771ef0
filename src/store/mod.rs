//! Floor state gateway.

mod floor;
mod screen;

pub use floor::{Effect, FloorStore, ALERT_HAPTIC_MS, DEFAULT_COOLDOWN};
pub use screen::{AlertSurface, FloorScreen};
