//! Beacon identity parsing.
//!
//! Beacons advertise names shaped `<alias>_<digits>`, e.g. `B1_7` or
//! `F4_12`. The alias resolves to a floor through the floor alias table and
//! the digits become the numeric beacon id. Anything else is not one of ours.

use tracing::trace;

use crate::models::FloorKey;

// ---

/// Floor and numeric id decoded from an advertised name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconId {
    // ---
    pub floor: FloorKey,
    pub id: u64,
}

impl BeaconId {
    /// Display name in canonical form, e.g. `4F_12` for an `F4_12` beacon.
    pub fn display_name(&self) -> String {
        format!("{}_{}", self.floor, self.id)
    }
}

/// Parse an advertised beacon name.
///
/// Surrounding whitespace is tolerated. Returns `None` when the name does
/// not match `alias_digits` or the alias names no known floor.
pub fn parse_beacon_name(name: &str) -> Option<BeaconId> {
    // ---
    let (alias, digits) = name.trim().split_once('_')?;

    if alias.is_empty() || !alias.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let floor = FloorKey::from_token(alias)?;
    let Ok(id) = digits.parse::<u64>() else {
        trace!(name, "beacon id out of range");
        return None;
    };
    Some(BeaconId { floor, id })
}
