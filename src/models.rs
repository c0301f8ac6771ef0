//! Data models shared by the map, beacon and bus layers.
//!
//! Inbound payloads arrive as loosely shaped JSON objects discriminated by a
//! `kind` field. They are decoded once, at the transport boundary, into the
//! [`Inbound`] sum type so reducers never poke at raw JSON. Outbound messages
//! are plain serde enums tagged the same way.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---

/// Canonical floor identifiers known to the building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FloorKey {
    // ---
    B2,
    B1,
    #[serde(rename = "1F")]
    F1,
    #[serde(rename = "4F")]
    F4,
}

/// Raw tokens accepted for each floor, after trimming and uppercasing.
const FLOOR_ALIASES: &[(&str, FloorKey)] = &[
    ("B2", FloorKey::B2),
    ("BF2", FloorKey::B2),
    ("B1", FloorKey::B1),
    ("BF1", FloorKey::B1),
    ("1F", FloorKey::F1),
    ("F1", FloorKey::F1),
    ("4F", FloorKey::F4),
    ("F4", FloorKey::F4),
];

impl FloorKey {
    // ---
    pub const ALL: [FloorKey; 4] = [FloorKey::B2, FloorKey::B1, FloorKey::F1, FloorKey::F4];

    /// Resolve a raw floor token through the alias table.
    ///
    /// Returns `None` for tokens that do not name a known floor.
    pub fn from_token(token: &str) -> Option<Self> {
        // ---
        let token = token.trim().to_ascii_uppercase();
        FLOOR_ALIASES
            .iter()
            .find(|(alias, _)| *alias == token)
            .map(|(_, floor)| *floor)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FloorKey::B2 => "B2",
            FloorKey::B1 => "B1",
            FloorKey::F1 => "1F",
            FloorKey::F4 => "4F",
        }
    }
}

impl fmt::Display for FloorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coordinate pair in the building's local metric system.
///
/// Serialized as a two element array, the shape the server uses for nodes,
/// hazards and path points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Xy {
    // ---
    pub x: f64,
    pub y: f64,
}

impl Xy {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Xy {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Xy> for [f64; 2] {
    fn from(p: Xy) -> Self {
        [p.x, p.y]
    }
}

/// A node of a floor's graph, as drawn on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarPoint {
    // ---
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl PlanarPoint {
    // ---
    /// Build the node set of a floor from its static manifest of pairs.
    ///
    /// Ids are derived from the source coordinates, e.g. `"(-2,5)"`, which is
    /// also how the server identifies nodes in `delete_node` requests.
    pub fn from_pairs(pairs: &[[f64; 2]]) -> Vec<PlanarPoint> {
        // ---
        pairs
            .iter()
            .map(|&[x, y]| PlanarPoint {
                id: format!("({},{})", x, y),
                x,
                y,
            })
            .collect()
    }

    pub fn xy(&self) -> Xy {
        Xy::new(self.x, self.y)
    }
}

/// Latest observation of one beacon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    // ---
    pub id: u64,
    pub name: String,
    pub floor: FloorKey,
    /// Raw RSSI as reported, kept even when rejected as an outlier.
    pub rssi: Option<f64>,
    /// EMA filtered RSSI; carried forward across rejected samples.
    pub filtered: Option<f64>,
    /// Distance estimate in meters derived from `filtered`.
    pub distance: Option<f64>,
}

/// A fire alert pushed by the detector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireAlert {
    // ---
    pub floor: FloorKey,
    pub confidence: f64,
    pub ts: Option<String>,
    pub image: Option<String>,
}

// ---

/// Failure to turn a JSON payload into an [`Inbound`] message.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    // ---
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

/// Discriminant of an [`Inbound`] message, used to look up reducers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // ---
    Position,
    FireAlert,
    Hazard,
    HazardState,
    GraphAck,
    Unknown,
}

/// Decoded inbound message from the shared channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    // ---
    /// No `kind`: snapped position and best path for a floor.
    Position {
        floor: FloorKey,
        /// First entry of `snapped_list`, if well formed.
        current: Option<Xy>,
        /// Cleaned `best_path`; `None` when the field is absent.
        path: Option<Vec<Xy>>,
    },
    FireAlert(FireAlert),
    Hazard {
        floor: FloorKey,
        node: Xy,
        active: bool,
    },
    HazardState {
        floor: FloorKey,
        nodes: Vec<Xy>,
    },
    GraphAck {
        op: String,
        floor: Option<FloorKey>,
    },
    Unknown {
        kind: String,
    },
}

impl Inbound {
    // ---
    /// Decode a JSON value into a typed message.
    ///
    /// Malformed entries inside lists (anything but a numeric pair) are
    /// filtered out rather than failing the whole message.
    pub fn decode(value: &Value) -> Result<Inbound, DecodeError> {
        // ---
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let kind = obj
            .get("kind")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");

        match kind {
            "" => {
                let floor = required_floor(value)?;
                let current = obj
                    .get("snapped_list")
                    .and_then(Value::as_array)
                    .and_then(|list| list.first())
                    .and_then(parse_pair);
                let path = obj.get("best_path").and_then(Value::as_array).map(|list| parse_pairs(list));
                Ok(Inbound::Position {
                    floor,
                    current,
                    path,
                })
            }
            "fire_alert" => Ok(Inbound::FireAlert(FireAlert {
                floor: required_floor(value)?,
                confidence: obj.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
                ts: obj.get("ts").and_then(Value::as_str).map(String::from),
                image: obj.get("image").and_then(Value::as_str).map(String::from),
            })),
            "hazard" => {
                let floor = required_floor(value)?;
                let node = obj
                    .get("node")
                    .ok_or(DecodeError::MissingField("node"))
                    .and_then(|n| parse_pair(n).ok_or(DecodeError::InvalidField("node")))?;
                // Only an explicit `false` clears a hazard.
                let active = !matches!(obj.get("active"), Some(Value::Bool(false)));
                Ok(Inbound::Hazard {
                    floor,
                    node,
                    active,
                })
            }
            "hazard_state" => {
                let floor = required_floor(value)?;
                let nodes = obj
                    .get("hazard_nodes")
                    .ok_or(DecodeError::MissingField("hazard_nodes"))?
                    .as_array()
                    .ok_or(DecodeError::InvalidField("hazard_nodes"))?;
                Ok(Inbound::HazardState {
                    floor,
                    nodes: parse_pairs(nodes),
                })
            }
            "graph_ack" => Ok(Inbound::GraphAck {
                op: obj.get("op").and_then(Value::as_str).unwrap_or_default().to_string(),
                floor: obj.get("floor").and_then(Value::as_str).and_then(FloorKey::from_token),
            }),
            other => Ok(Inbound::Unknown {
                kind: other.to_string(),
            }),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Inbound::Position { .. } => MessageKind::Position,
            Inbound::FireAlert(_) => MessageKind::FireAlert,
            Inbound::Hazard { .. } => MessageKind::Hazard,
            Inbound::HazardState { .. } => MessageKind::HazardState,
            Inbound::GraphAck { .. } => MessageKind::GraphAck,
            Inbound::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// Floor the message is scoped to, if any.
    pub fn floor(&self) -> Option<FloorKey> {
        match self {
            Inbound::Position { floor, .. }
            | Inbound::Hazard { floor, .. }
            | Inbound::HazardState { floor, .. } => Some(*floor),
            Inbound::FireAlert(alert) => Some(alert.floor),
            Inbound::GraphAck { floor, .. } => *floor,
            Inbound::Unknown { .. } => None,
        }
    }
}

fn required_floor(value: &Value) -> Result<FloorKey, DecodeError> {
    // ---
    let raw = value
        .get("floor")
        .ok_or(DecodeError::MissingField("floor"))?
        .as_str()
        .ok_or(DecodeError::InvalidField("floor"))?;
    FloorKey::from_token(raw).ok_or(DecodeError::InvalidField("floor"))
}

fn parse_pair(value: &Value) -> Option<Xy> {
    match value.as_array()?.as_slice() {
        [x, y] => Some(Xy::new(x.as_f64()?, y.as_f64()?)),
        _ => None,
    }
}

fn parse_pairs(list: &[Value]) -> Vec<Xy> {
    list.iter().filter_map(parse_pair).collect()
}

// ---

/// One beacon entry of a `ble_readings` uplink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UplinkReading {
    // ---
    pub id: u64,
    pub filtered: Option<f64>,
    pub rssi: Option<f64>,
}

/// Messages this client sends upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    // ---
    RegisterPushToken { token: String },
    DeleteNode { floor: FloorKey, node: String },
    RestoreNode { floor: FloorKey, node: String },
    RestoreGraph { floor: FloorKey },
    BleReadings { floor: FloorKey, list: Vec<UplinkReading> },
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_floor_aliases() {
        // ---
        assert_eq!(FloorKey::from_token("B2"), Some(FloorKey::B2));
        assert_eq!(FloorKey::from_token("bf1"), Some(FloorKey::B1));
        assert_eq!(FloorKey::from_token(" F1 "), Some(FloorKey::F1));
        assert_eq!(FloorKey::from_token("4f"), Some(FloorKey::F4));
        assert_eq!(FloorKey::from_token("5F"), None);
        assert_eq!(FloorKey::F1.to_string(), "1F");
    }

    #[test]
    fn test_point_ids_follow_coordinates() {
        // ---
        let pts = PlanarPoint::from_pairs(&[[-6.0, -3.0], [2.5, 1.0]]);
        assert_eq!(pts[0].id, "(-6,-3)");
        assert_eq!(pts[1].id, "(2.5,1)");
    }

    #[test]
    fn test_decode_position_without_kind() {
        // ---
        let msg = json!({
            "floor": "4F",
            "snapped_list": [[2, 1], [3, 3]],
            "best_path": [[2, 1], "junk", [6], [6, 1]]
        });

        let decoded = Inbound::decode(&msg).unwrap();
        assert_eq!(
            decoded,
            Inbound::Position {
                floor: FloorKey::F4,
                current: Some(Xy::new(2.0, 1.0)),
                path: Some(vec![Xy::new(2.0, 1.0), Xy::new(6.0, 1.0)]),
            }
        );
        assert_eq!(decoded.kind(), MessageKind::Position);
    }

    #[test]
    fn test_decode_position_with_missing_lists() {
        // ---
        let decoded = Inbound::decode(&json!({ "floor": "B1", "snapped_list": [] })).unwrap();
        assert_eq!(
            decoded,
            Inbound::Position {
                floor: FloorKey::B1,
                current: None,
                path: None,
            }
        );
    }

    #[test]
    fn test_decode_fire_alert() {
        // ---
        let msg = json!({ "kind": "fire_alert", "floor": "4F", "confidence": 0.87, "ts": "2025-09-01T10:00:00", "image": 5 });
        let Inbound::FireAlert(alert) = Inbound::decode(&msg).unwrap() else {
            panic!("expected fire alert");
        };
        assert_eq!(alert.floor, FloorKey::F4);
        assert_eq!(alert.confidence, 0.87);
        assert_eq!(alert.ts.as_deref(), Some("2025-09-01T10:00:00"));
        assert_eq!(alert.image, None, "non-string image is discarded");
    }

    #[test]
    fn test_decode_hazard_active_flag() {
        // ---
        let add = Inbound::decode(&json!({ "kind": "hazard", "floor": "4F", "node": [2, 1] })).unwrap();
        assert!(matches!(add, Inbound::Hazard { active: true, .. }));

        let clear =
            Inbound::decode(&json!({ "kind": "hazard", "floor": "4F", "node": [2, 1], "active": false }))
                .unwrap();
        assert!(matches!(clear, Inbound::Hazard { active: false, .. }));

        let bad = Inbound::decode(&json!({ "kind": "hazard", "floor": "4F", "node": [2] }));
        assert_eq!(bad, Err(DecodeError::InvalidField("node")));
    }

    #[test]
    fn test_decode_errors() {
        // ---
        assert_eq!(Inbound::decode(&json!([1, 2])), Err(DecodeError::NotAnObject));
        assert_eq!(
            Inbound::decode(&json!({ "kind": "hazard_state", "hazard_nodes": [] })),
            Err(DecodeError::MissingField("floor"))
        );
        assert_eq!(
            Inbound::decode(&json!({ "floor": "9F" })),
            Err(DecodeError::InvalidField("floor"))
        );
    }

    #[test]
    fn test_decode_unknown_and_ack() {
        // ---
        let ack = Inbound::decode(&json!({ "kind": "graph_ack", "op": "delete", "floor": "4F" })).unwrap();
        assert_eq!(ack.floor(), Some(FloorKey::F4));
        assert_eq!(ack.kind(), MessageKind::GraphAck);

        let other = Inbound::decode(&json!({ "kind": "fire_detected", "conf": 0.5 })).unwrap();
        assert_eq!(other, Inbound::Unknown { kind: "fire_detected".into() });
        assert_eq!(other.floor(), None);
    }

    #[test]
    fn test_outbound_wire_shape() {
        // ---
        let delete = Outbound::DeleteNode {
            floor: FloorKey::F4,
            node: "(2,1)".into(),
        };
        assert_eq!(
            serde_json::to_value(&delete).unwrap(),
            json!({ "kind": "delete_node", "floor": "4F", "node": "(2,1)" })
        );

        let readings = Outbound::BleReadings {
            floor: FloorKey::B2,
            list: vec![UplinkReading {
                id: 7,
                filtered: None,
                rssi: Some(-70.0),
            }],
        };
        assert_eq!(
            serde_json::to_value(&readings).unwrap(),
            json!({ "kind": "ble_readings", "floor": "B2", "list": [{ "id": 7, "filtered": null, "rssi": -70.0 }] })
        );
    }
}
