//! Client core for indoor navigation and fire safety.
//!
//! Follows the Explicit Module Boundary Pattern (EMBP): each concern sits
//! behind a gateway module and the rest of the crate only talks to it
//! through what that gateway re-exports.
//!
//! - `bus` – persistent WebSocket channels with reconnect, queueing and fan-out
//! - `ble` – beacon parsing, RSSI filtering, floor inference, scan sessions
//! - `store` – floor-scoped position/path/hazard/alert state and screens
//! - `map` – planar coordinate to viewport transform and node graph editing
//! - `config` – environment driven settings

pub mod ble;
pub mod bus;
pub mod config;
pub mod map;
pub mod models;
pub mod store;

pub use config::Config;
