//! Message bus gateway.
//!
//! One [`Bus`] per logical channel: the process-wide shared channel carries
//! map, hazard and alert traffic; each scanning session owns its own uplink
//! bus. The two never share queue or subscriber state.

mod channel;
mod connection;

pub use channel::{ConnectionState, Envelope, Listener, QueuePolicy, SendOutcome, SubscriptionId};
pub use connection::{Bus, BusConfig, Subscription};
