//! Synchronous core of a logical duplex channel.
//!
//! Holds the connection state, the outbound FIFO and the subscriber list.
//! It never touches the network: the async driver in `connection.rs` tells
//! it when the socket opens or closes and hands it a writer to drain into.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::models::Inbound;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    // ---
    Disconnected,
    Connecting,
    Open,
}

/// What `send` does with a message while the socket is not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    // ---
    /// Keep it in an unbounded FIFO, flushed in order on open.
    Buffer,
    /// Discard it; for periodic snapshots that supersede each other.
    DropWhileClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    // ---
    Sent,
    Queued,
    Dropped,
}

/// An inbound payload as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    // ---
    Message(Inbound),
    /// Payload that was not JSON or did not decode; passed through as is.
    Raw(String),
}

impl Envelope {
    /// Parse and decode one text frame. Never fails.
    pub fn from_text(text: &str) -> Envelope {
        // ---
        match serde_json::from_str::<Value>(text) {
            Ok(value) => match Inbound::decode(&value) {
                Ok(message) => Envelope::Message(message),
                Err(e) => {
                    debug!(error = %e, "undecodable payload passed through raw");
                    Envelope::Raw(text.to_string())
                }
            },
            Err(e) => {
                debug!(error = %e, "non-JSON payload passed through raw");
                Envelope::Raw(text.to_string())
            }
        }
    }

    pub fn message(&self) -> Option<&Inbound> {
        match self {
            Envelope::Message(m) => Some(m),
            Envelope::Raw(_) => None,
        }
    }
}

pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ---

pub struct Channel {
    // ---
    state: ConnectionState,
    policy: QueuePolicy,
    queue: VecDeque<String>,
    writer: Option<UnboundedSender<String>>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl Channel {
    // ---
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            queue: VecDeque::new(),
            writer: None,
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of messages waiting for the socket to open.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Copy of the waiting messages, oldest first.
    pub fn pending_messages(&self) -> Vec<String> {
        self.queue.iter().cloned().collect()
    }

    /// Hand a serialized message to the writer, or queue it per policy.
    pub fn send(&mut self, text: String) -> SendOutcome {
        // ---
        let text = match (self.state, self.writer.as_ref()) {
            (ConnectionState::Open, Some(writer)) => match writer.send(text) {
                Ok(()) => return SendOutcome::Sent,
                // writer task is gone; the driver will report the close
                Err(err) => err.0,
            },
            _ => text,
        };

        match self.policy {
            QueuePolicy::Buffer => {
                self.queue.push_back(text);
                SendOutcome::Queued
            }
            QueuePolicy::DropWhileClosed => SendOutcome::Dropped,
        }
    }

    pub fn mark_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
        self.writer = None;
    }

    /// Transition to open and drain the queue into `writer`, in order.
    ///
    /// Returns how many queued messages were flushed.
    pub fn mark_open(&mut self, writer: UnboundedSender<String>) -> usize {
        // ---
        let mut flushed = 0;
        while let Some(text) = self.queue.pop_front() {
            if let Err(err) = writer.send(text) {
                self.queue.push_front(err.0);
                break;
            }
            flushed += 1;
        }
        self.state = ConnectionState::Open;
        self.writer = Some(writer);
        flushed
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.writer = None;
    }

    pub fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
        // ---
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        // ---
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stable snapshot of the subscribers in registration order.
    ///
    /// Delivery iterates the snapshot with the channel unlocked, so a
    /// subscriber may unsubscribe or publish from inside its callback
    /// without affecting the pass in progress.
    pub fn snapshot(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}
