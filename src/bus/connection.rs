//! Persistent WebSocket connection with reconnect, queueing and fan-out.
//!
//! A [`Bus`] is a cheap, cloneable handle onto one logical channel. The first
//! `ensure_connected` (or publish) spawns a driver task that connects, drains
//! the queue on open, fans every inbound frame out to subscribers, and on any
//! close or error waits a fixed delay and connects again, forever, until the
//! bus is explicitly closed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::channel::{Channel, ConnectionState, Envelope, QueuePolicy, SendOutcome, SubscriptionId};
use crate::models::{FloorKey, Outbound};

// ---

/// Settings for one logical channel.
#[derive(Debug, Clone)]
pub struct BusConfig {
    // ---
    /// Name used in log lines, e.g. `shared` or `ble-uplink`.
    pub label: String,
    pub url: String,
    pub reconnect_delay: Duration,
    pub policy: QueuePolicy,
}

struct Shared {
    // ---
    config: BusConfig,
    channel: Mutex<Channel>,
    driver: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Shared {
    fn channel(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn driver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle onto one logical channel. Clones share queue and subscribers.
#[derive(Clone)]
pub struct Bus {
    shared: Arc<Shared>,
}

impl Bus {
    // ---
    /// Create a bus without connecting.
    pub fn new(config: BusConfig) -> Bus {
        // ---
        let channel = Mutex::new(Channel::new(config.policy));
        Bus {
            shared: Arc::new(Shared {
                config,
                channel,
                driver: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.config.label
    }

    /// Make sure the driver task is running and return a handle.
    ///
    /// Idempotent: a live driver is left alone. Outside a tokio runtime, or
    /// after [`Bus::close`], nothing is spawned and messages stay queued.
    pub fn ensure_connected(&self) -> Bus {
        // ---
        if self.shared.shut_down.load(Ordering::SeqCst) {
            debug!(bus = %self.label(), "ensure_connected on a closed bus ignored");
            return self.clone();
        }

        let mut driver = self.shared.driver();
        if driver.as_ref().is_some_and(|h| !h.is_finished()) {
            return self.clone();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let weak = Arc::downgrade(&self.shared);
                *driver = Some(rt.spawn(drive(weak, self.shared.config.clone())));
            }
            Err(_) => debug!(bus = %self.label(), "no runtime, connection deferred"),
        }
        self.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.channel().state()
    }

    pub fn pending(&self) -> usize {
        self.shared.channel().pending()
    }

    pub fn pending_messages(&self) -> Vec<String> {
        self.shared.channel().pending_messages()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.channel().subscriber_count()
    }

    /// Serialize and send a typed message.
    pub fn publish(&self, message: &Outbound) -> SendOutcome {
        // ---
        match serde_json::to_string(message) {
            Ok(text) => self.publish_text(text),
            Err(e) => {
                error!(bus = %self.label(), error = %e, "failed to serialize outbound message");
                SendOutcome::Dropped
            }
        }
    }

    /// Send pre-serialized text, queueing it while the socket is not open.
    pub fn publish_text(&self, text: impl Into<String>) -> SendOutcome {
        // ---
        self.ensure_connected();
        let outcome = self.shared.channel().send(text.into());
        if outcome == SendOutcome::Dropped {
            debug!(bus = %self.label(), "message dropped while disconnected");
        }
        outcome
    }

    /// Register a callback for every inbound payload on this channel.
    ///
    /// The returned [`Subscription`] unregisters on drop; the connection
    /// itself is left running for other subscribers.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        // ---
        let id = self.shared.channel().subscribe(Arc::new(listener));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    pub fn delete_node(&self, floor: FloorKey, node: &str) -> SendOutcome {
        self.publish(&Outbound::DeleteNode {
            floor,
            node: node.to_string(),
        })
    }

    pub fn restore_node(&self, floor: FloorKey, node: &str) -> SendOutcome {
        self.publish(&Outbound::RestoreNode {
            floor,
            node: node.to_string(),
        })
    }

    pub fn restore_graph(&self, floor: FloorKey) -> SendOutcome {
        self.publish(&Outbound::RestoreGraph { floor })
    }

    pub fn register_push_token(&self, token: &str) -> SendOutcome {
        self.publish(&Outbound::RegisterPushToken {
            token: token.to_string(),
        })
    }

    /// Fan one inbound text frame out to every current subscriber.
    ///
    /// Subscribers run in registration order against a snapshot taken before
    /// the first call. A panicking subscriber is logged and skipped.
    pub fn dispatch(&self, text: &str) {
        // ---
        let envelope = Envelope::from_text(text);
        let listeners = self.shared.channel().snapshot();

        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&envelope))).is_err() {
                error!(bus = %self.label(), "subscriber panicked during delivery");
            }
        }
    }

    /// Stop the driver and drop the socket. The bus stays closed.
    pub fn close(&self) {
        // ---
        self.shared.shut_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.shared.driver().take() {
            handle.abort();
        }
        self.shared.channel().mark_closed();
        info!(bus = %self.label(), "connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }
}

/// Registration token returned by [`Bus::subscribe`].
pub struct Subscription {
    // ---
    shared: Weak<Shared>,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.channel().unsubscribe(self.id);
        }
    }
}

// ---

/// Connect, serve, wait, repeat. Exits when every `Bus` handle is gone.
async fn drive(shared: Weak<Shared>, config: BusConfig) {
    // ---
    loop {
        match shared.upgrade() {
            Some(s) => s.channel().mark_connecting(),
            None => return,
        }
        debug!(bus = %config.label, url = %config.url, "connecting");

        match connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => {
                info!(bus = %config.label, url = %config.url, "connection opened");
                serve(&shared, &config, stream).await;
            }
            Err(e) => warn!(bus = %config.label, error = %e, "connect failed"),
        }

        match shared.upgrade() {
            Some(s) => s.channel().mark_closed(),
            None => return,
        }
        info!(
            bus = %config.label,
            "connection closed, retrying in {}ms",
            config.reconnect_delay.as_millis()
        );
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

/// Pump one open socket until it closes or errors.
async fn serve(shared: &Weak<Shared>, config: &BusConfig, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    // ---
    let (mut write, mut read) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    match shared.upgrade() {
        Some(s) => {
            let flushed = s.channel().mark_open(tx);
            if flushed > 0 {
                debug!(bus = %config.label, flushed, "drained pending messages");
            }
        }
        None => return,
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(text) = outgoing else {
                    // writer dropped with the last handle
                    debug!(bus = %config.label, "all handles dropped, closing socket");
                    let _ = write.close().await;
                    return;
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(bus = %config.label, error = %e, "send failed");
                    break;
                }
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(bus = %config.label, error = %e, "receive failed");
                        break;
                    }
                };
                match shared.upgrade() {
                    Some(s) => Bus { shared: s }.dispatch(&text),
                    None => return,
                }
            }
        }
    }
}
