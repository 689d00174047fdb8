use crate::transport::frame::Frame;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Transport connection lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A message delivered to a topic handler
#[derive(Clone, Debug)]
pub struct TopicMessage {
    pub destination: String,
    pub body: String,
}

/// Callback invoked for every message on a subscribed topic.
///
/// Handlers run on the transport driver task and must not block.
pub type MessageHandler = Arc<dyn Fn(&TopicMessage) + Send + Sync>;

/// A subscribe request, queued or realized
struct Registration {
    key: u64,
    topic: String,
    handler: MessageHandler,
}

struct Registry {
    state: ConnectionState,
    /// Subscribe requests waiting for the next CONNECTED, in FIFO order
    pending: VecDeque<Registration>,
    /// Realized subscriptions by STOMP subscription id
    active: HashMap<String, Registration>,
    /// Registration key -> STOMP subscription id
    realized: HashMap<u64, String>,
    next_key: u64,
    next_sub_id: u64,
}

/// Multiplexes logical topics over the single broker connection.
///
/// Callers may subscribe at any time. Requests issued before the transport
/// is connected are queued and realized, in order, as soon as the broker
/// acknowledges the connection. The driver task (see
/// [`run_transport`](crate::transport::run_transport)) feeds connection
/// events and inbound frames into this manager and writes the frames it
/// emits to the socket.
pub struct ConnectionManager {
    registry: Mutex<Registry>,
    outbound: mpsc::UnboundedSender<Frame>,
    status_tx: watch::Sender<ConnectionState>,
    resubscribe_on_reconnect: bool,
}

impl ConnectionManager {
    /// Create a manager and the receiving end of its outbound frame queue.
    ///
    /// The receiver belongs to whichever task owns the socket.
    pub fn new(resubscribe_on_reconnect: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionState::Disconnected);

        let manager = Arc::new(Self {
            registry: Mutex::new(Registry {
                state: ConnectionState::Disconnected,
                pending: VecDeque::new(),
                active: HashMap::new(),
                realized: HashMap::new(),
                next_key: 0,
                next_sub_id: 0,
            }),
            outbound,
            status_tx,
            resubscribe_on_reconnect,
        });

        (manager, outbound_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Handlers are invoked outside the lock
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.status_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.status_tx.subscribe()
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// Realized immediately when connected, queued otherwise. Dropping the
    /// returned handle unsubscribes.
    pub fn subscribe<F>(self: &Arc<Self>, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&TopicMessage) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let key = registry.next_key;
        registry.next_key += 1;

        let registration = Registration {
            key,
            topic: topic.to_string(),
            handler: Arc::new(handler),
        };

        if registry.state == ConnectionState::Connected {
            self.realize(&mut registry, registration);
        } else {
            debug!(topic = %topic, key, "Transport not connected, queueing subscription");
            registry.pending.push_back(registration);
        }

        Subscription {
            key,
            topic: topic.to_string(),
            manager: Arc::downgrade(self),
        }
    }

    fn realize(&self, registry: &mut Registry, registration: Registration) {
        let sub_id = format!("sub-{}", registry.next_sub_id);
        registry.next_sub_id += 1;

        info!(topic = %registration.topic, subscription = %sub_id, "Subscribing to topic");
        self.send(Frame::subscribe(&sub_id, &registration.topic));

        registry.realized.insert(registration.key, sub_id.clone());
        registry.active.insert(sub_id, registration);
    }

    fn send(&self, frame: Frame) {
        if self.outbound.send(frame).is_err() {
            debug!("Transport driver gone, dropping outbound frame");
        }
    }

    fn remove(&self, key: u64) {
        let mut registry = self.lock();

        if let Some(pos) = registry.pending.iter().position(|r| r.key == key) {
            registry.pending.remove(pos);
            debug!(key, "Removed queued subscription");
            return;
        }

        if let Some(sub_id) = registry.realized.remove(&key) {
            registry.active.remove(&sub_id);
            if registry.state == ConnectionState::Connected {
                self.send(Frame::unsubscribe(&sub_id));
            }
            info!(subscription = %sub_id, "Unsubscribed from topic");
        }
    }

    fn set_state(&self, registry: &mut Registry, state: ConnectionState) {
        registry.state = state;
        self.status_tx.send_replace(state);
    }

    /// Driver is attempting to connect
    pub fn on_connecting(&self) {
        let mut registry = self.lock();
        self.set_state(&mut registry, ConnectionState::Connecting);
    }

    /// Broker acknowledged the connection: flush the subscribe queue in order
    pub fn on_connected(&self) {
        let mut registry = self.lock();
        self.set_state(&mut registry, ConnectionState::Connected);

        let queued: Vec<Registration> = registry.pending.drain(..).collect();
        if !queued.is_empty() {
            info!(count = queued.len(), "Realizing queued subscriptions");
        }
        for registration in queued {
            self.realize(&mut registry, registration);
        }
    }

    /// Transport closed or failed.
    ///
    /// Realized subscriptions are lost with the connection. They are only
    /// re-queued when `resubscribe_on_reconnect` is set.
    pub fn on_disconnected(&self) {
        let mut registry = self.lock();
        if registry.state == ConnectionState::Disconnected {
            return;
        }
        self.set_state(&mut registry, ConnectionState::Disconnected);

        let mut lost: Vec<Registration> = registry.active.drain().map(|(_, r)| r).collect();
        registry.realized.clear();

        if lost.is_empty() {
            return;
        }

        if self.resubscribe_on_reconnect {
            lost.sort_by_key(|r| r.key);
            info!(count = lost.len(), "Re-queueing subscriptions for reconnect");
            for registration in lost.into_iter().rev() {
                registry.pending.push_front(registration);
            }
        } else {
            warn!(count = lost.len(), "Connection lost, dropping realized subscriptions");
        }
    }

    /// Route an inbound MESSAGE frame to its subscription handler.
    ///
    /// Returns false when no live subscription matches.
    pub fn dispatch(&self, frame: &Frame) -> bool {
        let handler = {
            let registry = self.lock();
            frame
                .get_header("subscription")
                .and_then(|id| registry.active.get(id))
                .map(|r| Arc::clone(&r.handler))
        };

        match handler {
            Some(handler) => {
                let message = TopicMessage {
                    destination: frame.get_header("destination").unwrap_or_default().to_string(),
                    body: frame.body.clone(),
                };
                handler(&message);
                true
            }
            None => {
                trace!(
                    subscription = ?frame.get_header("subscription"),
                    "Message for unknown subscription ignored"
                );
                false
            }
        }
    }

    /// Number of queued (not yet realized) subscriptions
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of realized subscriptions
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}

/// Handle to a topic subscription, owned by the view that created it
pub struct Subscription {
    key: u64,
    topic: String,
    manager: Weak<ConnectionManager>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Release the subscription.
    ///
    /// Safe to call repeatedly, and a no-op when the subscription was never
    /// realized or was lost with a dropped connection.
    pub fn unsubscribe(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.remove(self.key);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("topic", &self.topic)
            .finish()
    }
}
