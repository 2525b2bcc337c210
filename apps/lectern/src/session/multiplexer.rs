use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ReconnectConfig;
use crate::protocol::{EventMessage, event_type};
use crate::session::ConnectionState;
use crate::transport::{LinkEvent, Transport, TransportLink};

pub type SubscriptionId = String;

/// Subscriber callback. An `Err` is the non-fatal failure path: logged,
/// isolated, never aborts delivery to the remaining subscribers.
pub type EventCallback = Arc<dyn Fn(&EventMessage) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    callback: EventCallback,
}

#[derive(Default)]
struct Registry {
    by_type: HashMap<String, Vec<Subscriber>>,
    total: usize,
}

/// Owns the single shared transport connection and fans messages out to
/// subscribers by event type. Explicitly constructed and passed by reference;
/// the connection is opened lazily on the first subscription and closed when
/// the last subscriber leaves.
pub struct ConnectionMultiplexer {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ReconnectConfig,
    registry: RwLock<Registry>,
    state: RwLock<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    run_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    // Bumped on every connect/disconnect so a superseded run loop can tell
    // it must not touch shared state anymore.
    generation: AtomicU64,
}

impl ConnectionMultiplexer {
    pub fn new(transport: Arc<dyn Transport>, config: ReconnectConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                registry: RwLock::new(Registry::default()),
                state: RwLock::new(ConnectionState::Disconnected),
                outbound: Mutex::new(None),
                run_task: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register a callback for one event type. The id comes back immediately;
    /// the first subscription overall triggers `connect()` without blocking
    /// on it.
    pub fn subscribe(&self, event_type: &str, callback: EventCallback) -> SubscriptionId {
        let id = Uuid::new_v4().to_string();
        let was_empty = {
            let mut registry = self.inner.registry.write();
            let was_empty = registry.total == 0;
            registry
                .by_type
                .entry(event_type.to_string())
                .or_default()
                .push(Subscriber {
                    id: id.clone(),
                    callback,
                });
            registry.total += 1;
            was_empty
        };
        tracing::debug!(subscription = %id, event = %event_type, "subscriber registered");
        if was_empty {
            self.connect();
        }
        id
    }

    /// Remove exactly the matching subscription. Closing the connection when
    /// the count reaches zero keeps sockets from lingering with no UI behind
    /// them.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let (removed, now_empty) = {
            let mut registry = self.inner.registry.write();
            let mut removed = false;
            registry.by_type.retain(|_, subscribers| {
                if !removed {
                    if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
                        subscribers.remove(pos);
                        removed = true;
                    }
                }
                !subscribers.is_empty()
            });
            if removed {
                registry.total -= 1;
            }
            (removed, registry.total == 0)
        };
        if removed && now_empty {
            self.disconnect();
        }
        removed
    }

    /// Fire-and-forget send. Returns false when not connected; callers treat
    /// that as "not delivered", not as an error.
    pub fn send_message(&self, kind: &str, data: Value) -> bool {
        if self.connection_state() != ConnectionState::Connected {
            return false;
        }
        self.send_envelope(&EventMessage::new(kind, data))
    }

    /// Send a pre-built envelope, same delivery contract as `send_message`.
    pub fn send_envelope(&self, message: &EventMessage) -> bool {
        if self.connection_state() != ConnectionState::Connected {
            return false;
        }
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize outbound message");
                return false;
            }
        };
        let outbound = self.inner.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.read().total
    }

    /// Open the connection unless a connect cycle is already underway. Also
    /// the explicit recovery path out of the terminal `Error` state.
    pub fn connect(&self) {
        {
            let mut state = self.inner.state.write();
            if matches!(
                *state,
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Reconnecting
            ) {
                return;
            }
            *state = ConnectionState::Connecting;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            run_connection(inner, generation).await;
        });
        if let Some(previous) = self.inner.run_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Normal closure: straight to `Disconnected`, no reconnection.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.inner.run_task.lock().take() {
            task.abort();
        }
        self.inner.outbound.lock().take();
        let was = {
            let mut state = self.inner.state.write();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if was != ConnectionState::Disconnected {
            self.inner.broadcast(
                event_type::CONNECTION_DISCONNECTED,
                json!({ "reason": "client_disconnect" }),
            );
        }
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.write() = next;
    }

    /// Synthetic connection events go through the same dispatch path as data
    /// messages so subscribers observe connectivity uniformly.
    fn broadcast(&self, kind: &str, data: Value) {
        self.dispatch(&EventMessage::new(kind, data));
    }

    fn dispatch_raw(&self, text: &str) {
        match serde_json::from_str::<EventMessage>(text) {
            Ok(message) => self.dispatch(&message),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed message");
            }
        }
    }

    fn dispatch(&self, message: &EventMessage) {
        // Clone handles out so callbacks run without holding the registry
        // lock; subscribing from inside a callback stays legal.
        let callbacks: Vec<(SubscriptionId, EventCallback)> = {
            let registry = self.registry.read();
            registry
                .by_type
                .get(&message.kind)
                .map(|subscribers| {
                    subscribers
                        .iter()
                        .map(|s| (s.id.clone(), s.callback.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        subscription = %id,
                        event = %message.kind,
                        error = %err,
                        "subscriber callback failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        subscription = %id,
                        event = %message.kind,
                        "subscriber callback panicked"
                    );
                }
            }
        }
    }

    fn attach(&self, link: &TransportLink) {
        *self.outbound.lock() = Some(link.sender());
        self.set_state(ConnectionState::Connected);
        self.broadcast(event_type::CONNECTION_CONNECTED, json!({}));
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubling from the base,
/// capped.
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    config
        .base_delay
        .saturating_mul(1u32 << exp)
        .min(config.max_delay)
}

async fn run_connection(inner: Arc<Inner>, generation: u64) {
    let mut link = match inner.transport.dial().await {
        Ok(link) => link,
        Err(err) => {
            if !inner.is_current(generation) {
                return;
            }
            tracing::warn!(error = %err, "initial connect failed");
            inner.set_state(ConnectionState::Error);
            inner.broadcast(
                event_type::CONNECTION_ERROR,
                json!({ "error": err.to_string() }),
            );
            return;
        }
    };

    loop {
        if !inner.is_current(generation) {
            return;
        }
        inner.attach(&link);

        let normal_close = loop {
            match link.next_event().await {
                Some(LinkEvent::Message(text)) => inner.dispatch_raw(&text),
                Some(LinkEvent::Closed { normal }) => break normal,
                None => break false,
            }
        };
        drop(link);
        inner.outbound.lock().take();

        if !inner.is_current(generation) {
            return;
        }
        if normal_close {
            inner.set_state(ConnectionState::Disconnected);
            inner.broadcast(
                event_type::CONNECTION_DISCONNECTED,
                json!({ "reason": "server_close" }),
            );
            return;
        }

        link = match reconnect(&inner, generation).await {
            Some(link) => link,
            None => return,
        };
    }
}

/// Capped exponential backoff; exhaustion is terminal and requires an
/// explicit `connect()` to recover.
async fn reconnect(inner: &Arc<Inner>, generation: u64) -> Option<TransportLink> {
    let mut attempt = 1u32;
    loop {
        if attempt > inner.config.max_attempts {
            inner.set_state(ConnectionState::Error);
            inner.broadcast(
                event_type::CONNECTION_RECONNECTION_FAILED,
                json!({ "attempts": inner.config.max_attempts }),
            );
            return None;
        }
        inner.set_state(ConnectionState::Reconnecting);
        crate::telemetry::record_gauge("session.reconnect_attempt", attempt as u64);
        inner.broadcast(
            event_type::CONNECTION_RECONNECTING,
            json!({ "attempt": attempt }),
        );
        tokio::time::sleep(backoff_delay(&inner.config, attempt)).await;
        if !inner.is_current(generation) {
            return None;
        }
        match inner.transport.dial().await {
            Ok(link) => return Some(link),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "reconnect attempt failed");
                attempt += 1;
            }
        }
    }
}
