//! Inbound event fan-out.
//!
//! Frames are decoded once and delivered to every matching subscriber in
//! registration order. Nothing is buffered: an event published while nobody
//! listens for its kind is gone.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use tether_protocol::constants::WS_MAX_MESSAGE_SIZE;
use tether_protocol::{Envelope, InboundEvent};

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    All,
    Kind(String),
}

impl KindFilter {
    pub fn matches(&self, kind: &str) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Kind(k) => k == kind,
        }
    }
}

/// `"*"` subscribes to everything; any other string is an exact kind.
impl From<&str> for KindFilter {
    fn from(kind: &str) -> Self {
        if kind == "*" {
            KindFilter::All
        } else {
            KindFilter::Kind(kind.to_string())
        }
    }
}

impl From<String> for KindFilter {
    fn from(kind: String) -> Self {
        KindFilter::from(kind.as_str())
    }
}

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    filter: KindFilter,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Handle returned by [`Dispatcher::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the subscriber. Returns `false` if it was already gone.
    ///
    /// An event being published concurrently may still reach it once.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.entries.len();
        registry.entries.retain(|e| e.id != self.id);
        registry.entries.len() != before
    }
}

/// Routes decoded inbound frames to subscribers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
    malformed: Arc<AtomicU64>,
    max_frame_size: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_max_frame_size(WS_MAX_MESSAGE_SIZE)
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher that accepts frames up to `max_frame_size` bytes.
    ///
    /// Should match the transport's message size limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            registry: Arc::default(),
            malformed: Arc::default(),
            max_frame_size,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `callback` for events matching `filter`.
    pub fn subscribe<F>(&self, filter: impl Into<KindFilter>, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.entries.push(Entry {
            id,
            filter: filter.into(),
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Registers a callback that receives the payload decoded as `T`.
    ///
    /// Events whose payload does not fit `T` are logged and skipped for this
    /// subscriber only.
    pub fn subscribe_json<T, F>(&self, filter: impl Into<KindFilter>, callback: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(filter, move |event: &InboundEvent| {
            match event.parse_payload::<T>() {
                Ok(payload) => callback(payload),
                Err(e) => warn!(
                    kind = %event.kind,
                    error = %e,
                    "payload does not match subscriber type, skipping"
                ),
            }
        })
    }

    /// Registers a channel that receives a copy of every matching event.
    pub fn subscribe_channel(
        &self,
        filter: impl Into<KindFilter>,
    ) -> (Subscription, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(filter, move |event: &InboundEvent| {
            if tx.send(event.clone()).is_err() {
                trace!(kind = %event.kind, "subscriber channel closed");
            }
        });
        (sub, rx)
    }

    /// Parses one raw frame. Malformed frames are counted, logged and dropped.
    pub fn decode(&self, text: &str) -> Option<InboundEvent> {
        match Envelope::decode_with_limit(text, self.max_frame_size) {
            Ok(event) => Some(event),
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, len = text.len(), "dropping malformed frame");
                None
            }
        }
    }

    /// Delivers `event` to every matching subscriber, in registration order.
    ///
    /// Returns the number of subscribers that handled it without panicking.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        // Snapshot so callbacks can subscribe or unsubscribe re-entrantly.
        let targets: Vec<(SubscriptionId, Callback)> = self
            .registry()
            .entries
            .iter()
            .filter(|e| e.filter.matches(&event.kind))
            .map(|e| (e.id, e.callback.clone()))
            .collect();

        if targets.is_empty() {
            trace!(kind = %event.kind, "no subscribers, event dropped");
            return 0;
        }

        let mut delivered = 0;
        for (id, callback) in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => warn!(
                    subscription = id.0,
                    kind = %event.kind,
                    panic = panic_message(panic.as_ref()),
                    "subscriber panicked"
                ),
            }
        }
        delivered
    }

    /// Number of frames dropped by [`decode`](Self::decode).
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().entries.len()
    }

    /// Drops every subscriber.
    pub fn clear(&self) {
        self.registry().entries.clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
