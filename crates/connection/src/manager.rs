//! Connection manager: runs the state machine against a real transport.
//!
//! Every input (caller commands, socket events, timer fires) goes through
//! one mutex into [`Machine::handle`]; the resulting effects are executed
//! before the lock is released, except subscriber callbacks, which run
//! afterwards so they may call back into the manager. Socket events and
//! timer fires are consumed by one driver task per manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tether_protocol::{ControlKind, Envelope, InboundEvent};

use crate::config::{ConfigError, ConnectionConfig};
use crate::dispatcher::{Dispatcher, KindFilter, Subscription};
use crate::machine::{Effect, Input, Machine, TimerId};
use crate::reconnection::ReconnectTimer;
use crate::transport::{Link, Transport, TransportEvent, TransportEvents};
use crate::types::{ConnectionState, Credential, StateChange, TransportHandle};
use crate::ws::WsTransport;

/// Mutable state guarded by the manager's single lock.
struct Core {
    machine: Machine,
    links: HashMap<TransportHandle, Box<dyn Link>>,
    timer: Option<ReconnectTimer>,
}

struct Shared {
    core: Mutex<Core>,
    transport: Arc<dyn Transport>,
    runtime: tokio::runtime::Handle,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<ConnectionState>,
    changes_tx: mpsc::UnboundedSender<StateChange>,
    changes_rx: Mutex<Option<mpsc::UnboundedReceiver<StateChange>>>,
    events_tx: TransportEvents,
    timers_tx: mpsc::UnboundedSender<TimerId>,
    shut_down: AtomicBool,
    driver: CancellationToken,
}

/// Owns one logical session.
///
/// Cloning yields another handle to the same session. The session ends when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
/// A subscriber that captures a clone keeps the session alive until
/// `shutdown` clears the subscribers.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a manager over `transport` and starts its driver task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;

        let runtime = tokio::runtime::Handle::current();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let driver = CancellationToken::new();
        let dispatcher = Dispatcher::with_max_frame_size(config.transport.max_message_size);

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                machine: Machine::new(&config),
                links: HashMap::new(),
                timer: None,
            }),
            transport,
            runtime: runtime.clone(),
            dispatcher,
            state_tx,
            changes_tx,
            changes_rx: Mutex::new(Some(changes_rx)),
            events_tx,
            timers_tx,
            shut_down: AtomicBool::new(false),
            driver: driver.clone(),
        });

        runtime.spawn(drive(Arc::downgrade(&shared), events_rx, timers_rx, driver));
        Ok(Self { shared })
    }

    /// Creates a manager that talks WebSocket, tuned by `config.transport`.
    pub fn websocket(config: ConnectionConfig) -> Result<Self, ConfigError> {
        let transport = WsTransport::new(config.transport.clone());
        Self::new(config, Arc::new(transport))
    }

    /// Starts (or restarts) the session.
    ///
    /// A call with the same endpoint and credential while the session is
    /// already active does nothing. Any other call cancels a pending retry and
    /// closes the current socket; the new socket is opened once the old one
    /// has reported `Closed`.
    pub fn connect(&self, endpoint: impl Into<String>, credential: impl Into<Credential>) {
        let endpoint = endpoint.into();
        info!(endpoint = %endpoint, "connect requested");
        self.shared.apply(Input::Connect {
            endpoint,
            credential: credential.into(),
        });
    }

    /// Closes the socket, cancels any retry and forgets the credential.
    pub fn disconnect(&self) {
        info!("disconnect requested");
        self.shared.apply(Input::Disconnect);
    }

    /// Sends one application frame.
    ///
    /// Returns `false` without queuing when the session is not connected, the
    /// socket cannot take more data, or `kind` is reserved for the handshake.
    pub fn send(&self, kind: &str, payload: serde_json::Value) -> bool {
        if ControlKind::from_kind(kind).is_some() {
            warn!(kind, "refusing to send a handshake control kind");
            return false;
        }
        let frame = match Envelope::from_value(kind, payload).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind, error = %e, "failed to encode outbound frame");
                return false;
            }
        };

        let core = self.shared.lock();
        if !core.machine.can_send() {
            debug!(kind, state = %core.machine.state(), "not connected, send dropped");
            return false;
        }
        let sent = core
            .machine
            .live_handle()
            .and_then(|handle| core.links.get(&handle))
            .is_some_and(|link| link.send(frame));
        if !sent {
            debug!(kind, "transport refused frame");
        }
        sent
    }

    /// Serializes `payload` and sends it like [`send`](Self::send).
    pub fn send_json<T: Serialize>(&self, kind: &str, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(value) => self.send(kind, value),
            Err(e) => {
                warn!(kind, error = %e, "failed to serialize outbound payload");
                false
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Takes the stream of every state transition. Can only be called once.
    pub fn take_state_changes(&self) -> Option<mpsc::UnboundedReceiver<StateChange>> {
        self.shared
            .changes_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Shorthand for `dispatcher().subscribe(..)`.
    pub fn subscribe<F>(&self, filter: impl Into<KindFilter>, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(filter, callback)
    }

    /// Disconnects, drops every subscriber and stops the driver task.
    ///
    /// The manager ignores every later call.
    pub fn shutdown(&self) {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return;
        }
        self.shared.apply(Input::Disconnect);
        self.shared.shut_down.store(true, Ordering::Release);
        self.shared.dispatcher.clear();
        self.shared.driver.cancel();
        info!("connection manager shut down");
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one input through the machine and executes its effects.
    fn apply(&self, input: Input) {
        if self.shut_down.load(Ordering::Acquire) {
            trace!(?input, "manager shut down, input ignored");
            return;
        }

        let mut deliveries = Vec::new();
        {
            let mut core = self.lock();
            if let Input::Closed { handle } = &input {
                core.links.remove(handle);
            }
            let effects = core.machine.handle(input);
            for effect in effects {
                match effect {
                    Effect::Open { handle, endpoint } => {
                        debug!(%handle, endpoint = %endpoint, "opening transport");
                        let link = self.transport.open(handle, &endpoint, self.events_tx.clone());
                        core.links.insert(handle, link);
                    }
                    Effect::Close { handle } => {
                        // The link stays registered until its Closed event arrives.
                        if let Some(link) = core.links.get(&handle) {
                            link.close();
                        }
                    }
                    Effect::Send { handle, frame } => {
                        let sent = core.links.get(&handle).is_some_and(|link| link.send(frame));
                        if !sent {
                            warn!(%handle, "transport refused handshake frame");
                        }
                    }
                    Effect::StartTimer {
                        timer,
                        delay,
                        purpose,
                    } => {
                        trace!(timer = timer.0, ?purpose, delay_ms = delay.as_millis() as u64, "arming timer");
                        let timers_tx = self.timers_tx.clone();
                        core.timer = Some(ReconnectTimer::schedule(&self.runtime, timer, delay, move || {
                            let _ = timers_tx.send(timer);
                        }));
                    }
                    Effect::CancelTimer { timer } => {
                        if core.timer.as_ref().is_some_and(|t| t.id() == timer) {
                            core.timer = None;
                        }
                    }
                    Effect::Dispatch(event) => deliveries.push(event),
                    Effect::StateChanged(change) => {
                        self.state_tx.send_replace(change.to.clone());
                        let _ = self.changes_tx.send(change);
                    }
                }
            }
        }

        for event in &deliveries {
            self.dispatcher.publish(event);
        }
    }

    fn on_transport_event(&self, handle: TransportHandle, event: TransportEvent) {
        let input = match event {
            TransportEvent::Opened => Input::Opened { handle },
            TransportEvent::Message(text) => {
                let Some(event) = self.dispatcher.decode(&text) else {
                    return;
                };
                Input::Frame { handle, event }
            }
            TransportEvent::Error(error) => Input::TransportError { handle, error },
            TransportEvent::Closed => Input::Closed { handle },
        };
        self.apply(input);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.driver.cancel();
    }
}

/// Feeds socket events and timer fires into the manager, one at a time.
async fn drive(
    shared: Weak<Shared>,
    mut events_rx: mpsc::UnboundedReceiver<(TransportHandle, TransportEvent)>,
    mut timers_rx: mpsc::UnboundedReceiver<TimerId>,
    stop: CancellationToken,
) {
    enum Next {
        Transport(TransportHandle, TransportEvent),
        Timer(TimerId),
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            Some((handle, event)) = events_rx.recv() => Next::Transport(handle, event),
            Some(timer) = timers_rx.recv() => Next::Timer(timer),
            else => break,
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match next {
            Next::Transport(handle, event) => shared.on_transport_event(handle, event),
            Next::Timer(timer) => shared.apply(Input::TimerFired { timer }),
        }
    }
    trace!("connection driver stopped");
}
