//! Connection state machine.
//!
//! [`Machine::handle`] maps `(state, input)` to a new state plus a list of
//! [`Effect`]s. It performs no I/O: opening sockets, sending frames, arming
//! timers and invoking subscribers are all left to the caller, which makes
//! every transition testable without a socket or a runtime.
//!
//! Two properties hold by construction: at most one transport handle exists
//! at a time, and at most one timer is outstanding. Closing a socket is
//! asynchronous, so a superseded handle stays in `closing` until its
//! `Closed` report arrives; an open requested meanwhile is deferred until
//! then.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use tether_protocol::{ControlKind, InboundEvent};

use crate::config::ConnectionConfig;
use crate::handshake::{self, AuthOutcome, HandshakeMode};
use crate::reconnection::ReconnectConfig;
use crate::types::{ConnectionState, Credential, StateChange, TransportHandle};

/// Identifies one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// What a pending timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPurpose {
    /// Retry after an unsolicited close.
    Reconnect,
    /// Give up waiting for `auth_ok`.
    AuthDeadline,
}

/// Everything that can happen to a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Connect {
        endpoint: String,
        credential: Credential,
    },
    Disconnect,
    Opened {
        handle: TransportHandle,
    },
    TransportError {
        handle: TransportHandle,
        error: String,
    },
    Closed {
        handle: TransportHandle,
    },
    /// A well-formed inbound frame.
    Frame {
        handle: TransportHandle,
        event: InboundEvent,
    },
    TimerFired {
        timer: TimerId,
    },
}

/// Side effects requested by a transition, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Open {
        handle: TransportHandle,
        endpoint: String,
    },
    Close {
        handle: TransportHandle,
    },
    Send {
        handle: TransportHandle,
        frame: String,
    },
    StartTimer {
        timer: TimerId,
        delay: Duration,
        purpose: TimerPurpose,
    },
    CancelTimer {
        timer: TimerId,
    },
    Dispatch(InboundEvent),
    StateChanged(StateChange),
}

#[derive(Debug, Clone)]
struct Session {
    endpoint: String,
    credential: Credential,
}

/// Owned connection state for one logical session.
#[derive(Debug)]
pub struct Machine {
    reconnect: ReconnectConfig,
    handshake: HandshakeMode,
    auth_timeout: Duration,
    state: ConnectionState,
    session: Option<Session>,
    live: Option<TransportHandle>,
    /// Closed by us, not yet reported closed by the transport.
    closing: Option<TransportHandle>,
    /// An open is waiting for `closing` to finish.
    open_pending: bool,
    timer: Option<(TimerId, TimerPurpose)>,
    /// Consecutive unsolicited closes since the last successful handshake.
    attempt: u32,
    next_handle: u64,
    next_timer: u64,
}

impl Machine {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            handshake: config.handshake,
            auth_timeout: config.auth_timeout(),
            state: ConnectionState::Idle,
            session: None,
            live: None,
            closing: None,
            open_pending: false,
            timer: None,
            attempt: 0,
            next_handle: 0,
            next_timer: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The handle of the socket currently owned by the session.
    pub fn live_handle(&self) -> Option<TransportHandle> {
        self.live
    }

    /// The superseded socket whose close has not been confirmed yet.
    pub fn closing_handle(&self) -> Option<TransportHandle> {
        self.closing
    }

    pub fn pending_timer(&self) -> Option<(TimerId, TimerPurpose)> {
        self.timer
    }

    /// Application frames may only go out once the session is connected.
    pub fn can_send(&self) -> bool {
        self.state == ConnectionState::Connected && self.live.is_some()
    }

    /// Applies one input and returns the effects to execute.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            Input::Connect {
                endpoint,
                credential,
            } => self.on_connect(endpoint, credential, &mut fx),
            Input::Disconnect => self.on_disconnect(&mut fx),
            Input::Opened { handle } => {
                if self.is_live(handle) {
                    self.on_opened(handle, &mut fx);
                }
            }
            Input::TransportError { handle, error } => {
                // A close always follows; that is where recovery is decided.
                if self.is_live(handle) {
                    warn!(%handle, error = %error, "transport error");
                }
            }
            Input::Closed { handle } => {
                if self.closing == Some(handle) {
                    self.on_released(handle, &mut fx);
                } else if self.is_live(handle) {
                    self.on_closed(&mut fx);
                }
            }
            Input::Frame { handle, event } => {
                if self.is_live(handle) {
                    self.on_frame(handle, event, &mut fx);
                }
            }
            Input::TimerFired { timer } => self.on_timer(timer, &mut fx),
        }
        fx
    }

    fn is_live(&self, handle: TransportHandle) -> bool {
        let live = self.live == Some(handle);
        if !live {
            trace!(%handle, "ignoring event from superseded transport");
        }
        live
    }

    fn on_connect(&mut self, endpoint: String, credential: Credential, fx: &mut Vec<Effect>) {
        let same_session = self
            .session
            .as_ref()
            .is_some_and(|s| s.endpoint == endpoint && s.credential == credential);
        if same_session && self.state.is_active() {
            debug!(endpoint = %endpoint, state = %self.state, "already connecting to this endpoint");
            return;
        }

        self.cancel_timer(fx);
        self.close_live(fx);
        self.session = Some(Session {
            endpoint,
            credential,
        });
        self.attempt = 0;
        self.open(fx);
    }

    fn on_disconnect(&mut self, fx: &mut Vec<Effect>) {
        self.cancel_timer(fx);
        self.close_live(fx);
        self.open_pending = false;
        self.session = None;
        self.attempt = 0;
        self.transition(ConnectionState::Closed, fx);
    }

    fn on_opened(&mut self, handle: TransportHandle, fx: &mut Vec<Effect>) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };

        let frame = match handshake::auth_frame(&session.credential) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%handle, error = %e, "failed to encode auth frame");
                self.close_live(fx);
                self.on_closed(fx);
                return;
            }
        };
        fx.push(Effect::Send { handle, frame });

        match self.handshake {
            HandshakeMode::FireAndForget => {
                self.attempt = 0;
                info!(%handle, "connected");
                self.transition(ConnectionState::Connected, fx);
            }
            HandshakeMode::Acknowledged => {
                self.transition(ConnectionState::Authenticating, fx);
                self.start_timer(self.auth_timeout, TimerPurpose::AuthDeadline, fx);
            }
        }
    }

    /// Handles the loss of the live socket that nobody asked for.
    fn on_closed(&mut self, fx: &mut Vec<Effect>) {
        self.live = None;
        self.cancel_timer(fx);
        if self.session.is_none() {
            return;
        }

        self.attempt = self.attempt.saturating_add(1);
        if self.reconnect.is_exhausted(self.attempt) {
            warn!(attempts = self.attempt - 1, "reconnect attempts exhausted, giving up");
            self.session = None;
            self.attempt = 0;
            self.transition(ConnectionState::Closed, fx);
            return;
        }

        let delay = self.reconnect.delay_for_attempt(self.attempt);
        info!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "connection lost, scheduling reconnect"
        );
        self.transition(
            ConnectionState::Reconnecting {
                attempt: self.attempt,
            },
            fx,
        );
        self.start_timer(delay, TimerPurpose::Reconnect, fx);
    }

    /// The socket we closed earlier is gone; a deferred open may proceed.
    fn on_released(&mut self, handle: TransportHandle, fx: &mut Vec<Effect>) {
        self.closing = None;
        trace!(%handle, "superseded transport closed");
        if std::mem::take(&mut self.open_pending) && self.state == ConnectionState::Connecting {
            self.open(fx);
        }
    }

    fn on_frame(&mut self, handle: TransportHandle, event: InboundEvent, fx: &mut Vec<Effect>) {
        match handshake::classify(&event) {
            Some(AuthOutcome::Rejected { reason }) => {
                warn!(%handle, reason = %reason, "server rejected credential");
                self.cancel_timer(fx);
                self.close_live(fx);
                self.session = None;
                self.attempt = 0;
                self.transition(ConnectionState::Rejected { reason }, fx);
            }
            Some(AuthOutcome::Accepted { session_id }) => {
                if self.state == ConnectionState::Authenticating {
                    self.cancel_timer(fx);
                    self.attempt = 0;
                    info!(%handle, session_id = ?session_id, "authenticated");
                    self.transition(ConnectionState::Connected, fx);
                } else {
                    trace!(%handle, "ignoring auth_ok outside the handshake");
                }
            }
            None if ControlKind::from_kind(&event.kind).is_some() => {
                trace!(%handle, kind = %event.kind, "ignoring control frame");
            }
            None => match self.state {
                ConnectionState::Connected => fx.push(Effect::Dispatch(event)),
                _ => debug!(%handle, kind = %event.kind, state = %self.state, "dropping frame received before authentication"),
            },
        }
    }

    fn on_timer(&mut self, timer: TimerId, fx: &mut Vec<Effect>) {
        let Some((pending, purpose)) = self.timer else {
            trace!(timer = timer.0, "ignoring stale timer");
            return;
        };
        if pending != timer {
            trace!(timer = timer.0, "ignoring stale timer");
            return;
        }
        self.timer = None;

        match purpose {
            TimerPurpose::Reconnect => {
                if matches!(self.state, ConnectionState::Reconnecting { .. }) {
                    self.open(fx);
                }
            }
            TimerPurpose::AuthDeadline => {
                if self.state == ConnectionState::Authenticating
                    && let Some(handle) = self.live
                {
                    warn!(%handle, timeout_ms = self.auth_timeout.as_millis() as u64, "no auth acknowledgement, closing");
                    self.close_live(fx);
                    self.on_closed(fx);
                }
            }
        }
    }

    fn open(&mut self, fx: &mut Vec<Effect>) {
        let Some(endpoint) = self.session.as_ref().map(|s| s.endpoint.clone()) else {
            return;
        };
        if let Some(closing) = self.closing {
            debug!(%closing, "waiting for the previous transport to close");
            self.open_pending = true;
            self.transition(ConnectionState::Connecting, fx);
            return;
        }
        self.next_handle += 1;
        let handle = TransportHandle(self.next_handle);
        self.live = Some(handle);
        self.transition(ConnectionState::Connecting, fx);
        fx.push(Effect::Open { handle, endpoint });
    }

    fn close_live(&mut self, fx: &mut Vec<Effect>) {
        if let Some(handle) = self.live.take() {
            fx.push(Effect::Close { handle });
            self.closing = Some(handle);
        }
    }

    fn start_timer(&mut self, delay: Duration, purpose: TimerPurpose, fx: &mut Vec<Effect>) {
        self.cancel_timer(fx);
        self.next_timer += 1;
        let timer = TimerId(self.next_timer);
        self.timer = Some((timer, purpose));
        fx.push(Effect::StartTimer {
            timer,
            delay,
            purpose,
        });
    }

    fn cancel_timer(&mut self, fx: &mut Vec<Effect>) {
        if let Some((timer, _)) = self.timer.take() {
            fx.push(Effect::CancelTimer { timer });
        }
    }

    fn transition(&mut self, to: ConnectionState, fx: &mut Vec<Effect>) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to.clone());
        debug!(from = %from, to = %to, "state transition");
        fx.push(Effect::StateChanged(StateChange { from, to }));
    }
}
