//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each [`Transport::open`] spawns one socket task that dials, reports
//! `Opened`, then runs the read, write and ping pumps until the socket ends.
//! Whatever the outcome, the task reports exactly one `Closed`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_READ_DEADLINE, WS_WRITE_BUFFER};

use crate::config::ConfigError;
use crate::pumps::read::{await_close_reply, read_pump};
use crate::pumps::{ping::ping_pump, write::write_pump};
use crate::transport::{Link, Transport, TransportEvent, TransportEvents};
use crate::types::TransportHandle;

/// How long dialing (TCP, TLS and the upgrade) may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing socket gets to flush its close frame and, when the
/// close was local, to receive the peer's reply.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Errors that end a socket. Reported as `TransportEvent::Error` before `Closed`.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("no frame received within {0:?}")]
    ReadDeadline(Duration),

    #[error("stream ended without a close frame")]
    StreamEnded,
}

/// Socket-level tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsTransportConfig {
    #[serde(alias = "maxMessageSize")]
    pub max_message_size: usize,
    #[serde(alias = "pingPeriodMs")]
    pub ping_period_ms: u64,
    #[serde(alias = "readDeadlineMs")]
    pub read_deadline_ms: u64,
    /// Outbound frames queued per socket before `send` reports failure.
    #[serde(alias = "writeBuffer")]
    pub write_buffer: usize,
    #[serde(alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: WS_MAX_MESSAGE_SIZE,
            ping_period_ms: WS_PING_PERIOD.as_millis() as u64,
            read_deadline_ms: WS_READ_DEADLINE.as_millis() as u64,
            write_buffer: WS_WRITE_BUFFER,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl WsTransportConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_period_ms == 0 {
            return Err(ConfigError::Invalid("ping_period_ms must be positive".into()));
        }
        if self.read_deadline_ms <= self.ping_period_ms {
            return Err(ConfigError::Invalid(format!(
                "read_deadline_ms ({}) must exceed ping_period_ms ({})",
                self.read_deadline_ms, self.ping_period_ms
            )));
        }
        if self.write_buffer == 0 {
            return Err(ConfigError::Invalid("write_buffer must be positive".into()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be positive".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    fn websocket_config(&self) -> tungstenite::protocol::WebSocketConfig {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_message_size);
        ws_config.max_frame_size = Some(self.max_message_size);
        ws_config
    }
}

/// Opens real WebSocket connections.
pub struct WsTransport {
    config: WsTransportConfig,
    runtime: tokio::runtime::Handle,
}

impl WsTransport {
    /// Binds the transport to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: WsTransportConfig) -> Self {
        Self {
            config,
            runtime: tokio::runtime::Handle::current(),
        }
    }
}

impl Transport for WsTransport {
    fn open(&self, handle: TransportHandle, endpoint: &str, events: TransportEvents) -> Box<dyn Link> {
        let (write_tx, write_rx) = mpsc::channel(self.config.write_buffer);
        let open = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let socket = Socket {
            handle,
            endpoint: endpoint.to_string(),
            config: self.config.clone(),
            events,
            write_tx: write_tx.clone(),
            open: open.clone(),
            cancel: cancel.clone(),
        };
        self.runtime.spawn(socket.run(write_rx));

        Box::new(WsLink {
            write_tx,
            open,
            cancel,
        })
    }
}

/// Caller's side of one WebSocket.
struct WsLink {
    write_tx: mpsc::Sender<tungstenite::Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Link for WsLink {
    fn send(&self, frame: String) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        self.write_tx
            .try_send(tungstenite::Message::Text(frame.into()))
            .is_ok()
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by one socket task.
struct Socket {
    handle: TransportHandle,
    endpoint: String,
    config: WsTransportConfig,
    events: TransportEvents,
    write_tx: mpsc::Sender<tungstenite::Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Socket {
    async fn run(self, write_rx: mpsc::Receiver<tungstenite::Message>) {
        let result = self.session(write_rx).await;
        self.open.store(false, Ordering::Release);
        self.cancel.cancel();

        if let Err(e) = result {
            warn!(handle = %self.handle, error = %e, "websocket failed");
            let _ = self.events.send((self.handle, TransportEvent::Error(e.to_string())));
        }
        debug!(handle = %self.handle, "websocket closed");
        let _ = self.events.send((self.handle, TransportEvent::Closed));
    }

    async fn session(&self, write_rx: mpsc::Receiver<tungstenite::Message>) -> Result<(), WsError> {
        let connect = tokio_tungstenite::connect_async_with_config(
            self.endpoint.as_str(),
            Some(self.config.websocket_config()),
            false,
        );
        let timeout = self.config.connect_timeout();

        let stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(handle = %self.handle, "dial cancelled");
                return Ok(());
            }
            res = tokio::time::timeout(timeout, connect) => match res {
                Ok(dialed) => dialed?.0,
                Err(_) => return Err(WsError::ConnectTimeout(timeout)),
            },
        };

        info!(handle = %self.handle, endpoint = %self.endpoint, "websocket open");
        self.open.store(true, Ordering::Release);
        if self.events.send((self.handle, TransportEvent::Opened)).is_err() {
            return Ok(());
        }

        let (write, mut read) = stream.split();

        let write_task = tokio::spawn(write_pump(self.handle, write, write_rx, self.cancel.clone()));
        let ping_task = tokio::spawn(ping_pump(
            self.write_tx.clone(),
            self.config.ping_period(),
            self.cancel.clone(),
        ));

        let result = read_pump(
            self.handle,
            &mut read,
            &self.events,
            self.write_tx.clone(),
            self.config.read_deadline(),
            self.cancel.clone(),
        )
        .await;
        let local_close = result.is_ok() && self.cancel.is_cancelled();

        self.open.store(false, Ordering::Release);
        self.cancel.cancel();
        ping_task.abort();

        // `Closed` is only reported once the socket is really gone, so the
        // next dial never overlaps this one.
        let handle = self.handle;
        let closing = async move {
            let _ = write_task.await;
            if local_close {
                await_close_reply(handle, &mut read).await;
            }
        };
        if tokio::time::timeout(CLOSE_GRACE, closing).await.is_err() {
            debug!(handle = %self.handle, "close handshake not finished in time");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_error_display() {
        assert_eq!(
            WsError::ConnectTimeout(Duration::from_secs(10)).to_string(),
            "connect timed out after 10s"
        );
        assert_eq!(
            WsError::StreamEnded.to_string(),
            "stream ended without a close frame"
        );
        assert!(WsError::ReadDeadline(Duration::from_secs(60))
            .to_string()
            .contains("60s"));
    }

    #[test]
    fn default_config_matches_wire_constants() {
        let config = WsTransportConfig::default();
        assert_eq!(config.ping_period(), WS_PING_PERIOD);
        assert_eq!(config.read_deadline(), WS_READ_DEADLINE);
        assert_eq!(config.max_message_size, WS_MAX_MESSAGE_SIZE);
        assert_eq!(config.write_buffer, WS_WRITE_BUFFER);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_deadline_shorter_than_ping() {
        let config = WsTransportConfig {
            ping_period_ms: 30_000,
            read_deadline_ms: 20_000,
            ..WsTransportConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let no_buffer = WsTransportConfig {
            write_buffer: 0,
            ..WsTransportConfig::default()
        };
        assert!(no_buffer.validate().is_err());
    }

    #[test]
    fn camel_case_aliases_accepted() {
        let config: WsTransportConfig =
            serde_json::from_str(r#"{"pingPeriodMs": 1000, "readDeadlineMs": 5000}"#).unwrap();
        assert_eq!(config.ping_period(), Duration::from_secs(1));
        assert_eq!(config.read_deadline(), Duration::from_secs(5));
        assert_eq!(config.write_buffer, WS_WRITE_BUFFER);
    }

    async fn drain_until_closed(
        rx: &mut mpsc::UnboundedReceiver<(TransportHandle, TransportEvent)>,
    ) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Some((_, ev)) = rx.recv().await {
            let done = ev == TransportEvent::Closed;
            out.push(ev);
            if done {
                break;
            }
        }
        out
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_error_then_closed() {
        // Port 9 on loopback: nothing listens there in the test environment.
        let transport = WsTransport::new(WsTransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = transport.open(TransportHandle(1), "ws://127.0.0.1:9/ws", tx);

        assert!(!link.send("early".into()), "cannot send before open");

        let events = tokio::time::timeout(Duration::from_secs(10), drain_until_closed(&mut rx))
            .await
            .expect("socket task should finish");
        assert!(matches!(events.first(), Some(TransportEvent::Error(_))));
        assert_eq!(events.last(), Some(&TransportEvent::Closed));
        assert!(!events.contains(&TransportEvent::Opened));
    }

    #[tokio::test]
    async fn close_while_dialing_reports_single_closed() {
        // Non-routable address: the dial hangs until cancelled.
        let transport = WsTransport::new(WsTransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = transport.open(TransportHandle(7), "ws://10.255.255.1:81/ws", tx);

        link.close();
        link.close();

        let events = tokio::time::timeout(Duration::from_secs(5), drain_until_closed(&mut rx))
            .await
            .expect("socket task should finish");
        assert_eq!(events, vec![TransportEvent::Closed]);
    }
}
