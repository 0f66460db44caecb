//! Transport abstraction: one physical socket per handle.
//!
//! A [`Transport`] opens sockets without blocking and reports their
//! lifecycle on a channel. The contract every implementation keeps:
//!
//! - `Opened` at most once, before any `Message`.
//! - `Error` is informational and is always followed by `Closed`.
//! - `Closed` exactly once per handle, whether the close was local, remote
//!   or caused by a failure, including when the socket never opened.
//! - `Closed` is sent only once the socket is fully released; the caller
//!   does not dial again before it.

use tokio::sync::mpsc;

use crate::types::TransportHandle;

/// Raw lifecycle notification from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// One UTF-8 text frame, unparsed.
    Message(String),
    Error(String),
    Closed,
}

/// Sink for transport events, tagged with the socket they belong to.
pub type TransportEvents = mpsc::UnboundedSender<(TransportHandle, TransportEvent)>;

/// Factory for sockets.
pub trait Transport: Send + Sync + 'static {
    /// Starts opening a socket to `endpoint` and returns immediately.
    ///
    /// Progress is reported on `events` under `handle`.
    fn open(&self, handle: TransportHandle, endpoint: &str, events: TransportEvents) -> Box<dyn Link>;
}

/// The caller's side of one socket.
pub trait Link: Send + Sync {
    /// Queues one text frame. Returns `false` without queuing when the socket
    /// is not open or cannot accept more data; never blocks.
    fn send(&self, frame: String) -> bool;

    /// Closes the socket. Idempotent; a `Closed` event follows once.
    fn close(&self);
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport driven by the test.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Socket {
        endpoint: String,
        events: Option<TransportEvents>,
        open: bool,
        /// Close requested, not yet released by the test.
        closing: bool,
        closed: bool,
        sent: Vec<String>,
    }

    #[derive(Default)]
    struct Sockets {
        order: Vec<TransportHandle>,
        by_handle: HashMap<TransportHandle, Socket>,
        max_live: usize,
        defer_close: bool,
    }

    impl Sockets {
        fn live(&self) -> usize {
            self.by_handle.values().filter(|s| !s.closed).count()
        }

        /// Marks the socket closed and reports it, once.
        fn finish(&mut self, handle: TransportHandle, error: Option<&str>) {
            let Some(socket) = self.by_handle.get_mut(&handle) else {
                return;
            };
            if socket.closed {
                return;
            }
            socket.closed = true;
            socket.open = false;
            if let Some(events) = socket.events.take() {
                if let Some(err) = error {
                    let _ = events.send((handle, TransportEvent::Error(err.to_string())));
                }
                let _ = events.send((handle, TransportEvent::Closed));
            }
        }
    }

    /// Records every socket and lets the test play the server's part.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        sockets: Arc<Mutex<Sockets>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// A transport whose sockets stay up after `close()` until the test
        /// calls [`release`](Self::release), like a real socket finishing
        /// its close handshake.
        pub(crate) fn with_deferred_close() -> Self {
            let transport = Self::default();
            transport.sockets.lock().unwrap().defer_close = true;
            transport
        }

        /// Finishes a close that was requested earlier.
        pub(crate) fn release(&self, handle: TransportHandle) {
            let mut sockets = self.sockets.lock().unwrap();
            let requested = sockets.by_handle.get(&handle).is_some_and(|s| s.closing);
            assert!(requested, "{handle} was never asked to close");
            sockets.finish(handle, None);
        }

        /// Handles in the order they were opened.
        pub(crate) fn opened(&self) -> Vec<TransportHandle> {
            self.sockets.lock().unwrap().order.clone()
        }

        pub(crate) fn endpoint(&self, handle: TransportHandle) -> String {
            self.sockets.lock().unwrap().by_handle[&handle].endpoint.clone()
        }

        pub(crate) fn last(&self) -> TransportHandle {
            *self.sockets.lock().unwrap().order.last().expect("no socket opened")
        }

        /// Frames the client sent on `handle`.
        pub(crate) fn sent(&self, handle: TransportHandle) -> Vec<String> {
            self.sockets.lock().unwrap().by_handle[&handle].sent.clone()
        }

        pub(crate) fn is_closed(&self, handle: TransportHandle) -> bool {
            self.sockets.lock().unwrap().by_handle[&handle].closed
        }

        /// Highest number of simultaneously live sockets ever observed.
        pub(crate) fn max_live(&self) -> usize {
            self.sockets.lock().unwrap().max_live
        }

        pub(crate) fn live(&self) -> usize {
            self.sockets.lock().unwrap().live()
        }

        /// Completes the connection: the socket reports `Opened`.
        pub(crate) fn accept(&self, handle: TransportHandle) {
            let mut sockets = self.sockets.lock().unwrap();
            let socket = sockets.by_handle.get_mut(&handle).expect("unknown handle");
            if socket.closed {
                return;
            }
            socket.open = true;
            if let Some(events) = &socket.events {
                let _ = events.send((handle, TransportEvent::Opened));
            }
        }

        /// The server pushes one raw text frame.
        pub(crate) fn push(&self, handle: TransportHandle, text: &str) {
            let sockets = self.sockets.lock().unwrap();
            let socket = &sockets.by_handle[&handle];
            if let Some(events) = &socket.events {
                let _ = events.send((handle, TransportEvent::Message(text.to_string())));
            }
        }

        /// The network drops the socket: an error followed by the close.
        pub(crate) fn drop_connection(&self, handle: TransportHandle) {
            self.sockets
                .lock()
                .unwrap()
                .finish(handle, Some("connection reset by peer"));
        }
    }

    impl Transport for MockTransport {
        fn open(&self, handle: TransportHandle, endpoint: &str, events: TransportEvents) -> Box<dyn Link> {
            let mut sockets = self.sockets.lock().unwrap();
            sockets.order.push(handle);
            sockets.by_handle.insert(
                handle,
                Socket {
                    endpoint: endpoint.to_string(),
                    events: Some(events),
                    ..Socket::default()
                },
            );
            sockets.max_live = sockets.max_live.max(sockets.live());
            Box::new(MockLink {
                handle,
                sockets: self.sockets.clone(),
            })
        }
    }

    struct MockLink {
        handle: TransportHandle,
        sockets: Arc<Mutex<Sockets>>,
    }

    impl Link for MockLink {
        fn send(&self, frame: String) -> bool {
            let mut sockets = self.sockets.lock().unwrap();
            match sockets.by_handle.get_mut(&self.handle) {
                Some(socket) if socket.open && !socket.closing && !socket.closed => {
                    socket.sent.push(frame);
                    true
                }
                _ => false,
            }
        }

        fn close(&self) {
            let mut sockets = self.sockets.lock().unwrap();
            if sockets.defer_close {
                if let Some(socket) = sockets.by_handle.get_mut(&self.handle) {
                    socket.closing = true;
                }
                return;
            }
            sockets.finish(self.handle, None);
        }
    }

    #[test]
    fn mock_link_follows_contract() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = MockTransport::new();
        let link = transport.open(TransportHandle(1), "ws://test", tx);

        assert!(!link.send("early".into()), "not open yet");
        transport.accept(TransportHandle(1));
        assert!(link.send("hello".into()));

        link.close();
        link.close();
        assert!(!link.send("late".into()));

        let mut events = Vec::new();
        while let Ok((_, ev)) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(events, vec![TransportEvent::Opened, TransportEvent::Closed]);
        assert_eq!(transport.sent(TransportHandle(1)), vec!["hello".to_string()]);
    }

    #[test]
    fn deferred_close_reports_on_release() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = MockTransport::with_deferred_close();
        let link = transport.open(TransportHandle(1), "ws://test", tx);
        transport.accept(TransportHandle(1));

        link.close();
        assert!(!link.send("after close".into()));
        assert_eq!(transport.live(), 1, "still up until released");
        assert_eq!(rx.try_recv().unwrap().1, TransportEvent::Opened);
        assert!(rx.try_recv().is_err());

        transport.release(TransportHandle(1));
        assert_eq!(transport.live(), 0);
        assert_eq!(rx.try_recv().unwrap().1, TransportEvent::Closed);
    }
}
