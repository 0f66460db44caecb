//! WebSocket read pump: forwards text frames and enforces the read deadline.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::transport::{TransportEvent, TransportEvents};
use crate::types::TransportHandle;
use crate::ws::WsError;

/// Reads frames until the socket ends, the deadline passes or `cancel` fires.
///
/// Any incoming frame resets the deadline, not just pongs. Text frames are
/// forwarded unparsed; decoding happens on the manager side. A close frame
/// from the peer or a local cancel is a clean exit; everything else is an
/// error the transport reports before `Closed`.
pub(crate) async fn read_pump<S>(
    handle: TransportHandle,
    mut read: S,
    events: &TransportEvents,
    write_tx: mpsc::Sender<tungstenite::Message>,
    read_deadline: Duration,
    cancel: CancellationToken,
) -> Result<(), WsError>
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(read_deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),

            () = &mut deadline => return Err(WsError::ReadDeadline(read_deadline)),

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(WsError::StreamEnded),
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + read_deadline);

                match msg {
                    tungstenite::Message::Text(text) => {
                        let frame = TransportEvent::Message(text.as_str().to_owned());
                        if events.send((handle, frame)).is_err() {
                            debug!(handle = %handle, "event receiver gone, stopping reader");
                            return Ok(());
                        }
                    }
                    tungstenite::Message::Ping(data) => {
                        trace!(handle = %handle, "received ping, sending pong");
                        let _ = write_tx.try_send(tungstenite::Message::Pong(data));
                    }
                    tungstenite::Message::Pong(_) => trace!(handle = %handle, "received pong"),
                    tungstenite::Message::Close(frame) => {
                        match frame {
                            Some(f) => debug!(handle = %handle, code = u16::from(f.code), reason = %f.reason.as_str(), "peer closed socket"),
                            None => debug!(handle = %handle, "peer closed socket"),
                        }
                        return Ok(());
                    }
                    tungstenite::Message::Binary(data) => {
                        debug!(handle = %handle, len = data.len(), "ignoring binary frame");
                    }
                    tungstenite::Message::Frame(_) => {}
                }
            }
        }
    }
}

/// After a local close, reads until the peer answers with its own close
/// frame or the stream ends. Anything else still in flight is discarded.
pub(crate) async fn await_close_reply<S>(handle: TransportHandle, read: &mut S)
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    while let Some(Ok(msg)) = read.next().await {
        if msg.is_close() {
            trace!(handle = %handle, "peer acknowledged close");
            return;
        }
    }
}
