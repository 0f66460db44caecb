//! WebSocket write pump: the only task that touches the sink.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::types::TransportHandle;

/// Drains `write_rx` into the socket until cancelled, then sends a close frame.
pub(crate) async fn write_pump<S>(
    handle: TransportHandle,
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write.send(msg).await {
                    warn!(handle = %handle, error = %e, "websocket write failed");
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    trace!(handle = %handle, "write pump closing socket");
    let _ = write.send(tungstenite::Message::Close(None)).await;
}
