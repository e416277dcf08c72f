//! Per-connection handler: register with the engine, pump frames both
//! ways, and disconnect on close, error or idle timeout.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tandem_common::{SessionId, TandemError};
use tandem_signal::ChannelHandle;

use crate::app::AppState;

/// Handle a single upgraded signaling socket.
pub async fn handle_connection(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let id = SessionId::new();
    let address = peer.ip();
    let (sink, stream) = socket.split();

    let (channel, rx) = ChannelHandle::bounded(state.config.channel_capacity);
    let writer = tokio::spawn(write_loop(sink, rx, id.clone()));

    if !state.engine.connect(&id, channel, address).await {
        warn!(session = %id, peer = %peer, "Session ID collision, closing connection");
        writer.abort();
        return;
    }

    read_loop(stream, &id, &state, state.config.idle_timeout()).await;

    // Unregistering drops the last sender, which ends the writer.
    state.engine.disconnect(&id, address).await;
    debug!(session = %id, peer = %peer, "Connection closed");
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    id: &SessionId,
    state: &AppState,
    idle_timeout: Option<Duration>,
) {
    loop {
        let frame = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(frame) => frame,
                Err(_) => {
                    info!(session = %id, "Idle timeout, closing connection");
                    break;
                }
            },
            None => stream.next().await,
        };

        match frame {
            Some(Ok(Message::Text(text))) => state.engine.handle_text(id, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => {
                debug!(session = %id, len = data.len(), "Ignoring binary frame");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(session = %id, error = %e, "WS error");
                break;
            }
            // Pings are answered by the socket itself.
            Some(Ok(_)) => {}
        }
    }
}

/// Drain the session's outbound queue into the socket until the queue
/// closes or the socket fails.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    id: SessionId,
) {
    let result: Result<(), TandemError> = async {
        while let Some(text) = rx.recv().await {
            sink.send(Message::Text(text.into()))
                .await
                .map_err(|e| TandemError::Transport(e.to_string()))?;
        }
        sink.close()
            .await
            .map_err(|e| TandemError::Transport(e.to_string()))
    }
    .await;

    if let Err(e) = result {
        debug!(session = %id, error = %e, "Writer stopped");
    }
}
