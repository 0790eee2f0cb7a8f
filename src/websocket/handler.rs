use std::fmt::Display;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::hub::{Hub, Identity, Outbound, Registration};
use crate::metrics::{HandshakeMetrics, SessionMetrics};
use crate::server::AppState;

use super::handshake::{HandshakeQuery, HandshakeRequest};

/// WebSocket upgrade handler.
///
/// The handshake runs before the upgrade: a refused connection gets a plain
/// HTTP error and never reaches the hub.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
) -> Response {
    let request = HandshakeRequest::from_parts(query, &headers);

    let identity = match request.authenticate(state.verifier.as_ref()) {
        Ok(identity) => identity,
        Err(e) => {
            HandshakeMetrics::record_rejected(e.reason());
            tracing::warn!(reason = e.reason(), error = %e, "WebSocket handshake refused");
            return e.into_response();
        }
    };

    tracing::info!(
        user_id = identity.user_id,
        project_id = identity.project_id,
        "WebSocket upgrade requested"
    );

    let outbound_buffer = state.settings.websocket.outbound_buffer;
    let write_timeout = Duration::from_secs(state.settings.websocket.write_timeout.max(1));
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state.hub, identity, outbound_buffer, write_timeout)
    })
}

/// How a session's writer finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// The hub dropped the queue (unregister or eviction) and it was drained
    QueueClosed,
    /// A close frame was written
    CloseSent,
    WriteFailed,
    /// The peer stopped reading
    WriteTimedOut,
}

/// Drain the outbound queue into the socket. Every write is bounded by
/// `write_timeout`, so an evicted session on a stalled peer still ends.
async fn write_outbound<S>(
    sink: &mut S,
    outbound: &mut mpsc::Receiver<Outbound>,
    write_timeout: Duration,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(frame) = outbound.recv().await {
        let (message, closing) = match frame {
            Outbound::Event(text) => (Message::Text(text.to_string().into()), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close { reason } => (
                Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        match timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) if closing => return WriterExit::CloseSent,
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket write failed");
                return WriterExit::WriteFailed;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = write_timeout.as_secs(),
                    "WebSocket write timed out"
                );
                return WriterExit::WriteTimedOut;
            }
        }
    }

    WriterExit::QueueClosed
}

/// Whether the hub still holds the sending half of this session's queue
fn is_registered(queue: &mpsc::WeakSender<Outbound>) -> bool {
    queue.upgrade().is_some()
}

/// Run one session from registration to teardown
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, hub, identity),
    fields(
        user_id = identity.user_id,
        project_id = identity.project_id
    )
)]
async fn handle_socket(
    mut socket: WebSocket,
    hub: Hub,
    identity: Identity,
    outbound_buffer: usize,
    write_timeout: Duration,
) {
    let connection_start = std::time::Instant::now();

    let (registration, mut outbound) = Registration::channel(identity, outbound_buffer);
    let connection_id = registration.id;
    let activity = registration.activity.clone();
    let queue = registration.sender.downgrade();

    if let Err(e) = hub.register(registration).await {
        tracing::warn!(connection_id = %connection_id, error = %e, "Connection rejected");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AGAIN,
                reason: "hub unavailable".into(),
            })))
            .await;
        return;
    }

    SessionMetrics::record_opened();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: ends when the hub closes the queue (unregister, eviction,
    // shutdown) or when a write fails or times out.
    let mut send_task = tokio::spawn(async move {
        let exit = write_outbound(&mut ws_sender, &mut outbound, write_timeout).await;
        let _ = timeout(write_timeout, ws_sender.close()).await;
        exit
    });

    // Reader: forwards every inbound frame to the hub. Returns true when it
    // stopped because the hub had already dropped the session.
    let reader_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            // Evicted sessions must not keep publishing into the project
            if !is_registered(&queue) {
                tracing::debug!(connection_id = %connection_id, "Session no longer registered");
                return true;
            }

            match result {
                Ok(Message::Text(text)) => {
                    activity.touch();
                    reader_hub
                        .submit_from(text.as_str().as_bytes(), &identity)
                        .await;
                }
                Ok(Message::Binary(data)) => {
                    activity.touch();
                    reader_hub.submit_from(&data, &identity).await;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Axum answers pings itself
                    activity.touch();
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Received close frame");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
        false
    });

    // Whichever side finishes first ends the session
    tokio::select! {
        exit = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, exit = ?exit.ok(), "Send task completed");
            recv_task.abort();
        }
        evicted = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            // An evicted session's queue is already closed; give the writer
            // one write window to flush what is left (e.g. a close frame)
            if matches!(evicted, Ok(true))
                && timeout(write_timeout, &mut send_task).await.is_ok()
            {
                tracing::debug!(connection_id = %connection_id, "Send task drained");
            } else {
                send_task.abort();
            }
        }
    }

    hub.unregister(connection_id).await;

    let duration = connection_start.elapsed().as_secs_f64();
    SessionMetrics::record_closed(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}
