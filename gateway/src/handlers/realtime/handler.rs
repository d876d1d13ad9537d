//! Session WebSocket handler
//!
//! Each WebSocket connected to `/ws/{session_id}` is attached to the named
//! session in the registry. Inbound frames are decoded and forwarded to the
//! session's engine; engine events reach the socket through the registry's
//! relay and this connection's writer task.

use axum::{
    Extension,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::engine::RealtimeEvent;
use crate::core::registry::{Connection, ConnectionId, OutboundFrame, SessionRegistry};
use crate::core::serializer::serialize_event;
use crate::state::{AppState, ConnectionSlot};

use super::messages::{FrameError, InboundFrame, pcm16_bytes};

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long the writer may keep flushing after the read loop ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Session WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket and attaches it to the session
/// named in the path. Connecting is the only way to join a session; no join
/// message is needed.
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `session_id` - Session to attach to (registered on first use)
/// * `state` - Application state containing the session registry
/// * `slot` - Connection slot reserved by the connection-limit middleware
pub async fn session_socket_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<Arc<ConnectionSlot>>>,
) -> Response {
    info!(session_id = %session_id, "Session WebSocket upgrade requested");

    // Held for the lifetime of the connection
    let slot = slot.map(|Extension(slot)| slot);

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            handle_session_socket(socket, session_id, state.registry.clone()).await;
            drop(slot);
        })
}

/// Run one connection from attach to detach.
async fn handle_session_socket(
    socket: WebSocket,
    session_id: String,
    registry: SessionRegistry,
) {
    let (mut sender, mut receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(CHANNEL_BUFFER_SIZE);

    let connection = Connection::new(frame_tx.clone());
    let connection_id = connection.id();
    let closed = connection.closed().clone();

    info!(
        session_id = %session_id,
        connection_id = %connection_id,
        "Session WebSocket connection established"
    );

    // Sender task for outgoing frames
    let mut sender_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let result = match frame {
                OutboundFrame::Text(text) => {
                    sender.send(Message::Text(text.to_string().into())).await
                }
                OutboundFrame::Close => {
                    debug!("Closing session WebSocket connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                warn!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    match registry.attach(connection, &session_id).await {
        Ok(()) => {
            receive_loop(
                &mut receiver,
                &session_id,
                connection_id,
                &frame_tx,
                &registry,
                &closed,
            )
            .await;
        }
        Err(e) => error!(
            session_id = %session_id,
            connection_id = %connection_id,
            "Failed to attach connection: {}",
            e
        ),
    }

    // Runs on every exit path of the receive loop
    registry.detach(connection_id, &session_id).await;

    let _ = frame_tx.try_send(OutboundFrame::Close);
    drop(frame_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        debug!(session_id = %session_id, "Writer did not drain in time, aborting");
        sender_task.abort();
    }

    info!(
        session_id = %session_id,
        connection_id = %connection_id,
        "Session WebSocket connection terminated"
    );
}

async fn receive_loop<S>(
    receiver: &mut S,
    session_id: &str,
    connection_id: ConnectionId,
    frame_tx: &mpsc::Sender<OutboundFrame>,
    registry: &SessionRegistry,
    closed: &tokio_util::sync::CancellationToken,
) where
    S: futures::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        select! {
            biased;
            _ = closed.cancelled() => {
                info!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    "Session closed, disconnecting"
                );
                break;
            }
            msg_result = receiver.next() => match msg_result {
                Some(Ok(msg)) => {
                    if !process_session_message(msg, session_id, frame_tx, registry).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(session_id = %session_id, "Session WebSocket error: {}", e);
                    break;
                }
                None => {
                    info!(session_id = %session_id, "Session WebSocket closed by client");
                    break;
                }
            }
        }
    }
}

/// Process one incoming WebSocket message. Returns false to end the connection.
async fn process_session_message(
    msg: Message,
    session_id: &str,
    frame_tx: &mpsc::Sender<OutboundFrame>,
    registry: &SessionRegistry,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!("Received text frame: {} bytes", text.len());

            let frame = match InboundFrame::parse(&text).and_then(|frame| {
                frame.validate_size()?;
                Ok(frame)
            }) {
                Ok(frame) => frame,
                Err(e) => return reject_frame(e, session_id, frame_tx).await,
            };

            match frame {
                InboundFrame::Audio { data } => {
                    if let Err(e) = registry.forward_audio(session_id, pcm16_bytes(&data)).await {
                        warn!(session_id = %session_id, "Failed to send audio to engine: {}", e);
                        send_error(frame_tx, format!("Failed to send audio: {e}")).await;
                    }
                }
                InboundFrame::Text { text } => {
                    if let Err(e) = registry.forward_text(session_id, &text).await {
                        warn!(session_id = %session_id, "Failed to send text to engine: {}", e);
                        send_error(frame_tx, format!("Failed to send text: {e}")).await;
                    }
                }
                InboundFrame::Unknown => {
                    debug!(session_id = %session_id, "Ignoring frame with unknown type");
                }
            }
            true
        }
        Message::Binary(data) => {
            debug!("Received binary audio: {} bytes", data.len());

            if let Err(e) = registry.forward_audio(session_id, data).await {
                warn!(session_id = %session_id, "Failed to send audio to engine: {}", e);
                send_error(frame_tx, format!("Failed to send audio: {e}")).await;
            }
            true
        }
        Message::Ping(_) => {
            debug!("Received ping");
            true
        }
        Message::Pong(_) => {
            debug!("Received pong");
            true
        }
        Message::Close(_) => {
            info!(session_id = %session_id, "Session WebSocket close received");
            false
        }
    }
}

/// Report a bad frame to its sender. Malformed frames end the connection.
async fn reject_frame(
    err: FrameError,
    session_id: &str,
    frame_tx: &mpsc::Sender<OutboundFrame>,
) -> bool {
    let fatal = err.is_fatal();
    if fatal {
        error!(session_id = %session_id, "Failed to parse session frame: {}", err);
    } else {
        warn!(session_id = %session_id, "Frame validation failed: {}", err);
    }
    send_error(frame_tx, err.to_string()).await;
    !fatal
}

/// Send an `error` record to this connection only.
async fn send_error(frame_tx: &mpsc::Sender<OutboundFrame>, message: String) {
    let record = serialize_event(&RealtimeEvent::Error {
        error: Some(message),
    });
    let _ = frame_tx
        .send(OutboundFrame::Text(Arc::from(record.to_json())))
        .await;
}
