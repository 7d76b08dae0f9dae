//! services/api/src/web/ws_handler.rs
//!
//! The entry point and control loop for an event-streaming WebSocket
//! connection. One task forwards the document's events to the client while the
//! connection's own loop serves client requests; a cancellation token ties
//! their lifetimes together.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use summary_stream_core::EventSubscription;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::ApiError,
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::AppState,
    },
};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Stream the processing events of a summary over a WebSocket.
///
/// Events are delivered from the moment of attachment, in sequence order,
/// without gaps. The socket is closed after a `closed` message when the
/// summary is deleted.
#[utoipa::path(
    get,
    path = "/summaries/{id}/events",
    params(("id" = Uuid, Path, description = "The summary id.")),
    responses(
        (status = 101, description = "Switching to the WebSocket event stream"),
        (status = 404, description = "Unknown summary")
    )
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Path(document_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    app_state.document(document_id).await?;
    // Subscribe before upgrading so nothing emitted during the handshake is lost.
    let subscription = app_state.aggregator().observe_events(document_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, document_id, subscription)))
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    document_id: Uuid,
    subscription: EventSubscription,
) {
    info!(%document_id, "New event stream connection.");

    // The sender is shared between the forwarding task and the request loop.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    if send_message(&ws_sender, &ServerMessage::Subscribed { document_id })
        .await
        .is_err()
    {
        return;
    }

    let token = CancellationToken::new();
    let forwarder = tokio::spawn(forward_events(
        subscription,
        ws_sender.clone(),
        document_id,
        token.clone(),
    ));

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text_message(text.as_str(), &app_state, document_id, &ws_sender).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%document_id, error = %e, "WebSocket receive failed.");
                    break;
                }
            },
        }
    }

    token.cancel();
    if let Err(e) = forwarder.await {
        error!(%document_id, error = %e, "Event forwarding task failed.");
    }
    info!(%document_id, "Event stream connection closed.");
}

/// Forwards events until the subscription ends, the client goes away or the
/// token is cancelled.
async fn forward_events(
    mut subscription: EventSubscription,
    ws_sender: WsSender,
    document_id: Uuid,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => {
                    debug!(%document_id, sequence = event.sequence, "Forwarding event.");
                    if send_message(&ws_sender, &ServerMessage::Event { event }).await.is_err() {
                        break;
                    }
                }
                None => {
                    // The summary was deleted.
                    let _ = send_message(&ws_sender, &ServerMessage::Closed { document_id }).await;
                    let _ = ws_sender.lock().await.close().await;
                    break;
                }
            },
        }
    }
    token.cancel();
}

async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    document_id: Uuid,
    ws_sender: &WsSender,
) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Snapshot) => match app_state.aggregator().get_document(document_id) {
            Ok(document) => ServerMessage::Snapshot { document },
            Err(e) => ServerMessage::Error {
                message: e.to_string(),
            },
        },
        Err(e) => ServerMessage::Error {
            message: format!("Unrecognized message: {}", e),
        },
    };
    let _ = send_message(ws_sender, &reply).await;
}

async fn send_message(ws_sender: &WsSender, message: &ServerMessage) -> Result<(), ApiError> {
    let json = serde_json::to_string(message)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize message: {}", e)))?;
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .map_err(ApiError::from)
}
