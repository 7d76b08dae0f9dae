//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol used to stream summary events to a
//! browser client.

use serde::{Deserialize, Serialize};
use summary_stream_core::{Document, StreamingEvent};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Asks for the current document snapshot, e.g. to render state missed
    /// before the subscription started.
    Snapshot,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the subscription. Events follow from this point on; earlier
    /// ones are not replayed.
    Subscribed { document_id: Uuid },

    /// One processing transition of the document.
    Event { event: StreamingEvent },

    /// Reply to `ClientMessage::Snapshot`.
    Snapshot { document: Document },

    /// The document was deleted. No further messages follow.
    Closed { document_id: Uuid },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}
