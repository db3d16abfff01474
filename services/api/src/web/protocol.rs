//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between a chat client and the API
//! server on `/ws/chats/{chat_id}`.

use serde::{Deserialize, Serialize};
use tutoring_core::Message;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Posts a message to the chat.
    Send { content: String },

    /// Shows or clears the sender's typing indicator.
    Typing { typing: bool },

    /// Marks the other participant's messages as read.
    MarkRead {
        #[serde(rename = "otherUserId")]
        other_user_id: String,
    },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full, current message list. Sent on connect and after every change.
    Messages { messages: Vec<Message> },

    /// A client frame could not be applied. The connection stays open.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_are_tagged_by_type() {
        let send: ClientMessage =
            serde_json::from_value(json!({"type": "send", "content": "hi"})).unwrap();
        assert_eq!(send, ClientMessage::Send { content: "hi".to_string() });

        let read: ClientMessage =
            serde_json::from_value(json!({"type": "mark_read", "otherUserId": "tutor-1"})).unwrap();
        assert_eq!(
            read,
            ClientMessage::MarkRead {
                other_user_id: "tutor-1".to_string()
            }
        );

        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "init"})).is_err());
    }

    #[test]
    fn server_errors_carry_a_message() {
        let frame = serde_json::to_value(ServerMessage::Error {
            message: "This chat has been ended".to_string(),
        })
        .unwrap();
        assert_eq!(frame, json!({"type": "error", "message": "This chat has been ended"}));
    }
}
