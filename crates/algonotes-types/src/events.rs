use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatMessage;

/// Events sent over the chat WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Connection accepted; carries the retained history, oldest first.
    Ready {
        user_id: Uuid,
        handle: String,
        history: Vec<ChatMessage>,
    },

    /// A message published by any peer, the receiver included.
    ChatMessage(ChatMessage),

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        handle: String,
        online: bool,
    },

    /// A command from this client was refused. Sent only to that client.
    Error { kind: String, message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Post a message to the global chat
    Publish { text: String },

    /// Leave the chat; the server closes the socket afterwards
    Leave,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_adjacent_tagging() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"Publish","data":{"text":"hi"}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Publish { text } if text == "hi"));

        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"Leave"}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Leave));
    }
}
