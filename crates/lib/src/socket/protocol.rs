//! Conversation events exchanged with the service over Socket.IO.
//!
//! Outbound: `start_conversation` (once per session) and `chat_message` (per user turn).
//! Inbound: `assistant_response` with a plain string payload. Anything else is rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::packet::SocketPacket;

pub const START_CONVERSATION: &str = "start_conversation";
pub const CHAT_MESSAGE: &str = "chat_message";
pub const ASSISTANT_RESPONSE: &str = "assistant_response";

/// Payload of `start_conversation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversation {
    pub patient_natural_language_details: String,
    pub user_email: String,
    pub patient_id: u64,
}

/// Payload of `chat_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message: String,
    pub user_email: String,
    pub patient_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StartConversation(StartConversation),
    ChatMessage(ChatMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StartConversation(_) => START_CONVERSATION,
            ClientEvent::ChatMessage(_) => CHAT_MESSAGE,
        }
    }

    fn payload(&self) -> Value {
        // Both payloads are plain structs of strings and integers.
        match self {
            ClientEvent::StartConversation(p) => serde_json::to_value(p),
            ClientEvent::ChatMessage(p) => serde_json::to_value(p),
        }
        .unwrap_or(Value::Null)
    }

    pub fn to_packet(&self) -> SocketPacket {
        SocketPacket::event(Value::Array(vec![
            Value::String(self.name().to_string()),
            self.payload(),
        ]))
    }

    /// Parse the `["name", payload]` array of an event packet sent by a client.
    pub fn from_event_data(data: &Value) -> Result<Self, ProtocolError> {
        let (name, payload) = split_event(data)?;
        let parse = |expected: &'static str| ProtocolError::BadPayload {
            event: name.to_string(),
            expected,
        };
        match name {
            START_CONVERSATION => serde_json::from_value(payload.clone())
                .map(ClientEvent::StartConversation)
                .map_err(|_| parse("start_conversation object")),
            CHAT_MESSAGE => serde_json::from_value(payload.clone())
                .map(ClientEvent::ChatMessage)
                .map_err(|_| parse("chat_message object")),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    AssistantResponse(String),
}

impl ServerEvent {
    /// Validate the `["name", payload]` array of an inbound event packet.
    pub fn from_event_data(data: &Value) -> Result<Self, ProtocolError> {
        let (name, payload) = split_event(data)?;
        match name {
            ASSISTANT_RESPONSE => match payload {
                Value::String(text) => Ok(ServerEvent::AssistantResponse(text.clone())),
                _ => Err(ProtocolError::BadPayload {
                    event: name.to_string(),
                    expected: "string",
                }),
            },
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    pub fn to_packet(&self) -> SocketPacket {
        match self {
            ServerEvent::AssistantResponse(text) => SocketPacket::event(Value::Array(vec![
                Value::String(ASSISTANT_RESPONSE.to_string()),
                Value::String(text.clone()),
            ])),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("event data is not a [name, payload] array")]
    NotAnEvent,
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("event {event:?}: expected {expected} payload")]
    BadPayload {
        event: String,
        expected: &'static str,
    },
}

fn split_event(data: &Value) -> Result<(&str, &Value), ProtocolError> {
    let arr = data.as_array().ok_or(ProtocolError::NotAnEvent)?;
    let name = arr
        .first()
        .and_then(|v| v.as_str())
        .ok_or(ProtocolError::NotAnEvent)?;
    Ok((name, arr.get(1).unwrap_or(&Value::Null)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_conversation_wire_shape() {
        let ev = ClientEvent::StartConversation(StartConversation {
            patient_natural_language_details: "Jane is 63".to_string(),
            user_email: "doc@example.com".to_string(),
            patient_id: 42,
        });
        assert_eq!(
            ev.to_packet().to_engine_frame(),
            r#"42["start_conversation",{"patientNaturalLanguageDetails":"Jane is 63","userEmail":"doc@example.com","patientId":42}]"#
        );
    }

    #[test]
    fn chat_message_parses_back() {
        let ev = ClientEvent::ChatMessage(ChatMessage {
            message: "I have chest pain".to_string(),
            user_email: "doc@example.com".to_string(),
            patient_id: 42,
        });
        let SocketPacket::Event { data, .. } = ev.to_packet() else {
            panic!("expected event");
        };
        assert_eq!(ClientEvent::from_event_data(&data).unwrap(), ev);
    }

    #[test]
    fn assistant_response_requires_string() {
        assert_eq!(
            ServerEvent::from_event_data(&json!(["assistant_response", "Hello"])).unwrap(),
            ServerEvent::AssistantResponse("Hello".to_string())
        );
        assert!(matches!(
            ServerEvent::from_event_data(&json!(["assistant_response", {"text": "Hello"}])),
            Err(ProtocolError::BadPayload { .. })
        ));
    }

    #[test]
    fn unknown_and_malformed_events_rejected() {
        assert_eq!(
            ServerEvent::from_event_data(&json!(["score_update", 3])),
            Err(ProtocolError::UnknownEvent("score_update".to_string()))
        );
        assert_eq!(
            ServerEvent::from_event_data(&json!({"event": "assistant_response"})),
            Err(ProtocolError::NotAnEvent)
        );
        assert_eq!(
            ServerEvent::from_event_data(&json!([])),
            Err(ProtocolError::NotAnEvent)
        );
    }
}
