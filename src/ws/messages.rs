use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, ErrorCode};
use crate::models::{ChatKind, Identity, MediaTrack, Participant, Role, VitalSigns};
use crate::signaling::SignalKind;

/// Messages a client may send, discriminated by the envelope `type`
/// field with the variant fields under `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    JoinRoom {
        room_id: String,
        declared_role: Role,
    },
    LeaveRoom {
        room_id: String,
    },
    WebrtcSignal {
        room_id: String,
        /// Negotiation message kind; the `data` blob is relayed
        /// verbatim and never inspected.
        #[serde(rename = "type")]
        kind: SignalKind,
        to: String,
        data: Value,
    },
    ChatMessage {
        room_id: String,
        body: String,
        #[serde(default)]
        kind: ChatKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    ToggleMedia {
        room_id: String,
        track: MediaTrack,
        enabled: bool,
    },
    VitalsUpdate {
        room_id: String,
        vitals: VitalSigns,
    },
    ScreenShareStarted {
        room_id: String,
    },
    ScreenShareStopped {
        room_id: String,
    },
    Ping,
}

/// Messages the server sends, same envelope shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    Authenticated {
        identity: Identity,
    },
    AuthError {
        message: String,
    },
    RoomJoined {
        room_id: String,
        participant_id: String,
        participants: Vec<Participant>,
    },
    ParticipantJoined {
        participant: Participant,
        total_participants: usize,
    },
    ParticipantLeft {
        identity_id: String,
        remaining: Vec<Participant>,
        unexpected: bool,
    },
    WebrtcSignal {
        #[serde(rename = "type")]
        kind: SignalKind,
        from: String,
        to: String,
        data: Value,
    },
    ChatMessage {
        message_id: String,
        room_id: String,
        sender_id: String,
        sender_name: String,
        body: String,
        kind: ChatKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ParticipantToggledMedia {
        identity_id: String,
        track: MediaTrack,
        enabled: bool,
    },
    VitalsUpdate {
        patient_id: String,
        vitals: VitalSigns,
        timestamp: DateTime<Utc>,
    },
    ScreenShareStarted {
        identity_id: String,
        display_name: String,
    },
    ScreenShareStopped {
        identity_id: String,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong {
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn error(err: &AppError) -> Self {
        ServerMessage::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn client_envelope_roundtrip() {
        let json = serde_json::json!({
            "type": "webrtc-signal",
            "payload": {
                "room_id": "R-100",
                "type": "offer",
                "to": "p1",
                "data": { "sdp": "v=0..." }
            }
        });
        let msg: ClientMessage = serde_json::from_value(json).unwrap();
        match msg {
            ClientMessage::WebrtcSignal {
                room_id, kind, to, ..
            } => {
                assert_eq!(room_id, "R-100");
                assert_eq!(kind, SignalKind::Offer);
                assert_eq!(to, "p1");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ping_needs_no_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn chat_kind_defaults_to_text() {
        let json = serde_json::json!({
            "type": "chat-message",
            "payload": { "room_id": "R-1", "body": "hello" }
        });
        let msg: ClientMessage = serde_json::from_value(json).unwrap();
        match msg {
            ClientMessage::ChatMessage { kind, .. } => assert_eq!(kind, ChatKind::Text),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn server_error_carries_stable_code() {
        let msg = ServerMessage::error(&AppError::InvalidWebrtcFlow("nope".into()));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "INVALID_WEBRTC_FLOW");
    }

    #[test]
    fn pong_envelope_shape() {
        let msg = ServerMessage::Pong { timestamp: 1234 };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["payload"]["timestamp"], 1234);
    }
}
