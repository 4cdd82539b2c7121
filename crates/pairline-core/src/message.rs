use crate::peer_id::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Actions this client understands; anything else on the wire is rejected up front.
const KNOWN_ACTIONS: &[&str] = &[
    "NewUser",
    "RequestPair",
    "UserLeave",
    "SessionDescription",
    "ICECandidate",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptionKind::Offer => f.write_str("offer"),
            DescriptionKind::Answer => f.write_str("answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mline_index: Option<u16>,
    pub sdp_mid: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mline_index,
            sdp_mid: None,
        }
    }
}

/// One relay message. `id` always names the remote party the message concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    NewUser {
        id: PeerId,
    },
    RequestPair {
        id: PeerId,
    },
    UserLeave {
        id: PeerId,
    },
    SessionDescription {
        id: PeerId,
        description: SessionDescription,
    },
    IceCandidate {
        id: PeerId,
        candidate: IceCandidate,
    },
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("signaling message must be a json object")]
    NotAnObject,
    #[error("signaling message has no uuid")]
    MissingPeerId,
    #[error("signaling message has no action")]
    MissingAction,
    #[error("unknown signaling action {0}")]
    UnknownAction(String),
    #[error("malformed {action} payload: {source}")]
    Payload {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Action-tagged payload as it appears on the wire, minus the `uuid`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action")]
enum WireBody {
    NewUser,
    RequestPair,
    UserLeave,
    SessionDescription {
        #[serde(rename = "type")]
        kind: DescriptionKind,
        sdp: String,
    },
    #[serde(rename = "ICECandidate")]
    IceCandidate {
        candidate: String,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_mline_index: Option<u16>,
        #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
    },
}

impl SignalingMessage {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            SignalingMessage::NewUser { id }
            | SignalingMessage::RequestPair { id }
            | SignalingMessage::UserLeave { id }
            | SignalingMessage::SessionDescription { id, .. }
            | SignalingMessage::IceCandidate { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::NewUser { .. } => "NewUser",
            SignalingMessage::RequestPair { .. } => "RequestPair",
            SignalingMessage::UserLeave { .. } => "UserLeave",
            SignalingMessage::SessionDescription { .. } => "SessionDescription",
            SignalingMessage::IceCandidate { .. } => "ICECandidate",
        }
    }

    /// Flat `{"uuid": .., "action": .., ...}` object, the shape clients send to the relay.
    pub fn encode(&self) -> Result<String, MessageError> {
        let (id, body) = self.to_wire();
        let mut value = serde_json::to_value(body)?;
        if let Value::Object(map) = &mut value {
            map.insert("uuid".to_string(), Value::String(id.as_str().to_string()));
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Accepts both the flat shape and the relay's `{"uuid": .., "data": {"action": ..}}`
    /// wrapping. A root-level `uuid` wins over one inside `data`.
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let Value::Object(mut root) = serde_json::from_str::<Value>(text)? else {
            return Err(MessageError::NotAnObject);
        };
        let data = match root.remove("data") {
            Some(Value::Object(data)) => Some(data),
            Some(Value::Null) | None => None,
            Some(_) => return Err(MessageError::NotAnObject),
        };
        let id = uuid_of(&root)
            .or_else(|| data.as_ref().and_then(uuid_of))
            .ok_or(MessageError::MissingPeerId)?;
        let body = match data {
            Some(data) if data.contains_key("action") => data,
            _ => root,
        };
        let action = body
            .get("action")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingAction)?
            .to_string();
        if !KNOWN_ACTIONS.contains(&action.as_str()) {
            return Err(MessageError::UnknownAction(action));
        }
        let body: WireBody = serde_json::from_value(Value::Object(body))
            .map_err(|source| MessageError::Payload { action, source })?;
        Ok(Self::from_wire(id, body))
    }

    fn to_wire(&self) -> (&PeerId, WireBody) {
        match self {
            SignalingMessage::NewUser { id } => (id, WireBody::NewUser),
            SignalingMessage::RequestPair { id } => (id, WireBody::RequestPair),
            SignalingMessage::UserLeave { id } => (id, WireBody::UserLeave),
            SignalingMessage::SessionDescription { id, description } => (
                id,
                WireBody::SessionDescription {
                    kind: description.kind,
                    sdp: description.sdp.clone(),
                },
            ),
            SignalingMessage::IceCandidate { id, candidate } => (
                id,
                WireBody::IceCandidate {
                    candidate: candidate.candidate.clone(),
                    sdp_mline_index: candidate.sdp_mline_index,
                    sdp_mid: candidate.sdp_mid.clone(),
                },
            ),
        }
    }

    fn from_wire(id: PeerId, body: WireBody) -> Self {
        match body {
            WireBody::NewUser => SignalingMessage::NewUser { id },
            WireBody::RequestPair => SignalingMessage::RequestPair { id },
            WireBody::UserLeave => SignalingMessage::UserLeave { id },
            WireBody::SessionDescription { kind, sdp } => SignalingMessage::SessionDescription {
                id,
                description: SessionDescription { kind, sdp },
            },
            WireBody::IceCandidate {
                candidate,
                sdp_mline_index,
                sdp_mid,
            } => SignalingMessage::IceCandidate {
                id,
                candidate: IceCandidate {
                    candidate,
                    sdp_mline_index,
                    sdp_mid,
                },
            },
        }
    }
}

fn uuid_of(map: &Map<String, Value>) -> Option<PeerId> {
    map.get("uuid")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(PeerId::from)
}
