use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ChannelType, TeamId, UserId};

/// Why a frame or event could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("frame is neither an event nor a response")]
    UnknownFrame,
}

/// A push event as delivered on the WebSocket: a kind tag plus an open bag of fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub broadcast: Map<String, Value>,
    #[serde(default)]
    pub seq: i64,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event: event.into(),
            data,
            ..Default::default()
        }
    }

    fn str_field(&self, field: &'static str) -> Result<Option<&str>, EventError> {
        match self.data.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(EventError::WrongType {
                field,
                expected: "string",
            }),
        }
    }
}

/// Reply to an action the client sent (authentication, ping, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub seq_reply: i64,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl RawResponse {
    /// Ping replies carry `{"text": "pong"}`.
    pub fn is_pong(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
            == Some("pong")
    }
}

/// One text frame from the event socket.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Event(RawEvent),
    Response(RawResponse),
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(obj) = &value else {
            return Err(EventError::UnknownFrame);
        };
        if obj.contains_key("event") {
            Ok(Frame::Event(serde_json::from_value(value)?))
        } else if obj.contains_key("seq_reply") || obj.contains_key("status") {
            Ok(Frame::Response(serde_json::from_value(value)?))
        } else {
            Err(EventError::UnknownFrame)
        }
    }
}

pub const EVENT_POSTED: &str = "posted";
pub const EVENT_POST_EDITED: &str = "post_edited";
pub const EVENT_POST_DELETED: &str = "post_deleted";
pub const EVENT_USER_UPDATED: &str = "user_updated";
pub const EVENT_GROUP_ADDED: &str = "group_added";

/// What happened to a post.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Posted,
    Edited,
    Deleted,
}

impl MessageKind {
    /// `None` for events that do not carry a post.
    pub fn from_event(kind: &str) -> Option<Self> {
        match kind {
            EVENT_POSTED => Some(MessageKind::Posted),
            EVENT_POST_EDITED => Some(MessageKind::Edited),
            EVENT_POST_DELETED => Some(MessageKind::Deleted),
            _ => None,
        }
    }
}

/// A post event with its payload still serialized.
#[derive(Clone, Debug, PartialEq)]
pub struct PostEvent {
    pub kind: MessageKind,
    /// The embedded post exactly as received; fingerprinted before decoding.
    pub payload: String,
    pub team_id: Option<TeamId>,
    pub channel_type: Option<ChannelType>,
}

/// Push events the client reacts to.
#[derive(Clone, Debug, PartialEq)]
pub enum PushEvent {
    Post(PostEvent),
    UserUpdated { user_id: UserId },
    /// Added to a group channel; team/channel membership may have changed.
    GroupAdded,
    Unknown { kind: String },
}

impl PushEvent {
    pub fn decode(raw: &RawEvent) -> Result<Self, EventError> {
        if let Some(kind) = MessageKind::from_event(&raw.event) {
            let payload = raw
                .str_field("post")?
                .ok_or(EventError::MissingField("post"))?
                .to_string();
            // edit events carry an empty team id
            let team_id = raw
                .str_field("team_id")?
                .filter(|s| !s.is_empty())
                .map(TeamId::from);
            let channel_type = raw.str_field("channel_type")?.and_then(ChannelType::from_code);
            return Ok(PushEvent::Post(PostEvent {
                kind,
                payload,
                team_id,
                channel_type,
            }));
        }

        match raw.event.as_str() {
            EVENT_USER_UPDATED => {
                let user = match raw.data.get("user") {
                    Some(Value::Object(user)) => user,
                    Some(_) => {
                        return Err(EventError::WrongType {
                            field: "user",
                            expected: "object",
                        })
                    }
                    None => return Err(EventError::MissingField("user")),
                };
                let id = user
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or(EventError::MissingField("user.id"))?;
                Ok(PushEvent::UserUpdated {
                    user_id: UserId::from(id),
                })
            }
            EVENT_GROUP_ADDED => Ok(PushEvent::GroupAdded),
            other => Ok(PushEvent::Unknown {
                kind: other.to_string(),
            }),
        }
    }
}
