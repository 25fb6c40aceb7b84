use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    ChannelId, ChannelMember, ChannelSummary, MediaId, MessageId, PreviewId, SpaceId,
    SpaceWithRelated, UserId,
};

/// Keepalive frame sent by the server. Never JSON.
pub const PING: &str = "♥";
/// Keepalive answer sent by the client.
pub const PONG: &str = "♡";

/// Opaque rich-text spans produced by the text parser.
pub type Entities = Vec<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventId {
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub node: u16,
    #[serde(default)]
    pub seq: u32,
}

impl EventId {
    pub const fn zero() -> Self {
        Self {
            timestamp: 0,
            node: 0,
            seq: 0,
        }
    }

    pub const fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            node: 0,
            seq: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

impl Ord for EventId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.node.cmp(&other.node))
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for EventId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<MessageId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<MediaId>,
    #[serde(default)]
    pub in_game: bool,
    #[serde(default)]
    pub is_action: bool,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub folded: bool,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper_to_users: Option<Vec<UserId>>,
    #[serde(default)]
    pub entities: Entities,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub pos_p: i32,
    pub pos_q: i32,
    pub pos: f64,
    #[serde(default)]
    pub color: String,
}

/// Staleness token carried by a preview of an in-progress edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEdit {
    /// `modified` of the message when the edit started.
    pub time: DateTime<Utc>,
    pub p: i32,
    pub q: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub id: PreviewId,
    pub sender_id: UserId,
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<MessageId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<MediaId>,
    #[serde(default)]
    pub in_game: bool,
    #[serde(default)]
    pub is_action: bool,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default)]
    pub clear: bool,
    /// `None` means the sender turned broadcasting off.
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whisper_to_users: Option<Vec<UserId>>,
    #[serde(default)]
    pub entities: Entities,
    pub pos: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit: Option<PreviewEdit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionErrorCode {
    NotFound,
    NoPermission,
    InvalidToken,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventBody {
    #[serde(rename_all = "camelCase")]
    NewMessage {
        channel_id: ChannelId,
        message: Box<Message>,
        #[serde(default)]
        preview_id: Option<PreviewId>,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        message_id: MessageId,
        channel_id: ChannelId,
        pos: f64,
    },
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        channel_id: ChannelId,
        message: Box<Message>,
        old_pos: f64,
    },
    #[serde(rename_all = "camelCase")]
    MessagePreview {
        channel_id: ChannelId,
        preview: Box<Preview>,
    },
    #[serde(rename_all = "camelCase")]
    ChannelDeleted { channel_id: ChannelId },
    #[serde(rename_all = "camelCase")]
    ChannelEdited {
        channel_id: ChannelId,
        channel: ChannelSummary,
    },
    #[serde(rename_all = "camelCase")]
    Members {
        channel_id: ChannelId,
        members: Vec<ChannelMember>,
    },
    Initialized,
    #[serde(rename_all = "camelCase")]
    SpaceUpdated {
        space_with_related: Box<SpaceWithRelated>,
    },
    Error {
        code: ConnectionErrorCode,
        #[serde(default)]
        reason: String,
    },
    AppUpdated {
        version: String,
    },
    #[serde(other)]
    Unknown,
}

impl EventBody {
    pub fn channel_id(&self) -> Option<ChannelId> {
        use EventBody::*;
        match self {
            NewMessage { channel_id, .. }
            | MessageDeleted { channel_id, .. }
            | MessageEdited { channel_id, .. }
            | MessagePreview { channel_id, .. }
            | ChannelDeleted { channel_id }
            | ChannelEdited { channel_id, .. }
            | Members { channel_id, .. } => Some(*channel_id),
            Initialized | SpaceUpdated { .. } | Error { .. } | AppUpdated { .. } | Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    pub mailbox: SpaceId,
    pub id: EventId,
    pub body: EventBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub message_id: Option<MessageId>,
    pub preview_id: Option<PreviewId>,
    pub channel_id: ChannelId,
    pub name: String,
    pub text: String,
    pub entities: Entities,
    pub in_game: bool,
    pub is_action: bool,
    pub media_id: Option<MediaId>,
    #[serde(default)]
    pub pos: Option<(i32, i32)>,
    pub whisper_to_users: Option<Vec<UserId>>,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    pub message_id: MessageId,
    pub name: String,
    pub text: String,
    pub entities: Entities,
    pub in_game: bool,
    pub is_action: bool,
    pub media_id: Option<MediaId>,
    #[serde(default)]
    pub color: String,
}

/// Moves a message into the open interval between two rational keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveMessageBetween {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub expect_pos: (i32, i32),
    pub range: (Option<(i32, i32)>, Option<(i32, i32)>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesByChannel {
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<f64>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub url: String,
    pub media_id: MediaId,
}
