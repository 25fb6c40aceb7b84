//! Items that make up a channel's ordered list.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{MessageId, PreviewId, UserId},
    protocol::{Message, Preview},
};
use uuid::Uuid;

use crate::{
    compose::ComposeState,
    pos::{Positioned, Rational},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailKind {
    Send,
    Edit,
    Delete,
    Upload,
    Move,
    Archive,
}

/// Which mutation failed, and whether it died while uploading media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailTo {
    pub kind: FailKind,
    pub on_upload: bool,
}

impl FailTo {
    pub fn new(kind: FailKind) -> Self {
        Self {
            kind,
            on_upload: false,
        }
    }

    pub fn during_upload(kind: FailKind) -> Self {
        Self {
            kind,
            on_upload: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageItem {
    pub message: Message,
    pub optimistic: bool,
    pub fail_to: Option<FailTo>,
    /// Filename of media still held locally by an optimistic item.
    pub local_media: Option<String>,
}

impl MessageItem {
    pub fn confirmed(message: Message) -> Self {
        Self {
            message,
            optimistic: false,
            fail_to: None,
            local_media: None,
        }
    }

    pub fn id(&self) -> MessageId {
        self.message.id
    }

    pub fn key(&self) -> Rational {
        Rational {
            p: self.message.pos_p,
            q: self.message.pos_q,
        }
    }

    pub fn modified_ms(&self) -> i64 {
        self.message.modified.timestamp_millis()
    }
}

impl Positioned for MessageItem {
    fn pos(&self) -> f64 {
        self.message.pos
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewItem {
    pub preview: Preview,
    /// Edit previews take the edited message's key, others the ceiling of the
    /// sender's proposed position.
    pub key: Rational,
    pub pos: f64,
    /// Event timestamp at which the preview last changed.
    pub timestamp: i64,
    /// Local placeholder for the user's own draft, never sent by the server.
    pub optimistic: bool,
}

impl PreviewItem {
    pub fn id(&self) -> PreviewId {
        self.preview.id
    }

    pub fn sender_id(&self) -> UserId {
        self.preview.sender_id
    }

    pub fn is_empty(&self) -> bool {
        self.preview.text.as_deref() == Some("")
    }
}

impl Positioned for PreviewItem {
    fn pos(&self) -> f64 {
        self.pos
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatItem {
    Message(MessageItem),
    Preview(PreviewItem),
}

impl ChatItem {
    pub fn key(&self) -> Uuid {
        match self {
            ChatItem::Message(item) => item.id().0,
            ChatItem::Preview(item) => item.id().0,
        }
    }

    pub fn in_game(&self) -> bool {
        match self {
            ChatItem::Message(item) => item.message.in_game,
            ChatItem::Preview(item) => item.preview.in_game,
        }
    }

    pub fn sender_id(&self) -> UserId {
        match self {
            ChatItem::Message(item) => item.message.sender_id,
            ChatItem::Preview(item) => item.sender_id(),
        }
    }

    pub fn rational(&self) -> Rational {
        match self {
            ChatItem::Message(item) => item.key(),
            ChatItem::Preview(item) => item.key,
        }
    }

    pub fn as_message(&self) -> Option<&MessageItem> {
        match self {
            ChatItem::Message(item) => Some(item),
            ChatItem::Preview(_) => None,
        }
    }

    pub fn as_preview(&self) -> Option<&PreviewItem> {
        match self {
            ChatItem::Preview(item) => Some(item),
            ChatItem::Message(_) => None,
        }
    }

    /// The local stand-in for the user's own draft.
    pub fn is_dummy_preview(&self) -> bool {
        matches!(self, ChatItem::Preview(item) if item.optimistic)
    }

    pub(crate) fn set_pos(&mut self, pos: f64) {
        match self {
            ChatItem::Message(item) => item.message.pos = pos,
            ChatItem::Preview(item) => item.pos = pos,
        }
    }
}

impl Positioned for ChatItem {
    fn pos(&self) -> f64 {
        match self {
            ChatItem::Message(item) => item.pos(),
            ChatItem::Preview(item) => item.pos(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverlayKind {
    Send,
    Edit,
    Move,
}

/// A local, not yet confirmed, view of one item.
///
/// `ref_id` is the preview id for sends and the message id for edits and
/// moves. An overlay is shown only while `timestamp` is newer than the
/// confirmed counterpart's `modified`.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticEntry {
    pub kind: OverlayKind,
    pub ref_id: Uuid,
    pub item: ChatItem,
    pub optimistic_pos: f64,
    pub timestamp: i64,
    /// Draft snapshot so a failed send or edit can be restored into the editor.
    pub compose: Option<ComposeState>,
}

impl OptimisticEntry {
    pub fn fail_to(&self) -> Option<FailTo> {
        match &self.item {
            ChatItem::Message(item) => item.fail_to,
            ChatItem::Preview(_) => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.fail_to().is_none()
    }
}

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
