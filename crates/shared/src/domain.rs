use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(SpaceId);
id_newtype!(ChannelId);
id_newtype!(MessageId);
id_newtype!(PreviewId);
id_newtype!(MediaId);

/// An edit preview reuses the id of the message being edited.
impl From<MessageId> for PreviewId {
    fn from(value: MessageId) -> Self {
        Self(value.0)
    }
}

impl From<PreviewId> for MessageId {
    fn from(value: PreviewId) -> Self {
        Self(value.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelType {
    InGame,
    OutOfGame,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSummary {
    pub id: SpaceId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub space_id: SpaceId,
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_channel_type")]
    pub r#type: ChannelType,
    #[serde(default)]
    pub is_public: bool,
}

fn default_channel_type() -> ChannelType {
    ChannelType::InGame
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMember {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub character_name: String,
    #[serde(default)]
    pub is_master: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceWithRelated {
    pub space: SpaceSummary,
    #[serde(default)]
    pub channels: Vec<ChannelSummary>,
}
