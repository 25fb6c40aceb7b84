use std::collections::HashMap;

use shared::{
    domain::{ChannelId, ChannelMember, ChannelSummary, SpaceId, SpaceSummary, SpaceWithRelated},
    protocol::{ConnectionErrorCode, EventBody, EventId, ServerEvent},
};
use tracing::{debug, info, warn};

use crate::{
    channel::{channel_reducer, ChannelAction, ChannelState},
    connection::{connection_reducer, ConnectionEvent, ConnectionState, ReconnectPolicy},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatContext {
    pub space_id: SpaceId,
    /// The server finished replaying the backlog for this space.
    pub initialized: bool,
    pub reconnect: ReconnectPolicy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpaceMeta {
    pub space: Option<SpaceSummary>,
    pub channels: HashMap<ChannelId, ChannelSummary>,
    pub members: HashMap<ChannelId, Vec<ChannelMember>>,
}

/// Everything the client knows about the active space.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSpaceState {
    pub connection: ConnectionState,
    pub channels: HashMap<ChannelId, ChannelState>,
    pub context: ChatContext,
    /// Resumption cursor: the newest event applied.
    pub last_event_id: EventId,
    /// `created` of the newest message seen, in milliseconds.
    pub notify_timestamp: i64,
    pub meta: SpaceMeta,
    pub connection_error: Option<ConnectionErrorCode>,
    pub app_version: Option<String>,
}

impl ChatSpaceState {
    pub fn new(space_id: SpaceId) -> Self {
        Self::with_policy(space_id, ReconnectPolicy::default())
    }

    pub fn with_policy(space_id: SpaceId, reconnect: ReconnectPolicy) -> Self {
        Self {
            connection: ConnectionState::default(),
            channels: HashMap::new(),
            context: ChatContext {
                space_id,
                initialized: false,
                reconnect,
            },
            last_event_id: EventId::zero(),
            notify_timestamp: 0,
            meta: SpaceMeta::default(),
            connection_error: None,
            app_version: None,
        }
    }

    pub fn channel(&self, channel_id: ChannelId) -> Option<&ChannelState> {
        self.channels.get(&channel_id)
    }

    /// Drops all per-space state. The session owning a live socket notices
    /// the reset and reconnects.
    fn reset_for(&mut self, space_id: SpaceId) {
        let reconnect = self.context.reconnect.clone();
        *self = Self::with_policy(space_id, reconnect);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatAction {
    EventFromServer(Box<ServerEvent>),
    ResetChatState,
    EnterSpace { space_id: SpaceId },
    SpaceUpdated(Box<SpaceWithRelated>),
    ChannelDeleted { channel_id: ChannelId },
    ChannelEdited { channel_id: ChannelId, channel: ChannelSummary },
    MembersUpdated { channel_id: ChannelId, members: Vec<ChannelMember> },
    Initialized,
    AppUpdated { version: String },
    ConnectionError { code: ConnectionErrorCode, reason: String },
    Connection(ConnectionEvent),
    Channel { channel_id: ChannelId, action: ChannelAction },
}

impl ChatAction {
    pub fn channel(channel_id: ChannelId, action: ChannelAction) -> Self {
        ChatAction::Channel { channel_id, action }
    }
}

/// Maps a decoded server event onto the store action it drives.
pub fn event_to_action(event: ServerEvent) -> Option<ChatAction> {
    let timestamp = event.id.timestamp;
    let action = match event.body {
        EventBody::NewMessage {
            channel_id,
            message,
            preview_id,
        } => ChatAction::channel(
            channel_id,
            ChannelAction::ReceiveMessage {
                message,
                preview_id,
            },
        ),
        EventBody::MessageDeleted {
            message_id,
            channel_id,
            pos,
        } => ChatAction::channel(channel_id, ChannelAction::MessageDeleted { message_id, pos }),
        EventBody::MessageEdited {
            channel_id,
            message,
            old_pos,
        } => ChatAction::channel(channel_id, ChannelAction::MessageEdited { message, old_pos }),
        EventBody::MessagePreview {
            channel_id,
            preview,
        } => ChatAction::channel(
            channel_id,
            ChannelAction::MessagePreview { preview, timestamp },
        ),
        EventBody::ChannelDeleted { channel_id } => ChatAction::ChannelDeleted { channel_id },
        EventBody::ChannelEdited {
            channel_id,
            channel,
        } => ChatAction::ChannelEdited {
            channel_id,
            channel,
        },
        EventBody::Members {
            channel_id,
            members,
        } => ChatAction::MembersUpdated {
            channel_id,
            members,
        },
        EventBody::Initialized => ChatAction::Initialized,
        EventBody::SpaceUpdated { space_with_related } => {
            ChatAction::SpaceUpdated(space_with_related)
        }
        EventBody::Error { code, reason } => ChatAction::ConnectionError { code, reason },
        EventBody::AppUpdated { version } => ChatAction::AppUpdated { version },
        EventBody::Unknown => return None,
    };
    Some(action)
}

pub fn chat_reducer(state: &mut ChatSpaceState, action: ChatAction) {
    match action {
        ChatAction::EventFromServer(event) => handle_event_from_server(state, *event),
        ChatAction::ResetChatState => {
            info!(space_id = %state.context.space_id, "chat: resetting space state");
            state.reset_for(state.context.space_id);
        }
        ChatAction::EnterSpace { space_id } => {
            if space_id != state.context.space_id {
                info!(%space_id, "chat: entering space");
                state.reset_for(space_id);
            }
        }
        ChatAction::SpaceUpdated(related) => {
            if related.space.id != state.context.space_id {
                state.reset_for(related.space.id);
            }
            let SpaceWithRelated { space, channels } = *related;
            for channel in &channels {
                state
                    .channels
                    .entry(channel.id)
                    .or_insert_with(|| ChannelState::new(channel.id));
            }
            state.meta.space = Some(space);
            state.meta.channels = channels
                .into_iter()
                .map(|channel| (channel.id, channel))
                .collect();
        }
        ChatAction::ChannelDeleted { channel_id } => {
            state.channels.remove(&channel_id);
            state.meta.channels.remove(&channel_id);
            state.meta.members.remove(&channel_id);
        }
        ChatAction::ChannelEdited {
            channel_id,
            channel,
        } => {
            state.meta.channels.insert(channel_id, channel);
        }
        ChatAction::MembersUpdated {
            channel_id,
            members,
        } => {
            state.meta.members.insert(channel_id, members);
        }
        ChatAction::Initialized => state.context.initialized = true,
        ChatAction::AppUpdated { version } => state.app_version = Some(version),
        ChatAction::ConnectionError { code, reason } => {
            warn!(space_id = %state.context.space_id, ?code, %reason, "chat: server reported a connection error");
            state.connection_error = Some(code);
        }
        ChatAction::Connection(event) => {
            state.connection = connection_reducer(
                &state.connection,
                &event,
                state.context.space_id,
                &state.context.reconnect,
            );
        }
        ChatAction::Channel { channel_id, action } => {
            match &action {
                ChannelAction::ReceiveMessage { message, .. } => {
                    state.notify_timestamp = state
                        .notify_timestamp
                        .max(message.created.timestamp_millis());
                }
                // History fetched before the backlog replay would race it.
                ChannelAction::MessagesLoaded { .. } if !state.context.initialized => {
                    debug!(%channel_id, "chat: history page before initialization ignored");
                    return;
                }
                _ => {}
            }
            let channel = state
                .channels
                .entry(channel_id)
                .or_insert_with(|| ChannelState::new(channel_id));
            channel_reducer(channel, action);
        }
    }
}

fn handle_event_from_server(state: &mut ChatSpaceState, event: ServerEvent) {
    if event.mailbox != state.context.space_id {
        debug!(mailbox = %event.mailbox, "chat: event for another mailbox ignored");
        return;
    }
    if event.id <= state.last_event_id {
        debug!(timestamp = event.id.timestamp, seq = event.id.seq, "chat: duplicate event ignored");
        return;
    }
    let id = event.id;
    if let Some(action) = event_to_action(event) {
        chat_reducer(state, action);
    }
    state.last_event_id = id;
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
