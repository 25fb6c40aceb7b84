use shared::{
    domain::{ChannelType, MessageId, UserId},
    protocol::Message,
};

use super::*;
use crate::item::millis_to_datetime;

fn message(channel_id: ChannelId, pos: i32, created: i64) -> Message {
    Message {
        id: MessageId::new(),
        sender_id: UserId::new(),
        channel_id,
        parent_message_id: None,
        name: "Alice".to_string(),
        media_id: None,
        in_game: false,
        is_action: false,
        is_master: false,
        pinned: false,
        tags: Vec::new(),
        folded: false,
        text: "hi".to_string(),
        whisper_to_users: None,
        entities: Vec::new(),
        created: millis_to_datetime(created),
        modified: millis_to_datetime(created),
        pos_p: pos,
        pos_q: 1,
        pos: f64::from(pos),
        color: String::new(),
    }
}

fn event(mailbox: SpaceId, timestamp: i64, body: EventBody) -> ChatAction {
    ChatAction::EventFromServer(Box::new(ServerEvent {
        mailbox,
        id: EventId::at(timestamp),
        body,
    }))
}

fn new_message(mailbox: SpaceId, timestamp: i64, message: Message) -> ChatAction {
    event(
        mailbox,
        timestamp,
        EventBody::NewMessage {
            channel_id: message.channel_id,
            message: Box::new(message),
            preview_id: None,
        },
    )
}

fn seeded_state() -> (ChatSpaceState, ChannelId) {
    let space_id = SpaceId::new();
    let channel_id = ChannelId::new();
    let mut state = ChatSpaceState::new(space_id);
    chat_reducer(
        &mut state,
        event(
            space_id,
            1,
            EventBody::MessageDeleted {
                message_id: MessageId::new(),
                channel_id,
                pos: 0.0,
            },
        ),
    );
    if let Some(channel) = state.channels.get_mut(&channel_id) {
        channel.full_loaded = true;
    }
    (state, channel_id)
}

#[test]
fn replayed_events_change_nothing() {
    let (mut state, channel_id) = seeded_state();
    let space_id = state.context.space_id;
    let events = vec![
        new_message(space_id, 10, message(channel_id, 1, 10)),
        new_message(space_id, 20, message(channel_id, 2, 20)),
        new_message(space_id, 30, message(channel_id, 3, 30)),
    ];
    for action in events.clone() {
        chat_reducer(&mut state, action);
    }
    let once = state.clone();
    for action in events {
        chat_reducer(&mut state, action);
    }
    assert_eq!(state, once);
    assert_eq!(state.last_event_id, EventId::at(30));
    assert_eq!(state.channel(channel_id).map(|c| c.messages.len()), Some(3));
}

#[test]
fn cursor_never_moves_backwards() {
    let (mut state, channel_id) = seeded_state();
    let space_id = state.context.space_id;
    chat_reducer(&mut state, new_message(space_id, 100, message(channel_id, 1, 100)));
    chat_reducer(&mut state, new_message(space_id, 90, message(channel_id, 2, 90)));
    assert_eq!(state.last_event_id, EventId::at(100));
    assert_eq!(state.channel(channel_id).map(|c| c.messages.len()), Some(1));

    chat_reducer(&mut state, event(space_id, 150, EventBody::Unknown));
    assert_eq!(state.last_event_id, EventId::at(150));
}

#[test]
fn events_for_another_mailbox_are_ignored() {
    let (mut state, channel_id) = seeded_state();
    chat_reducer(
        &mut state,
        new_message(SpaceId::new(), 500, message(channel_id, 1, 500)),
    );
    assert_eq!(state.last_event_id, EventId::at(1));
    assert_eq!(state.channel(channel_id).map(|c| c.messages.len()), Some(0));
}

#[test]
fn notify_timestamp_tracks_newest_message() {
    let (mut state, channel_id) = seeded_state();
    let space_id = state.context.space_id;
    chat_reducer(&mut state, new_message(space_id, 10, message(channel_id, 1, 4_000)));
    chat_reducer(&mut state, new_message(space_id, 11, message(channel_id, 2, 3_000)));
    assert_eq!(state.notify_timestamp, 4_000);
}

#[test]
fn server_error_and_initialized_are_recorded() {
    let (mut state, _) = seeded_state();
    let space_id = state.context.space_id;
    chat_reducer(&mut state, event(space_id, 5, EventBody::Initialized));
    assert!(state.context.initialized);

    chat_reducer(
        &mut state,
        event(
            space_id,
            6,
            EventBody::Error {
                code: ConnectionErrorCode::NoPermission,
                reason: "not a member".to_string(),
            },
        ),
    );
    assert_eq!(state.connection_error, Some(ConnectionErrorCode::NoPermission));
}

#[test]
fn entering_another_space_discards_everything() {
    let (mut state, channel_id) = seeded_state();
    let space_id = state.context.space_id;
    chat_reducer(&mut state, new_message(space_id, 10, message(channel_id, 1, 10)));

    chat_reducer(&mut state, ChatAction::EnterSpace { space_id });
    assert_eq!(state.last_event_id, EventId::at(10));

    let other = SpaceId::new();
    chat_reducer(&mut state, ChatAction::EnterSpace { space_id: other });
    assert_eq!(state, ChatSpaceState::new(other));
}

#[test]
fn space_metadata_follows_events() {
    let (mut state, channel_id) = seeded_state();
    let space_id = state.context.space_id;
    let channel = ChannelSummary {
        id: channel_id,
        space_id,
        name: "tavern".to_string(),
        topic: String::new(),
        r#type: ChannelType::InGame,
        is_public: true,
    };
    chat_reducer(
        &mut state,
        event(
            space_id,
            2,
            EventBody::SpaceUpdated {
                space_with_related: Box::new(SpaceWithRelated {
                    space: SpaceSummary {
                        id: space_id,
                        name: "Campaign".to_string(),
                        description: String::new(),
                    },
                    channels: vec![channel.clone()],
                }),
            },
        ),
    );
    assert_eq!(state.meta.channels.get(&channel_id), Some(&channel));
    assert_eq!(state.meta.space.as_ref().map(|s| s.name.as_str()), Some("Campaign"));

    chat_reducer(&mut state, event(space_id, 3, EventBody::ChannelDeleted { channel_id }));
    assert!(state.meta.channels.is_empty());
    assert!(state.channel(channel_id).is_none());
}
