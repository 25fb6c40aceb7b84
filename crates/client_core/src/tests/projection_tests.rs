use shared::protocol::Message;

use super::*;
use crate::{
    channel::channel_reducer,
    config::ClientSettings,
    item::{millis_to_datetime, MessageItem},
};

fn message(channel_id: ChannelId, pos: i32, in_game: bool) -> Message {
    Message {
        id: MessageId::new(),
        sender_id: UserId::new(),
        channel_id,
        parent_message_id: None,
        name: "Alice".to_string(),
        media_id: None,
        in_game,
        is_action: false,
        is_master: false,
        pinned: false,
        tags: Vec::new(),
        folded: false,
        text: format!("at {pos}"),
        whisper_to_users: None,
        entities: Vec::new(),
        created: millis_to_datetime(1_000),
        modified: millis_to_datetime(1_000),
        pos_p: pos,
        pos_q: 1,
        pos: f64::from(pos),
        color: String::new(),
    }
}

fn channel_with(messages: Vec<Message>) -> ChannelState {
    let mut channel = ChannelState::new(ChannelId::new());
    channel.full_loaded = true;
    channel.messages = messages.into_iter().map(MessageItem::confirmed).collect();
    channel
}

fn remote_preview(channel: &mut ChannelState, sender_id: UserId, pos: f64, text: &str) -> PreviewId {
    let preview = Preview {
        id: PreviewId::new(),
        sender_id,
        channel_id: channel.id,
        parent_message_id: None,
        name: "Bob".to_string(),
        media_id: None,
        in_game: false,
        is_action: false,
        is_master: false,
        clear: false,
        text: Some(text.to_string()),
        whisper_to_users: None,
        entities: Vec::new(),
        pos,
        edit: None,
    };
    let id = preview.id;
    channel_reducer(
        channel,
        ChannelAction::MessagePreview {
            preview: Box::new(preview),
            timestamp: 10,
        },
    );
    id
}

fn keys(items: &[ChatItem]) -> Vec<Uuid> {
    items.iter().map(ChatItem::key).collect()
}

#[test]
fn move_overlay_shows_the_item_at_its_optimistic_slot() {
    let mut channel = channel_with(vec![
        message(ChannelId::new(), 1, false),
        message(ChannelId::new(), 2, false),
        message(ChannelId::new(), 3, false),
    ]);
    let [a, b, c] = [0, 1, 2].map(|i| channel.messages[i].id());
    channel.overlays.insert(
        a.0,
        OptimisticEntry {
            kind: OverlayKind::Move,
            ref_id: a.0,
            item: ChatItem::Message(channel.messages[0].clone()),
            optimistic_pos: 2.5,
            timestamp: 5_000,
            compose: None,
        },
    );

    let projection = project(&channel, &ProjectionInput::default());
    assert_eq!(keys(&projection.items), vec![b.0, a.0, c.0]);
    assert_eq!(projection.items[1].pos(), 2.5);
    assert_eq!(projection.filtered_count, 0);
}

#[test]
fn overlay_older_than_its_counterpart_is_hidden() {
    let mut channel = channel_with(vec![message(ChannelId::new(), 1, false)]);
    let confirmed = channel.messages[0].clone();
    let mut stale = confirmed.clone();
    stale.message.text = "stale local edit".to_string();
    channel.overlays.insert(
        confirmed.id().0,
        OptimisticEntry {
            kind: OverlayKind::Edit,
            ref_id: confirmed.id().0,
            item: ChatItem::Message(stale),
            optimistic_pos: 1.0,
            timestamp: 500,
            compose: None,
        },
    );

    let projection = project(&channel, &ProjectionInput::default());
    assert_eq!(projection.items.len(), 1);
    assert_eq!(projection.items[0], ChatItem::Message(confirmed));
}

#[test]
fn filter_and_archive_count_hidden_messages() {
    let mut folded = message(ChannelId::new(), 3, true);
    folded.folded = true;
    let channel = channel_with(vec![
        message(ChannelId::new(), 1, true),
        message(ChannelId::new(), 2, false),
        folded,
    ]);
    let input = ProjectionInput {
        filter: ChannelFilter::InGame,
        ..ProjectionInput::default()
    };
    let projection = project(&channel, &input);
    assert_eq!(projection.items.len(), 1);
    assert_eq!(projection.filtered_count, 2);

    let archived = ProjectionInput {
        filter: ChannelFilter::InGame,
        show_archived: true,
        ..ProjectionInput::default()
    };
    assert_eq!(project(&channel, &archived).items.len(), 2);
}

#[test]
fn own_draft_gets_a_placeholder_at_the_end() {
    let mut channel = channel_with(vec![message(ChannelId::new(), 1, false)]);
    let me = UserId::new();
    let bob = UserId::new();
    remote_preview(&mut channel, bob, 1.5, "");

    let input = ProjectionInput {
        my_id: Some(me),
        compose: ComposeSlice {
            preview_id: PreviewId::new(),
            is_empty: false,
            ..ComposeSlice::default()
        },
        ..ProjectionInput::default()
    };
    let projection = project(&channel, &input);
    assert_eq!(projection.items.len(), 2);
    assert!(projection.items[1].is_dummy_preview());
    assert_eq!(projection.items[1].sender_id(), me);
    assert_eq!(projection.items[1].key(), input.compose.preview_id.0);
    assert!(projection.items[1].pos() > projection.items[0].pos());

    let idle = ProjectionInput {
        compose: ComposeSlice {
            is_empty: true,
            ..input.compose.clone()
        },
        ..input
    };
    assert_eq!(project(&channel, &idle).items.len(), 1);
}

#[test]
fn empty_remote_preview_stays_once_shown() {
    let mut channel = channel_with(vec![message(ChannelId::new(), 1, false)]);
    let bob = UserId::new();
    let preview_id = remote_preview(&mut channel, bob, 1.5, "typing");

    let mut projector = ChatListProjector::default();
    let first = projector.project(&channel, ProjectionInput::default());
    assert_eq!(first.items.len(), 2);

    remote_preview(&mut channel, bob, 1.5, "");
    if let Some(item) = channel.preview_map.get_mut(&bob) {
        item.preview.id = preview_id;
    }
    let second = projector.project(&channel, ProjectionInput::default());
    assert_eq!(second.items.len(), 2);
}

fn edit_preview_for(channel: &mut ChannelState, index: usize, text: &str) -> UserId {
    let target = channel.messages[index].message.clone();
    let preview = Preview {
        id: PreviewId::from(target.id),
        sender_id: target.sender_id,
        channel_id: channel.id,
        parent_message_id: None,
        name: target.name.clone(),
        media_id: None,
        in_game: target.in_game,
        is_action: false,
        is_master: false,
        clear: false,
        text: Some(text.to_string()),
        whisper_to_users: None,
        entities: Vec::new(),
        pos: target.pos,
        edit: Some(PreviewEdit {
            time: target.modified,
            p: target.pos_p,
            q: target.pos_q,
        }),
    };
    channel_reducer(
        channel,
        ChannelAction::MessagePreview {
            preview: Box::new(preview),
            timestamp: 20,
        },
    );
    target.sender_id
}

#[test]
fn edit_preview_takes_its_message_slot() {
    let channel_id = ChannelId::new();
    let mut channel = channel_with(vec![message(channel_id, 1, false), message(channel_id, 2, false)]);
    edit_preview_for(&mut channel, 0, "rewording");

    let items = project(&channel, &ProjectionInput::default()).items;
    assert_eq!(items.len(), 2);
    let preview = items[0].as_preview().expect("edit preview in place");
    assert_eq!(preview.preview.text.as_deref(), Some("rewording"));
    assert_eq!(preview.pos, 1.0);
    assert_eq!(items[1].as_message().map(|item| item.message.text.as_str()), Some("at 2"));
}

#[test]
fn edit_preview_is_dropped_once_the_message_moves_on() {
    let channel_id = ChannelId::new();
    let mut channel = channel_with(vec![message(channel_id, 1, false)]);
    edit_preview_for(&mut channel, 0, "rewording");
    assert_eq!(channel.preview_map.len(), 1);

    // A newer version lands without passing through the reducer.
    channel.messages[0].message.modified = millis_to_datetime(5_000);
    channel.messages[0].message.text = "newer".to_string();
    let items = project(&channel, &ProjectionInput::default()).items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_message().map(|item| item.message.text.as_str()), Some("newer"));

    // Through the reducer the preview is evicted as well.
    let mut edited = channel.messages[0].message.clone();
    edited.modified = millis_to_datetime(6_000);
    edited.text = "newest".to_string();
    channel_reducer(
        &mut channel,
        ChannelAction::MessageEdited {
            message: Box::new(edited),
            old_pos: 1.0,
        },
    );
    assert!(channel.preview_map.is_empty());
    let items = project(&channel, &ProjectionInput::default()).items;
    assert_eq!(items[0].as_message().map(|item| item.message.text.as_str()), Some("newest"));
}

#[test]
fn remote_preview_shows_in_a_channel_with_nothing_loaded() {
    let mut channel = ChannelState::new(ChannelId::new());
    let preview_id = remote_preview(&mut channel, UserId::new(), 1.0, "first!");

    let projection = project(&channel, &ProjectionInput::default());
    assert_eq!(keys(&projection.items), vec![preview_id.0]);
}

#[test]
fn remote_preview_below_a_partial_history_is_hidden() {
    let channel_id = ChannelId::new();
    let mut channel = channel_with((5..=6).map(|pos| message(channel_id, pos, false)).collect());
    channel.full_loaded = false;
    remote_preview(&mut channel, UserId::new(), 2.0, "old slot");
    let shown = remote_preview(&mut channel, UserId::new(), 9.0, "new slot");

    let projection = project(&channel, &ProjectionInput::default());
    assert_eq!(projection.items.len(), 3);
    assert_eq!(projection.items[2].key(), shown.0);
}

#[test]
fn preview_on_an_occupied_slot_goes_right_after() {
    let mut channel = channel_with(vec![
        message(ChannelId::new(), 1, false),
        message(ChannelId::new(), 2, false),
        message(ChannelId::new(), 3, false),
    ]);
    let preview_id = remote_preview(&mut channel, UserId::new(), 1.2, "hi");
    assert!(channel.collided_previews.contains(&preview_id));

    let projection = project(&channel, &ProjectionInput::default());
    let index = projection
        .items
        .iter()
        .position(|item| item.key() == preview_id.0)
        .expect("preview shown");
    assert_eq!(index, 2);
}

#[test]
fn prepending_moves_the_anchor_by_the_number_of_new_items() {
    let channel_id = ChannelId::new();
    let mut channel = channel_with((5..=8).map(|pos| message(channel_id, pos, false)).collect());
    let mut projector = ChatListProjector::default();
    let before = projector.project(&channel, ProjectionInput::default());
    assert_eq!(before.first_item_index, START_INDEX);
    let watched = before.items[2].key();
    let watched_virtual = before.first_item_index + 2;

    let older: Vec<MessageItem> = (2..=4)
        .map(|pos| MessageItem::confirmed(message(channel_id, pos, false)))
        .collect();
    channel.messages.splice(0..0, older);

    let after = projector.project(&channel, ProjectionInput::default());
    assert_eq!(after.first_item_index, START_INDEX - 3);
    let index = after
        .items
        .iter()
        .position(|item| item.key() == watched)
        .expect("still listed");
    assert_eq!(index, 2 + 3);
    assert_eq!(after.first_item_index + index as i64, watched_virtual);
}

#[test]
fn gc_check_pulls_the_bound_below_the_viewport() {
    let mut channel = channel_with(vec![message(ChannelId::new(), 1, false)]);
    assert_eq!(gc_window_check(&channel, 1.0), None);
    channel.scheduled_gc = Some(crate::channel::ScheduledGc {
        countdown: 3,
        lower_pos: 50.0,
    });
    assert_eq!(
        gc_window_check(&channel, 20.0),
        Some(ChannelAction::ResetGc { pos: 20.0 })
    );
    assert_eq!(gc_window_check(&channel, 60.0), None);
}

#[test]
fn preview_timing_helpers() {
    let channel_id = ChannelId::new();
    let mut channel = channel_with(vec![message(channel_id, 1, false)]);
    let bob = UserId::new();
    remote_preview(&mut channel, bob, 2.0, "x");
    let preview = channel.preview_map.get(&bob).expect("preview");
    assert!(is_preview_just_modified(preview, 1_000, Duration::from_millis(1_500)));
    assert!(!is_preview_just_modified(preview, 2_000, Duration::from_millis(1_500)));
    assert!(should_autohide_self_preview(0, 5_000, Duration::from_secs(4)));
    assert!(!should_autohide_self_preview(3_000, 5_000, Duration::from_secs(4)));
}

#[test]
fn cleared_remote_preview_lingers_only_for_the_lock_window() {
    let mut channel = channel_with(vec![message(ChannelId::new(), 1, false)]);
    let bob = UserId::new();
    let preview_id = remote_preview(&mut channel, bob, 1.5, "typing");
    let timing = ClientSettings::default().preview_timing();

    let mut projector = ChatListProjector::default();
    let input = |now_ms| ProjectionInput {
        now_ms,
        timing,
        ..ProjectionInput::default()
    };
    assert_eq!(projector.project(&channel, input(10)).items.len(), 2);

    remote_preview(&mut channel, bob, 1.5, "");
    if let Some(item) = channel.preview_map.get_mut(&bob) {
        item.preview.id = preview_id;
    }
    assert_eq!(projector.project(&channel, input(500)).items.len(), 2);
    assert_eq!(projector.project(&channel, input(1_500)).items.len(), 1);
}

#[test]
fn own_preview_hides_after_the_draft_goes_idle() {
    let mut channel = channel_with(vec![message(ChannelId::new(), 1, false)]);
    let me = UserId::new();
    let timing = PreviewTiming {
        lock: Duration::from_secs(1),
        self_autohide: Duration::from_secs(20),
    };
    let input = |now_ms| ProjectionInput {
        my_id: Some(me),
        compose: ComposeSlice {
            is_empty: false,
            last_activity_ms: Some(1_000),
            ..ComposeSlice::default()
        },
        now_ms,
        timing,
        ..ProjectionInput::default()
    };
    assert_eq!(project(&channel, &input(5_000)).items.len(), 2);
    assert_eq!(project(&channel, &input(21_000)).items.len(), 1);

    let own_id = input(0).compose.preview_id;
    let mine = remote_preview(&mut channel, me, 2.0, "hello");
    if let Some(item) = channel.preview_map.get_mut(&me) {
        item.preview.id = own_id;
    }
    assert_ne!(mine, own_id);
    assert_eq!(project(&channel, &input(5_000)).items.len(), 2);
    assert_eq!(project(&channel, &input(21_000)).items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn closed_channels_are_evicted_on_the_timer() {
    let cache = Arc::new(Mutex::new(ProjectionCache::default()));
    let open = ChannelId::new();
    let closed = ChannelId::new();
    {
        let mut guard = cache.lock().await;
        guard.open_channel(open);
        guard.open_channel(closed);
        guard.projector(open);
        guard.projector(closed);
        guard.close_channel(closed);
    }
    let task = spawn_projection_eviction(Arc::clone(&cache), Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(cache.lock().await.len(), 1);
    task.abort();
}
