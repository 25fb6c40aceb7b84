//! Per-channel message list, live previews and optimistic overlays.
//!
//! The confirmed list is a window of the channel's history, sorted by
//! position. It always ends at the newest message and grows backwards as
//! history pages arrive. Any inconsistency found while applying an event
//! clears the window so it is refetched instead of shown wrong.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{ChannelId, MessageId, PreviewId, UserId},
    protocol::{EditMessage, Message, NewMessage, Preview},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    compose::{ComposeAction, ComposeState},
    item::{
        millis_to_datetime, ChatItem, FailKind, FailTo, MessageItem, OptimisticEntry, OverlayKind,
        PreviewItem,
    },
    pos::{binary_search_pos, Positioned, Rational},
};

/// Message count past which trimming of old messages is scheduled.
pub const GC_TRIGGER_LENGTH: usize = 128;
/// Index of the message whose position becomes the initial trim bound.
pub const GC_LOWER_INDEX: usize = 64;
pub const GC_INITIAL_COUNTDOWN: u32 = 8;
/// Trimming fewer messages than this is not worth it.
pub const MIN_START_GC_COUNT: usize = 4;
/// How many of the newest messages are checked for order after each event.
pub const ORDER_CHECK_COUNT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledGc {
    pub countdown: u32,
    /// Messages strictly below this position, minus one, may be dropped.
    pub lower_pos: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub id: ChannelId,
    /// No history exists before the first loaded message.
    pub full_loaded: bool,
    pub messages: Vec<MessageItem>,
    /// Latest preview per sender.
    pub preview_map: HashMap<UserId, PreviewItem>,
    pub overlays: HashMap<Uuid, OptimisticEntry>,
    pub scheduled_gc: Option<ScheduledGc>,
    /// Live previews whose proposed slot is already taken by a message.
    pub collided_previews: HashSet<PreviewId>,
    /// Which confirmed message each sent preview turned into, kept while the
    /// send overlay for that preview is still around.
    pub confirmed_previews: HashMap<PreviewId, MessageId>,
}

impl ChannelState {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Locates a message, trying the position hint before a linear scan.
    pub fn find_message(&self, id: MessageId, pos_hint: Option<f64>) -> Option<usize> {
        if let Some(pos) = pos_hint {
            if let (index, Some(item)) = binary_search_pos(&self.messages, pos) {
                if item.id() == id {
                    return Some(index);
                }
            }
        }
        self.messages.iter().rposition(|item| item.id() == id)
    }

    pub fn message(&self, id: MessageId) -> Option<&MessageItem> {
        self.find_message(id, None).map(|index| &self.messages[index])
    }

    /// The confirmed message an overlay stands in for, if it is loaded.
    pub fn counterpart(&self, entry: &OptimisticEntry) -> Option<&MessageItem> {
        let id = match entry.kind {
            OverlayKind::Send => self
                .confirmed_previews
                .get(&PreviewId(entry.ref_id))
                .copied()
                .unwrap_or(MessageId(entry.ref_id)),
            OverlayKind::Edit | OverlayKind::Move => MessageId(entry.ref_id),
        };
        self.message(id)
    }

    /// Moves a draft off `preview_id` when the server reported its slot taken.
    pub fn collision_for(&self, preview_id: PreviewId) -> Option<ComposeAction> {
        self.collided_previews
            .contains(&preview_id)
            .then_some(ComposeAction::Collided { preview_id })
    }

    pub fn top_pos(&self) -> Option<f64> {
        self.messages.first().map(Positioned::pos)
    }

    fn reset_messages(&mut self) {
        self.messages.clear();
        self.collided_previews.clear();
        self.full_loaded = false;
        self.scheduled_gc = None;
    }
}

/// Channel-scoped inputs to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAction {
    ReceiveMessage {
        message: Box<Message>,
        preview_id: Option<PreviewId>,
    },
    MessageEdited {
        message: Box<Message>,
        old_pos: f64,
    },
    MessageDeleted {
        message_id: MessageId,
        pos: f64,
    },
    MessagePreview {
        preview: Box<Preview>,
        timestamp: i64,
    },
    /// A history page, newest first.
    MessagesLoaded {
        messages: Vec<Message>,
        limit: u32,
    },
    MessageSending {
        draft: Box<NewMessage>,
        sender_id: UserId,
        is_master: bool,
        send_time: i64,
        local_media: Option<String>,
        compose: Option<Box<ComposeState>>,
    },
    MessageEditing {
        edit: Box<EditMessage>,
        send_time: i64,
        local_media: Option<String>,
        compose: Option<Box<ComposeState>>,
    },
    /// The server answered a mutation keyed by `key` with `message`.
    MessageSent {
        key: Uuid,
        message: Box<Message>,
        edit: bool,
    },
    SetOptimistic(Box<OptimisticEntry>),
    RemoveOptimistic { key: Uuid },
    Fail { key: Uuid, fail_to: FailTo },
    ResetGc { pos: f64 },
}

impl ChannelAction {
    fn touches_order(&self) -> bool {
        !matches!(
            self,
            ChannelAction::MessagePreview { .. }
                | ChannelAction::SetOptimistic(_)
                | ChannelAction::RemoveOptimistic { .. }
                | ChannelAction::ResetGc { .. }
        )
    }
}

pub fn channel_reducer(state: &mut ChannelState, action: ChannelAction) {
    let touches_order = action.touches_order();
    let is_reset_gc = matches!(action, ChannelAction::ResetGc { .. });
    match action {
        ChannelAction::ReceiveMessage { message, preview_id } => {
            handle_new_message(state, *message, preview_id)
        }
        ChannelAction::MessageEdited { message, old_pos } => {
            handle_message_edited(state, *message, old_pos)
        }
        ChannelAction::MessageDeleted { message_id, pos } => {
            handle_message_deleted(state, message_id, pos)
        }
        ChannelAction::MessagePreview { preview, timestamp } => {
            handle_preview(state, *preview, timestamp)
        }
        ChannelAction::MessagesLoaded { messages, limit } => {
            handle_messages_loaded(state, messages, limit)
        }
        ChannelAction::MessageSending {
            draft,
            sender_id,
            is_master,
            send_time,
            local_media,
            compose,
        } => handle_message_sending(
            state,
            *draft,
            sender_id,
            is_master,
            send_time,
            local_media,
            compose.map(|compose| *compose),
        ),
        ChannelAction::MessageEditing {
            edit,
            send_time,
            local_media,
            compose,
        } => handle_message_editing(
            state,
            *edit,
            send_time,
            local_media,
            compose.map(|compose| *compose),
        ),
        ChannelAction::MessageSent { key, message, edit } => {
            state.overlays.remove(&key);
            if edit {
                let old_pos = state.message(message.id).map_or(message.pos, Positioned::pos);
                handle_message_edited(state, *message, old_pos);
            } else {
                handle_new_message(state, *message, Some(PreviewId(key)));
            }
        }
        ChannelAction::SetOptimistic(entry) => {
            state.overlays.insert(entry.ref_id, *entry);
        }
        ChannelAction::RemoveOptimistic { key } => {
            state.overlays.remove(&key);
        }
        ChannelAction::Fail { key, fail_to } => handle_fail(state, key, fail_to),
        ChannelAction::ResetGc { pos } => handle_reset_gc(state, pos),
    }

    if touches_order {
        check_order(state);
    }
    let overlays = &state.overlays;
    state
        .confirmed_previews
        .retain(|preview_id, _| overlays.contains_key(&preview_id.0));
    if !is_reset_gc {
        tick_gc(state);
    }
}

fn is_superseded(entry: &OptimisticEntry, confirmed_modified_ms: i64) -> bool {
    confirmed_modified_ms >= entry.timestamp
}

fn handle_new_message(state: &mut ChannelState, message: Message, preview_id: Option<PreviewId>) {
    let item = MessageItem::confirmed(message);
    let modified = item.modified_ms();

    if let Some(preview_id) = preview_id {
        state
            .preview_map
            .retain(|_, preview| preview.id() != preview_id);
        state.collided_previews.remove(&preview_id);
        state.confirmed_previews.insert(preview_id, item.id());
        if state
            .overlays
            .get(&preview_id.0)
            .is_some_and(|entry| is_superseded(entry, modified))
        {
            state.overlays.remove(&preview_id.0);
        }
    }
    if state
        .overlays
        .get(&item.id().0)
        .is_some_and(|entry| is_superseded(entry, modified))
    {
        state.overlays.remove(&item.id().0);
    }

    place_message(state, item);
}

/// Inserts a confirmed message at its position in the loaded window.
fn place_message(state: &mut ChannelState, item: MessageItem) {
    let (Some(top), Some(bottom)) = (state.messages.first(), state.messages.last()) else {
        if state.full_loaded {
            state.messages.push(item);
        }
        return;
    };
    let pos = item.pos();
    if pos < top.pos() {
        if state.full_loaded {
            state.messages.insert(0, item);
        }
        return;
    }
    if pos > bottom.pos() {
        state.messages.push(item);
        return;
    }
    match binary_search_pos(&state.messages, pos) {
        (_, Some(existing)) => {
            if existing.id() == item.id() && existing.modified_ms() == item.modified_ms() {
                debug!(message_id = %item.id(), "channel: duplicate message ignored");
                return;
            }
            warn!(
                channel_id = %state.id,
                message_id = %item.id(),
                occupied_by = %existing.id(),
                pos,
                "channel: position collision, resetting message window"
            );
            state.reset_messages();
        }
        (index, None) => state.messages.insert(index, item),
    }
}

fn handle_message_edited(state: &mut ChannelState, message: Message, old_pos: f64) {
    let item = MessageItem::confirmed(message);
    let modified = item.modified_ms();

    // Edit previews started before this version are stale now.
    let message_id = item.id();
    let modified_at = item.message.modified;
    state.preview_map.retain(|_, preview| match preview.preview.edit {
        Some(edit) => MessageId::from(preview.id()) != message_id || edit.time >= modified_at,
        None => true,
    });

    if let Some(entry) = state.overlays.get(&item.id().0) {
        if entry.kind == OverlayKind::Move || is_superseded(entry, modified) {
            state.overlays.remove(&item.id().0);
        }
    }

    let Some(original_top) = state.top_pos() else {
        return;
    };

    if old_pos >= original_top {
        if let Some(index) = state.find_message(item.id(), Some(old_pos)) {
            let existing = &state.messages[index];
            if existing.modified_ms() > modified {
                debug!(message_id = %item.id(), "channel: stale edit ignored");
                return;
            }
            if existing.pos() == item.pos() {
                if existing.message == item.message {
                    return;
                }
                state.messages[index] = item;
                return;
            }
            state.messages.remove(index);
        }
    }

    if state.messages.is_empty() {
        let moved_out = item.pos() < original_top && !state.full_loaded;
        if !moved_out {
            state.messages.push(item);
        }
        return;
    }
    place_message(state, item);
}

fn handle_message_deleted(state: &mut ChannelState, message_id: MessageId, pos: f64) {
    state.overlays.remove(&message_id.0);
    if let Some(index) = state.find_message(message_id, Some(pos)) {
        state.messages.remove(index);
    }
}

fn handle_preview(state: &mut ChannelState, preview: Preview, timestamp: i64) {
    let sender_id = preview.sender_id;
    let item = if let Some(edit) = preview.edit {
        let Some(index) = state.find_message(MessageId::from(preview.id), Some(preview.pos)) else {
            return;
        };
        let message = &state.messages[index];
        if message.message.modified != edit.time || message.message.sender_id != sender_id {
            debug!(preview_id = %preview.id, "channel: stale edit preview ignored");
            return;
        }
        PreviewItem {
            key: message.key(),
            pos: message.pos(),
            preview,
            timestamp,
            optimistic: false,
        }
    } else {
        let pos = preview.pos.ceil();
        let Some(slot) = integer_slot(pos) else {
            warn!(preview_id = %preview.id, pos = preview.pos, "channel: preview position out of range");
            return;
        };
        if let (_, Some(_)) = binary_search_pos(&state.messages, pos) {
            state.collided_previews.insert(preview.id);
        }
        PreviewItem {
            key: Rational::integer(slot),
            pos,
            preview,
            timestamp,
            optimistic: false,
        }
    };
    state.preview_map.insert(sender_id, item);
    let previews = &state.preview_map;
    state
        .collided_previews
        .retain(|id| previews.values().any(|preview| preview.id() == *id));
}

/// A whole, finite position that fits a key numerator.
fn integer_slot(pos: f64) -> Option<i32> {
    let in_range = pos.is_finite() && pos >= f64::from(i32::MIN) && pos <= f64::from(i32::MAX);
    (in_range && pos.fract() == 0.0).then_some(pos as i32)
}

fn handle_messages_loaded(state: &mut ChannelState, messages: Vec<Message>, limit: u32) {
    if state.full_loaded {
        return;
    }
    state.full_loaded = (messages.len() as u64) < u64::from(limit);
    if messages.is_empty() {
        return;
    }
    let mut page: Vec<MessageItem> = messages
        .into_iter()
        .rev()
        .map(MessageItem::confirmed)
        .collect();
    page.sort_by(|a, b| a.pos().total_cmp(&b.pos()));
    if let Some(top) = state.top_pos() {
        page.retain(|item| item.pos() < top);
    }
    page.dedup_by(|a, b| a.pos() == b.pos());
    state.messages.splice(0..0, page);
}

fn tail_key(state: &ChannelState) -> Rational {
    let floor = state
        .messages
        .last()
        .map_or(0, |last| last.pos().floor() as i32);
    Rational::integer(floor.saturating_add(1))
}

fn handle_message_sending(
    state: &mut ChannelState,
    draft: NewMessage,
    sender_id: UserId,
    is_master: bool,
    send_time: i64,
    local_media: Option<String>,
    compose: Option<ComposeState>,
) {
    let Some(preview_id) = draft.preview_id else {
        return;
    };
    let (key, pos) = match state.preview_map.get(&sender_id) {
        Some(preview) if preview.id() == preview_id => (preview.key, preview.pos),
        _ => {
            let key = tail_key(state);
            (key, key.value())
        }
    };
    let at = millis_to_datetime(send_time);
    let message = Message {
        id: MessageId::from(preview_id),
        sender_id,
        channel_id: draft.channel_id,
        parent_message_id: None,
        name: draft.name,
        media_id: draft.media_id,
        in_game: draft.in_game,
        is_action: draft.is_action,
        is_master,
        pinned: false,
        tags: Vec::new(),
        folded: false,
        text: draft.text,
        whisper_to_users: draft.whisper_to_users,
        entities: draft.entities,
        created: at,
        modified: at,
        pos_p: key.p,
        pos_q: key.q,
        pos,
        color: draft.color,
    };
    state.overlays.insert(
        preview_id.0,
        OptimisticEntry {
            kind: OverlayKind::Send,
            ref_id: preview_id.0,
            item: ChatItem::Message(MessageItem {
                message,
                optimistic: true,
                fail_to: None,
                local_media,
            }),
            optimistic_pos: pos,
            timestamp: send_time,
            compose,
        },
    );
}

fn handle_message_editing(
    state: &mut ChannelState,
    edit: EditMessage,
    send_time: i64,
    local_media: Option<String>,
    compose: Option<ComposeState>,
) {
    let Some(current) = state.message(edit.message_id) else {
        debug!(message_id = %edit.message_id, "channel: editing a message outside the window");
        return;
    };
    let mut message = current.message.clone();
    message.name = edit.name;
    message.text = edit.text;
    message.entities = edit.entities;
    message.in_game = edit.in_game;
    message.is_action = edit.is_action;
    message.media_id = edit.media_id;
    message.color = edit.color;
    message.modified = millis_to_datetime(send_time);
    let pos = message.pos;
    state.overlays.insert(
        edit.message_id.0,
        OptimisticEntry {
            kind: OverlayKind::Edit,
            ref_id: edit.message_id.0,
            item: ChatItem::Message(MessageItem {
                message,
                optimistic: true,
                fail_to: None,
                local_media,
            }),
            optimistic_pos: pos,
            timestamp: send_time,
            compose,
        },
    );
}

fn handle_fail(state: &mut ChannelState, key: Uuid, fail_to: FailTo) {
    if matches!(fail_to.kind, FailKind::Send | FailKind::Edit) {
        if let Some(entry) = state.overlays.get_mut(&key) {
            if let ChatItem::Message(item) = &mut entry.item {
                item.fail_to = Some(fail_to);
                return;
            }
        }
    }
    state.overlays.remove(&key);
    if let Some(index) = state.find_message(MessageId(key), None) {
        state.messages[index].fail_to = Some(fail_to);
    } else {
        warn!(channel_id = %state.id, %key, kind = ?fail_to.kind, "channel: failed mutation has no item to mark");
    }
}

fn handle_reset_gc(state: &mut ChannelState, pos: f64) {
    if let Some(gc) = &mut state.scheduled_gc {
        if pos < gc.lower_pos {
            gc.countdown = GC_INITIAL_COUNTDOWN;
            gc.lower_pos = pos;
        }
    }
}

fn check_order(state: &mut ChannelState) {
    let start = state.messages.len().saturating_sub(ORDER_CHECK_COUNT);
    let sorted = state.messages[start..]
        .windows(2)
        .all(|pair| pair[0].pos() < pair[1].pos());
    if !sorted {
        warn!(channel_id = %state.id, "channel: messages out of order, resetting message window");
        state.reset_messages();
    }
}

fn tick_gc(state: &mut ChannelState) {
    let Some(gc) = state.scheduled_gc else {
        if state.messages.len() > GC_TRIGGER_LENGTH {
            state.scheduled_gc = Some(ScheduledGc {
                countdown: GC_INITIAL_COUNTDOWN,
                lower_pos: state.messages[GC_LOWER_INDEX].pos(),
            });
        }
        return;
    };
    if gc.countdown > 0 {
        state.scheduled_gc = Some(ScheduledGc {
            countdown: gc.countdown - 1,
            ..gc
        });
        return;
    }
    state.scheduled_gc = None;
    let Some(first_kept) = state
        .messages
        .iter()
        .position(|item| item.pos() >= gc.lower_pos)
    else {
        return;
    };
    let drop_count = first_kept.saturating_sub(1);
    if drop_count <= MIN_START_GC_COUNT {
        return;
    }
    debug!(channel_id = %state.id, drop_count, "channel: trimming old messages");
    state.messages.drain(..drop_count);
    state.full_loaded = false;
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
