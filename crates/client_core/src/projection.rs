//! Builds the list a chat view renders for one channel.
//!
//! Confirmed messages, live previews and optimistic overlays are merged into a
//! single position-sorted sequence. The view scrolls a virtualised list whose
//! indices come from an anchor that moves down as history is prepended, so
//! prepending never shifts what is on screen.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use shared::{
    domain::{ChannelId, MessageId, PreviewId, UserId},
    protocol::{Preview, PreviewEdit},
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    channel::{ChannelAction, ChannelState},
    item::{ChatItem, OptimisticEntry, OverlayKind, PreviewItem},
    pos::{binary_search_pos, Positioned, Rational},
    store::ChatStore,
};

/// Virtual index of the first item before any history is prepended.
pub const START_INDEX: i64 = 100_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelFilter {
    #[default]
    All,
    InGame,
    OutOfGame,
}

impl ChannelFilter {
    pub fn accepts(&self, in_game: bool) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::InGame => in_game,
            ChannelFilter::OutOfGame => !in_game,
        }
    }
}

/// The parts of the local draft the list needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeSlice {
    pub preview_id: PreviewId,
    pub prev_preview_id: Option<PreviewId>,
    pub is_empty: bool,
    pub in_game: bool,
    pub name: String,
    pub edit: Option<PreviewEdit>,
    /// When the user last touched the draft.
    pub last_activity_ms: Option<i64>,
}

/// How long previews linger on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewTiming {
    /// A cleared remote preview stays this long before it disappears.
    pub lock: Duration,
    /// My own preview hides after this long without typing.
    pub self_autohide: Duration,
}

impl Default for PreviewTiming {
    fn default() -> Self {
        Self {
            lock: Duration::from_secs(1),
            self_autohide: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionInput {
    pub my_id: Option<UserId>,
    pub compose: ComposeSlice,
    pub filter: ChannelFilter,
    pub show_archived: bool,
    /// Previews rendered by the previous projection.
    pub visible_previews: HashSet<PreviewId>,
    pub now_ms: i64,
    pub timing: PreviewTiming,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub items: Vec<ChatItem>,
    /// Confirmed messages hidden by the filter or the archive toggle.
    pub filtered_count: usize,
}

pub fn project(channel: &ChannelState, input: &ProjectionInput) -> Projection {
    let mut filtered_count = 0;

    // Overlays that stand in front of a loaded confirmed message.
    let mut shadowed: HashSet<MessageId> = HashSet::new();
    let mut pending: Vec<&OptimisticEntry> = Vec::new();
    for entry in channel.overlays.values() {
        match channel.counterpart(entry) {
            Some(confirmed) if confirmed.modified_ms() >= entry.timestamp => {}
            Some(confirmed) => {
                shadowed.insert(confirmed.id());
                pending.push(entry);
            }
            // Edits and moves of messages outside the window have nowhere to go.
            None if entry.kind != OverlayKind::Send => {}
            None => pending.push(entry),
        }
    }

    let mut items: Vec<ChatItem> = Vec::with_capacity(channel.messages.len() + 8);
    for item in &channel.messages {
        if item.message.folded && !input.show_archived {
            filtered_count += 1;
            continue;
        }
        if !input.filter.accepts(item.message.in_game) {
            filtered_count += 1;
            continue;
        }
        if shadowed.contains(&item.id()) {
            continue;
        }
        items.push(ChatItem::Message(item.clone()));
    }

    let mut tail: Vec<ChatItem> = Vec::new();
    let top_pos = channel.top_pos();
    for preview in collect_previews(channel, input) {
        if channel.overlays.contains_key(&preview.id().0) {
            continue;
        }
        if !input.filter.accepts(preview.preview.in_game) {
            continue;
        }
        let mine = input.my_id == Some(preview.sender_id());
        if !mine {
            if Some(preview.id()) == input.compose.prev_preview_id {
                continue;
            }
            if preview.is_empty()
                && !(input.visible_previews.contains(&preview.id())
                    && is_preview_just_modified(&preview, input.now_ms, input.timing.lock))
            {
                continue;
            }
        }
        if let Some(edit) = preview.preview.edit {
            let message_id = MessageId::from(preview.id());
            let Some(current) = channel.message(message_id) else {
                continue;
            };
            // The message changed after the edit started.
            if current.message.modified != edit.time {
                debug!(preview_id = %preview.id(), "projection: stale edit preview skipped");
                continue;
            }
            if let Some(slot) = items
                .iter()
                .position(|item| matches!(item, ChatItem::Message(m) if m.id() == message_id))
            {
                let mut preview = preview;
                preview.pos = items[slot].pos();
                preview.key = items[slot].rational();
                items[slot] = ChatItem::Preview(preview);
                continue;
            }
        }
        if preview.optimistic || (mine && preview.is_empty()) {
            tail.push(ChatItem::Preview(preview));
            continue;
        }
        // Below the loaded window; nothing loaded yet means no lower bound.
        if !channel.full_loaded && top_pos.is_some_and(|top| preview.pos <= top) {
            continue;
        }
        insert_after_collisions(&mut items, ChatItem::Preview(preview));
    }

    pending.sort_by(|a, b| a.optimistic_pos.total_cmp(&b.optimistic_pos));
    for entry in pending {
        if !input.filter.accepts(entry.item.in_game()) {
            continue;
        }
        let mut item = entry.item.clone();
        item.set_pos(entry.optimistic_pos);
        insert_after_collisions(&mut items, item);
    }

    let last_pos = items.last().map_or(0.0, Positioned::pos);
    for (offset, mut item) in tail.into_iter().enumerate() {
        item.set_pos(last_pos.floor() + 1.0 + offset as f64);
        items.push(item);
    }

    Projection {
        items,
        filtered_count,
    }
}

/// Inserts by position; an item landing on an occupied slot goes right after it.
fn insert_after_collisions(items: &mut Vec<ChatItem>, item: ChatItem) {
    let pos = item.pos();
    let index = match binary_search_pos(items, pos) {
        (index, Some(_)) => {
            let mut index = index + 1;
            while items.get(index).is_some_and(|next| next.pos() == pos) {
                index += 1;
            }
            index
        }
        (index, None) => index,
    };
    items.insert(index, item);
}

fn collect_previews(channel: &ChannelState, input: &ProjectionInput) -> Vec<PreviewItem> {
    let mut previews: Vec<PreviewItem> = Vec::with_capacity(channel.preview_map.len() + 1);
    let mut own_shown = false;
    let own_hidden = input.compose.last_activity_ms.is_some_and(|at| {
        should_autohide_self_preview(at, input.now_ms, input.timing.self_autohide)
    });
    for preview in channel.preview_map.values() {
        if Some(preview.sender_id()) == input.my_id {
            // A preview of an older draft of mine is stale.
            if own_hidden || preview.id() != input.compose.preview_id {
                continue;
            }
            own_shown = true;
        }
        previews.push(preview.clone());
    }
    if let Some(my_id) = input.my_id {
        if !own_shown && !own_hidden && !input.compose.is_empty {
            previews.push(dummy_preview(channel, my_id, &input.compose));
        }
    }
    previews.sort_by(|a, b| {
        a.pos
            .total_cmp(&b.pos)
            .then_with(|| a.sender_id().cmp(&b.sender_id()))
    });
    previews
}

fn dummy_preview(channel: &ChannelState, my_id: UserId, compose: &ComposeSlice) -> PreviewItem {
    PreviewItem {
        preview: Preview {
            id: compose.preview_id,
            sender_id: my_id,
            channel_id: channel.id,
            parent_message_id: None,
            name: compose.name.clone(),
            media_id: None,
            in_game: compose.in_game,
            is_action: false,
            is_master: false,
            clear: false,
            text: None,
            whisper_to_users: None,
            entities: Vec::new(),
            pos: 0.0,
            edit: compose.edit,
        },
        key: Rational::integer(0),
        pos: 0.0,
        timestamp: 0,
        optimistic: true,
    }
}

/// Keeps virtual list indices stable while older items are prepended.
#[derive(Debug, Clone)]
pub struct AnchorTracker {
    first_item_index: i64,
    prev_first: Option<Uuid>,
    prev_len: usize,
}

impl Default for AnchorTracker {
    fn default() -> Self {
        Self {
            first_item_index: START_INDEX,
            prev_first: None,
            prev_len: 0,
        }
    }
}

impl AnchorTracker {
    pub fn first_item_index(&self) -> i64 {
        self.first_item_index
    }

    /// Updates the anchor for a new projection and returns it.
    pub fn update(&mut self, items: &[ChatItem]) -> i64 {
        if let (Some(prev_first), Some(first)) = (self.prev_first, items.first()) {
            if self.prev_len > 0 && items.len() > self.prev_len && first.key() != prev_first {
                let shift = match items.iter().position(|item| item.key() == prev_first) {
                    Some(index) => index,
                    None => {
                        warn!("projection: previous first item vanished, estimating anchor");
                        items.len() - self.prev_len
                    }
                };
                self.first_item_index -= shift as i64;
            }
        }
        self.prev_first = items.first().map(ChatItem::key);
        self.prev_len = items.len();
        self.first_item_index
    }
}

/// Asks the store to keep messages the viewer can still see.
///
/// Returns the reset action when the lowest visible position lies below the
/// scheduled trim bound.
pub fn gc_window_check(channel: &ChannelState, lowest_visible: f64) -> Option<ChannelAction> {
    let gc = channel.scheduled_gc?;
    (lowest_visible < gc.lower_pos).then_some(ChannelAction::ResetGc {
        pos: lowest_visible,
    })
}

pub fn is_preview_just_modified(preview: &PreviewItem, now_ms: i64, window: Duration) -> bool {
    now_ms - preview.timestamp < window.as_millis() as i64
}

pub fn should_autohide_self_preview(last_activity_ms: i64, now_ms: i64, window: Duration) -> bool {
    now_ms - last_activity_ms >= window.as_millis() as i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedList {
    pub items: Vec<ChatItem>,
    pub filtered_count: usize,
    pub first_item_index: i64,
}

/// Stateful projector for one channel view.
#[derive(Debug, Clone, Default)]
pub struct ChatListProjector {
    anchor: AnchorTracker,
    visible_previews: HashSet<PreviewId>,
}

impl ChatListProjector {
    pub fn project(&mut self, channel: &ChannelState, mut input: ProjectionInput) -> ProjectedList {
        input.visible_previews = std::mem::take(&mut self.visible_previews);
        let Projection {
            items,
            filtered_count,
        } = project(channel, &input);
        self.visible_previews = items
            .iter()
            .filter_map(ChatItem::as_preview)
            .map(PreviewItem::id)
            .collect();
        let first_item_index = self.anchor.update(&items);
        ProjectedList {
            items,
            filtered_count,
            first_item_index,
        }
    }
}

/// Projectors per channel. Closed channels are evicted on a timer.
#[derive(Debug, Default)]
pub struct ProjectionCache {
    open: HashSet<ChannelId>,
    projectors: HashMap<ChannelId, ChatListProjector>,
}

impl ProjectionCache {
    pub fn open_channel(&mut self, channel_id: ChannelId) {
        self.open.insert(channel_id);
    }

    pub fn close_channel(&mut self, channel_id: ChannelId) {
        self.open.remove(&channel_id);
    }

    pub fn projector(&mut self, channel_id: ChannelId) -> &mut ChatListProjector {
        self.projectors.entry(channel_id).or_default()
    }

    pub fn len(&self) -> usize {
        self.projectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }

    pub fn evict_closed(&mut self) -> usize {
        let before = self.projectors.len();
        let open = &self.open;
        self.projectors.retain(|channel_id, _| open.contains(channel_id));
        before - self.projectors.len()
    }
}

pub fn spawn_projection_eviction(
    cache: Arc<Mutex<ProjectionCache>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = cache.lock().await.evict_closed();
            if evicted > 0 {
                debug!(evicted, "projection: evicted closed channel projections");
            }
        }
    })
}

/// Projects `channel_id` from the store's latest snapshot.
///
/// `viewport_top` is the position of the topmost item on screen; the trim
/// bound is pulled below it so nothing visible gets dropped.
pub fn project_from_store(
    store: &ChatStore,
    projector: &mut ChatListProjector,
    channel_id: ChannelId,
    input: ProjectionInput,
    viewport_top: Option<f64>,
) -> ProjectedList {
    let state = store.get();
    let Some(channel) = state.channel(channel_id) else {
        return projector.project(&ChannelState::new(channel_id), input);
    };
    let list = projector.project(channel, input);
    if let Some(action) = viewport_top.and_then(|pos| gc_window_check(channel, pos)) {
        store.dispatch_channel(channel_id, action);
    }
    list
}

#[cfg(test)]
#[path = "tests/projection_tests.rs"]
mod tests;
