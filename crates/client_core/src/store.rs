use std::sync::Arc;

use shared::domain::{ChannelId, SpaceId};
use tokio::sync::watch;
use tracing::info;

use crate::{
    channel::ChannelAction,
    chat::{chat_reducer, ChatAction, ChatSpaceState},
    connection::{ConnectionEvent, ReconnectPolicy},
};

/// Single owner of the space state.
///
/// Every change goes through [`ChatStore::dispatch`], which runs the reducer
/// and publishes the new snapshot. Readers hold cheap `Arc` snapshots and
/// never observe a half-applied action.
pub struct ChatStore {
    state: watch::Sender<Arc<ChatSpaceState>>,
}

impl ChatStore {
    pub fn new(space_id: SpaceId, reconnect: ReconnectPolicy) -> Arc<Self> {
        Self::from_state(ChatSpaceState::with_policy(space_id, reconnect))
    }

    pub fn from_state(initial: ChatSpaceState) -> Arc<Self> {
        let (state, _) = watch::channel(Arc::new(initial));
        Arc::new(Self { state })
    }

    pub fn get(&self) -> Arc<ChatSpaceState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatSpaceState>> {
        self.state.subscribe()
    }

    pub fn dispatch(&self, action: ChatAction) {
        self.state.send_modify(|state| chat_reducer(Arc::make_mut(state), action));
    }

    pub fn dispatch_channel(&self, channel_id: ChannelId, action: ChannelAction) {
        self.dispatch(ChatAction::channel(channel_id, action));
    }

    /// Drops the live socket and parks the connection for `countdown` seconds.
    pub fn debug_close_connection(&self, countdown: u32) {
        let state = self.get();
        if let Some(handle) = state.connection.handle() {
            info!(attempt = handle.attempt(), countdown, "store: forcing connection closed");
            handle.close();
        }
        self.dispatch(ChatAction::Connection(ConnectionEvent::DebugClose { countdown }));
    }

    /// Skips the remaining reconnect countdown.
    pub fn reconnect_now(&self) {
        self.dispatch(ChatAction::Connection(ConnectionEvent::Tick { immediately: true }));
    }
}
