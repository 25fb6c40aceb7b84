use std::sync::Arc;

use anyhow::{Context, Result};
use shared::domain::{SpaceId, UserId};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::info;

pub mod api;
pub mod channel;
pub mod chat;
pub mod clock;
pub mod compose;
pub mod config;
pub mod connection;
pub mod error;
pub mod item;
pub mod pipeline;
pub mod pos;
pub mod projection;
pub mod session;
pub mod store;
pub mod transport;

pub use api::{ChatApi, HttpChatApi};
pub use config::{load_settings, ClientSettings};
pub use pipeline::{MutationOutcome, MutationPipeline, SendContext};
pub use projection::{ChatListProjector, ProjectedList, ProjectionCache};
pub use store::ChatStore;

use crate::{
    clock::SystemClock,
    compose::PlainTextParser,
    projection::spawn_projection_eviction,
    session::SessionManager,
    transport::{websocket_base, MailboxConnector, WsConnector},
};

/// A running client for one space: the store, the socket session feeding it
/// and the pipeline writing to it.
pub struct ChatClient {
    pub store: Arc<ChatStore>,
    pub pipeline: Arc<MutationPipeline>,
    pub projections: Arc<Mutex<ProjectionCache>>,
    session_task: JoinHandle<()>,
    eviction_task: JoinHandle<()>,
}

impl ChatClient {
    /// Connects to the server named in `settings` over websocket and HTTP.
    pub fn start(settings: ClientSettings, space_id: SpaceId, user_id: Option<UserId>) -> Result<Self> {
        let api = HttpChatApi::new(settings.server_url.clone());
        Self::start_with(settings, space_id, user_id, Arc::new(WsConnector), Arc::new(api))
    }

    pub fn start_with(
        settings: ClientSettings,
        space_id: SpaceId,
        user_id: Option<UserId>,
        connector: Arc<dyn MailboxConnector>,
        api: Arc<dyn ChatApi>,
    ) -> Result<Self> {
        let ws_base = match &settings.websocket_url {
            Some(url) => url.clone(),
            None => websocket_base(&settings.server_url)
                .with_context(|| format!("cannot derive websocket url from {}", settings.server_url))?,
        };
        let store = ChatStore::new(space_id, settings.reconnect.clone());

        let mut session = SessionManager::new(
            Arc::clone(&store),
            connector,
            ws_base.clone(),
            settings.inactivity_reset,
        );
        if let Some(user_id) = user_id {
            session = session.with_user(user_id);
        }
        let session_task = session.spawn();

        let projections = Arc::new(Mutex::new(ProjectionCache::default()));
        let eviction_task = spawn_projection_eviction(
            Arc::clone(&projections),
            settings.projection_eviction_interval,
        );

        let pipeline = Arc::new(MutationPipeline::new(
            Arc::clone(&store),
            api,
            Arc::new(SystemClock),
            Arc::new(PlainTextParser),
            settings,
        ));
        info!(%space_id, %ws_base, "client: started");
        Ok(Self {
            store,
            pipeline,
            projections,
            session_task,
            eviction_task,
        })
    }

    pub fn shutdown(&self) {
        self.session_task.abort();
        self.eviction_task.abort();
        if let Some(handle) = self.store.get().connection.handle() {
            handle.close();
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
