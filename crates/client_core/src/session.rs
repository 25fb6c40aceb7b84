//! Keeps one mailbox socket open for the active space.
//!
//! The session task owns the socket. It reacts to the connection state kept in
//! the store: a closed connection with no countdown left is reopened, a
//! countdown is ticked once per second, and a socket whose space or attempt no
//! longer matches the store is dropped.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use shared::{
    domain::{SpaceId, UserId},
    protocol::{ServerEvent, PING, PONG},
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    chat::{ChatAction, ChatSpaceState},
    connection::{ConnectionEvent, ConnectionHandle, ConnectionState},
    store::ChatStore,
    transport::{mailbox_url, MailboxConnector, MailboxSocket},
};

const TICK: Duration = Duration::from_secs(1);

pub struct SessionManager {
    store: Arc<ChatStore>,
    connector: Arc<dyn MailboxConnector>,
    ws_base: String,
    user_id: Option<UserId>,
    inactivity_reset: Duration,
    last_heartbeat: Instant,
    attempts: u64,
}

impl SessionManager {
    pub fn new(
        store: Arc<ChatStore>,
        connector: Arc<dyn MailboxConnector>,
        ws_base: impl Into<String>,
        inactivity_reset: Duration,
    ) -> Self {
        Self {
            store,
            connector,
            ws_base: ws_base.into(),
            user_id: None,
            inactivity_reset,
            last_heartbeat: Instant::now(),
            attempts: 0,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut updates = self.store.subscribe();
        let mut tick_at: Option<Instant> = None;
        loop {
            let state = updates.borrow_and_update().clone();
            match state.connection {
                ConnectionState::Closed { countdown, .. } if countdown > 0 => {
                    let deadline = *tick_at.get_or_insert_with(|| Instant::now() + TICK);
                    tokio::select! {
                        _ = sleep_until(deadline) => {
                            tick_at = None;
                            self.store
                                .dispatch(ChatAction::Connection(ConnectionEvent::Tick { immediately: false }));
                        }
                        changed = updates.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
                ConnectionState::Closed { .. } => {
                    tick_at = None;
                    if self.last_heartbeat.elapsed() >= self.inactivity_reset {
                        warn!(
                            space_id = %state.context.space_id,
                            idle_secs = self.last_heartbeat.elapsed().as_secs(),
                            "session: no heartbeat for too long, rebuilding space state"
                        );
                        self.store.dispatch(ChatAction::ResetChatState);
                        self.last_heartbeat = Instant::now();
                    }
                    if !self.connect_once(&mut updates).await {
                        return;
                    }
                }
                ConnectionState::Connecting { .. } | ConnectionState::Connected { .. } => {
                    if updates.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn closed(&self, mailbox: SpaceId) {
        self.store.dispatch(ChatAction::Connection(ConnectionEvent::Closed {
            mailbox,
            jitter: rand::random::<f64>(),
        }));
    }

    /// Opens one socket and pumps it until it closes. Returns `false` once the
    /// store is gone.
    async fn connect_once(
        &mut self,
        updates: &mut watch::Receiver<Arc<ChatSpaceState>>,
    ) -> bool {
        let state = self.store.get();
        let mailbox = state.context.space_id;
        let after = state.last_event_id;
        drop(state);

        self.store
            .dispatch(ChatAction::Connection(ConnectionEvent::Connecting { mailbox }));
        let url = match mailbox_url(&self.ws_base, mailbox, after, self.user_id) {
            Ok(url) => url,
            Err(err) => {
                warn!(%mailbox, error = %err, "session: cannot build mailbox url");
                self.closed(mailbox);
                return true;
            }
        };
        let MailboxSocket {
            outgoing,
            mut incoming,
        } = match self.connector.connect(&url).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(%mailbox, error = %err, "session: connect failed");
                self.closed(mailbox);
                return true;
            }
        };

        self.attempts += 1;
        let attempt = self.attempts;
        let handle = ConnectionHandle::new(attempt, outgoing);
        info!(%mailbox, attempt, resume_after = after.timestamp, "session: mailbox open");
        self.store.dispatch(ChatAction::Connection(ConnectionEvent::Connected {
            mailbox,
            handle: handle.clone(),
        }));
        let mut superseded = !owns_socket(&updates.borrow_and_update(), mailbox, attempt);

        while !superseded {
            tokio::select! {
                frame = incoming.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(mailbox, &handle, &text),
                    Some(Err(err)) => {
                        warn!(%mailbox, attempt, error = %err, "session: socket failed");
                        break;
                    }
                    None => {
                        info!(%mailbox, attempt, "session: socket closed");
                        break;
                    }
                },
                changed = updates.changed() => {
                    if changed.is_err() {
                        handle.close();
                        return false;
                    }
                    superseded = !owns_socket(&updates.borrow_and_update(), mailbox, attempt);
                }
            }
        }
        if superseded {
            debug!(%mailbox, attempt, "session: socket superseded");
            handle.close();
        }
        self.closed(mailbox);
        true
    }

    fn handle_frame(&mut self, mailbox: SpaceId, handle: &ConnectionHandle, text: &str) {
        if text == PING {
            self.last_heartbeat = Instant::now();
            if !handle.send_text(PONG) {
                debug!(%mailbox, "session: pong not sent, socket closing");
            }
            return;
        }
        if text == PONG || text.trim().is_empty() {
            return;
        }
        let event: ServerEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(err) => {
                warn!(%mailbox, error = %err, "session: undecodable frame dropped");
                return;
            }
        };
        let cursor = self.store.get().last_event_id;
        if event.id <= cursor {
            debug!(%mailbox, timestamp = event.id.timestamp, "session: replayed event dropped");
            return;
        }
        self.store.dispatch(ChatAction::EventFromServer(Box::new(event)));
    }
}

/// Whether the store still points at the socket opened as `attempt`.
fn owns_socket(state: &ChatSpaceState, mailbox: SpaceId, attempt: u64) -> bool {
    state.context.space_id == mailbox
        && state
            .connection
            .handle()
            .is_some_and(|current| current.attempt() == attempt)
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
