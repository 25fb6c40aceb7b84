use serde::Deserialize;
use shared::domain::SpaceId;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::transport::OutgoingFrame;

/// Reconnect countdown indexed by retry count.
pub const DEFAULT_RETRY_COUNTDOWNS: [u32; 9] = [0, 0, 2, 3, 3, 5, 3, 5, 7];
pub const DEFAULT_MAX_COUNTDOWN: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub countdowns: Vec<u32>,
    /// Base countdown once the table runs out, jittered by one second.
    pub max_countdown: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            countdowns: DEFAULT_RETRY_COUNTDOWNS.to_vec(),
            max_countdown: DEFAULT_MAX_COUNTDOWN,
        }
    }
}

impl ReconnectPolicy {
    /// Retries up to this one reconnect without waiting.
    pub const IMMEDIATE_RETRIES: u32 = 2;
    const JITTER_SPLIT: f64 = 0.333;

    /// `jitter` is a uniform sample in `[0, 1)`.
    pub fn countdown_for(&self, retry: u32, jitter: f64) -> u32 {
        if retry <= Self::IMMEDIATE_RETRIES {
            return 0;
        }
        if let Some(countdown) = self.countdowns.get(retry as usize) {
            return *countdown;
        }
        if jitter < Self::JITTER_SPLIT {
            self.max_countdown.saturating_sub(1)
        } else if jitter > Self::JITTER_SPLIT {
            self.max_countdown + 1
        } else {
            self.max_countdown
        }
    }
}

/// Write half of a live mailbox socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    attempt: u64,
    outgoing: mpsc::UnboundedSender<OutgoingFrame>,
}

impl ConnectionHandle {
    pub fn new(attempt: u64, outgoing: mpsc::UnboundedSender<OutgoingFrame>) -> Self {
        Self { attempt, outgoing }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outgoing.send(OutgoingFrame::Text(text.into())).is_ok()
    }

    pub fn close(&self) {
        if self.outgoing.send(OutgoingFrame::Close).is_err() {
            debug!(attempt = self.attempt, "connection: socket already gone");
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.attempt == other.attempt
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Closed { retry: u32, countdown: u32 },
    Connecting { mailbox: SpaceId, retry: u32 },
    Connected { mailbox: SpaceId, handle: ConnectionHandle },
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Closed {
            retry: 0,
            countdown: 0,
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn handle(&self) -> Option<&ConnectionHandle> {
        match self {
            ConnectionState::Connected { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

/// Lifecycle inputs of the mailbox connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting { mailbox: SpaceId },
    Connected { mailbox: SpaceId, handle: ConnectionHandle },
    Closed { mailbox: SpaceId, jitter: f64 },
    /// One second of countdown elapsed, or the user asked to retry now.
    Tick { immediately: bool },
    DebugClose { countdown: u32 },
}

/// Pure state transition for the connection lifecycle.
///
/// Events addressed to a mailbox other than `current` leave the state
/// untouched, so a socket from a previous space cannot disturb the new one.
pub fn connection_reducer(
    state: &ConnectionState,
    event: &ConnectionEvent,
    current: SpaceId,
    policy: &ReconnectPolicy,
) -> ConnectionState {
    match event {
        ConnectionEvent::Connecting { mailbox } => {
            if *mailbox != current {
                return state.clone();
            }
            let retry = match state {
                ConnectionState::Closed { retry, .. } => *retry,
                ConnectionState::Connecting { retry, .. } => *retry,
                ConnectionState::Connected { .. } => 0,
            };
            ConnectionState::Connecting {
                mailbox: *mailbox,
                retry,
            }
        }
        ConnectionEvent::Connected { mailbox, handle } => {
            if *mailbox != current {
                return state.clone();
            }
            info!(%mailbox, attempt = handle.attempt(), "connection: connected");
            ConnectionState::Connected {
                mailbox: *mailbox,
                handle: handle.clone(),
            }
        }
        ConnectionEvent::Closed { mailbox, jitter } => {
            if *mailbox != current {
                return state.clone();
            }
            let retry = match state {
                // Already closed: a forced close beat the socket's own shutdown.
                ConnectionState::Closed { .. } => return state.clone(),
                ConnectionState::Connecting { retry, .. } => retry + 1,
                ConnectionState::Connected { .. } => 0,
            };
            let countdown = policy.countdown_for(retry, *jitter);
            info!(%mailbox, retry, countdown, "connection: closed");
            ConnectionState::Closed { retry, countdown }
        }
        ConnectionEvent::Tick { immediately } => match state {
            ConnectionState::Closed { retry, countdown } => ConnectionState::Closed {
                retry: *retry,
                countdown: if *immediately {
                    0
                } else {
                    countdown.saturating_sub(1)
                },
            },
            _ => state.clone(),
        },
        ConnectionEvent::DebugClose { countdown } => ConnectionState::Closed {
            retry: 4,
            countdown: *countdown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(attempt: u64) -> ConnectionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        ConnectionHandle::new(attempt, tx)
    }

    #[test]
    fn countdown_follows_table_then_jitters() {
        let policy = ReconnectPolicy::default();
        let table: Vec<u32> = (0..9).map(|retry| policy.countdown_for(retry, 0.0)).collect();
        assert_eq!(table, vec![0, 0, 0, 3, 3, 5, 3, 5, 7]);
        assert_eq!(policy.countdown_for(9, 0.9), 9);
        assert_eq!(policy.countdown_for(9, 0.5), 9);
        assert_eq!(policy.countdown_for(42, 0.1), 7);
        assert_eq!(policy.countdown_for(42, 0.333), 8);
    }

    #[test]
    fn first_retries_never_wait_even_with_a_custom_table() {
        let policy = ReconnectPolicy {
            countdowns: vec![4, 4, 4, 4],
            max_countdown: 6,
        };
        assert_eq!(policy.countdown_for(2, 0.0), 0);
        assert_eq!(policy.countdown_for(3, 0.0), 4);
    }

    #[test]
    fn failed_attempts_increase_retry() {
        let mailbox = SpaceId::new();
        let policy = ReconnectPolicy::default();
        let mut state = ConnectionState::default();
        for expected_retry in 1..=3 {
            state = connection_reducer(
                &state,
                &ConnectionEvent::Connecting { mailbox },
                mailbox,
                &policy,
            );
            state = connection_reducer(
                &state,
                &ConnectionEvent::Closed {
                    mailbox,
                    jitter: 0.0,
                },
                mailbox,
                &policy,
            );
            let countdown = if expected_retry <= 2 {
                0
            } else {
                DEFAULT_RETRY_COUNTDOWNS[expected_retry as usize]
            };
            assert_eq!(
                state,
                ConnectionState::Closed {
                    retry: expected_retry,
                    countdown,
                }
            );
        }
    }

    #[test]
    fn closing_an_established_connection_resets_retry() {
        let mailbox = SpaceId::new();
        let policy = ReconnectPolicy::default();
        let connected = ConnectionState::Connected {
            mailbox,
            handle: handle(1),
        };
        let state = connection_reducer(
            &connected,
            &ConnectionEvent::Closed {
                mailbox,
                jitter: 0.0,
            },
            mailbox,
            &policy,
        );
        assert_eq!(
            state,
            ConnectionState::Closed {
                retry: 0,
                countdown: 0
            }
        );
    }

    #[test]
    fn events_for_other_mailboxes_are_ignored() {
        let mailbox = SpaceId::new();
        let policy = ReconnectPolicy::default();
        let state = ConnectionState::default();
        let next = connection_reducer(
            &state,
            &ConnectionEvent::Connecting {
                mailbox: SpaceId::new(),
            },
            mailbox,
            &policy,
        );
        assert_eq!(next, state);
    }

    #[test]
    fn ticks_count_down_and_retry_now_skips_the_wait() {
        let mailbox = SpaceId::new();
        let policy = ReconnectPolicy::default();
        let closed = ConnectionState::Closed {
            retry: 5,
            countdown: 5,
        };
        let ticked = connection_reducer(
            &closed,
            &ConnectionEvent::Tick { immediately: false },
            mailbox,
            &policy,
        );
        assert_eq!(
            ticked,
            ConnectionState::Closed {
                retry: 5,
                countdown: 4
            }
        );
        let now = connection_reducer(
            &closed,
            &ConnectionEvent::Tick { immediately: true },
            mailbox,
            &policy,
        );
        assert_eq!(
            now,
            ConnectionState::Closed {
                retry: 5,
                countdown: 0
            }
        );
    }

    #[test]
    fn debug_close_forces_retry_four_and_ignores_trailing_close() {
        let mailbox = SpaceId::new();
        let policy = ReconnectPolicy::default();
        let connected = ConnectionState::Connected {
            mailbox,
            handle: handle(7),
        };
        let closed = connection_reducer(
            &connected,
            &ConnectionEvent::DebugClose { countdown: 3 },
            mailbox,
            &policy,
        );
        assert_eq!(
            closed,
            ConnectionState::Closed {
                retry: 4,
                countdown: 3
            }
        );
        let after = connection_reducer(
            &closed,
            &ConnectionEvent::Closed {
                mailbox,
                jitter: 0.0,
            },
            mailbox,
            &policy,
        );
        assert_eq!(after, closed);
    }
}
