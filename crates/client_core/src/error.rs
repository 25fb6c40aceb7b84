use shared::{
    domain::MessageId,
    error::{ApiException, ErrorCode},
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum PosError {
    #[error("cannot place an item without any neighbour")]
    Unbounded,
    #[error("lower neighbour {lower} is not below upper neighbour {upper}")]
    EmptyInterval { lower: f64, upper: f64 },
    #[error("no position left below zero")]
    NoRoomBelow,
    #[error("position key overflowed")]
    Overflow,
    #[error("invalid position key {p}/{q}")]
    InvalidKey { p: i32, q: i32 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("message text is empty")]
    TextEmpty,
    #[error("an in-game message needs a character name")]
    NoName,
    #[error("media is {size} bytes, the limit is {max}")]
    MediaTooLarge { size: u64, max: u64 },
    #[error("media type '{0}' is not supported")]
    MediaTypeNotSupported(String),
}

#[derive(Debug, Error)]
pub enum ApiCallError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected request: {0}")]
    Rejected(#[source] ApiException),
    #[error("media upload rejected with status {0}")]
    UploadStatus(u16),
}

impl ApiCallError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiCallError::Transport(_) => ErrorCode::FetchFail,
            ApiCallError::Rejected(err) => err.code,
            ApiCallError::UploadStatus(_) => ErrorCode::Unexpected,
        }
    }
}

/// Why a raced request did not produce a value.
#[derive(Debug, Error)]
pub enum SettleError {
    #[error("request timed out")]
    TimedOut,
    #[error(transparent)]
    Api(#[from] ApiCallError),
    #[error("request task aborted: {0}")]
    Aborted(String),
}

/// Errors that stop an intent before any optimistic state is created.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ComposeError),
    #[error(transparent)]
    Position(#[from] PosError),
    #[error("an optimistic update for {0} is still in flight")]
    Busy(Uuid),
    #[error("message {0} is not loaded")]
    MessageNotFound(MessageId),
    #[error("source and target of the move are the same")]
    NothingToMove,
    #[error("history request failed: {0}")]
    History(#[source] SettleError),
}
