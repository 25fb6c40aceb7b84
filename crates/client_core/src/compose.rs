//! Editor state behind the message being composed.

use std::sync::Arc;

use serde_json::json;
use shared::{
    domain::{MediaId, PreviewId, UserId},
    protocol::{Entities, Message, PreviewEdit},
};

use crate::{config::MediaLimits, error::ComposeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Arc<Vec<u8>>,
}

impl LocalMedia {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeMedia {
    Local(LocalMedia),
    Uploaded(MediaId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WhisperTarget {
    #[default]
    Disabled,
    /// Whisper to the game master only.
    Master,
    Users(Vec<UserId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeState {
    pub preview_id: PreviewId,
    /// Preview id of the draft that was just sent, so its echo is not mistaken
    /// for a fresh draft.
    pub prev_preview_id: Option<PreviewId>,
    pub source: String,
    pub media: Option<ComposeMedia>,
    pub whisper_to: WhisperTarget,
    /// Selection as byte offsets into `source`.
    pub range: (usize, usize),
    pub edit: Option<PreviewEdit>,
    /// Draft stashed while editing an older message.
    pub backup: Option<Box<ComposeState>>,
}

impl Default for ComposeState {
    fn default() -> Self {
        Self {
            preview_id: PreviewId::new(),
            prev_preview_id: None,
            source: String::new(),
            media: None,
            whisper_to: WhisperTarget::Disabled,
            range: (0, 0),
            edit: None,
            backup: None,
        }
    }
}

impl ComposeState {
    pub fn is_empty(&self) -> bool {
        self.source.trim().is_empty() && self.media.is_none()
    }

    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComposeAction {
    SetSource(String),
    SetRange(usize, usize),
    SetMedia(Option<ComposeMedia>),
    SetWhisperTo(WhisperTarget),
    /// Start editing `message`, stashing the current draft.
    EditMessage(Box<Message>),
    Sent { edit: bool },
    /// Drop the draft; with `restore`, bring back the stashed one.
    Reset { restore: bool },
    /// Put a draft from a failed send or edit back into the editor.
    RecoverState(Box<ComposeState>),
    /// The server already holds a preview under this id.
    Collided { preview_id: PreviewId },
}

pub fn compose_reducer(state: &mut ComposeState, action: ComposeAction) {
    match action {
        ComposeAction::SetSource(source) => {
            // Crossing between empty and non-empty starts a new preview.
            let was_empty = state.source.trim().is_empty();
            if was_empty != source.trim().is_empty() && state.edit.is_none() {
                state.prev_preview_id = Some(state.preview_id);
                state.preview_id = PreviewId::new();
            }
            let len = source.len();
            state.source = source;
            state.range = (state.range.0.min(len), state.range.1.min(len));
        }
        ComposeAction::SetRange(start, end) => {
            let len = state.source.len();
            state.range = (start.min(len), end.min(len));
        }
        ComposeAction::SetMedia(media) => state.media = media,
        ComposeAction::SetWhisperTo(target) => state.whisper_to = target,
        ComposeAction::EditMessage(message) => {
            let backup = if state.edit.is_some() {
                state.backup.take()
            } else {
                Some(Box::new(std::mem::take(state)))
            };
            let source = message.text.clone();
            *state = ComposeState {
                preview_id: PreviewId::from(message.id),
                prev_preview_id: None,
                range: (source.len(), source.len()),
                source,
                media: message.media_id.map(ComposeMedia::Uploaded),
                whisper_to: match &message.whisper_to_users {
                    Some(users) => WhisperTarget::Users(users.clone()),
                    None => WhisperTarget::Disabled,
                },
                edit: Some(PreviewEdit {
                    time: message.modified,
                    p: message.pos_p,
                    q: message.pos_q,
                }),
                backup,
            };
        }
        ComposeAction::Sent { edit: true } => {
            *state = state.backup.take().map(|backup| *backup).unwrap_or_default();
        }
        ComposeAction::Sent { edit: false } => {
            let whisper_to = std::mem::take(&mut state.whisper_to);
            *state = ComposeState {
                prev_preview_id: Some(state.preview_id),
                whisper_to,
                ..ComposeState::default()
            };
        }
        ComposeAction::Reset { restore } => {
            let backup = state.backup.take();
            *state = match (restore, backup) {
                (true, Some(backup)) => *backup,
                _ => ComposeState::default(),
            };
        }
        ComposeAction::RecoverState(recovered) => {
            *state = ComposeState {
                preview_id: PreviewId::new(),
                prev_preview_id: Some(recovered.preview_id),
                media: None,
                backup: state.backup.take(),
                ..*recovered
            };
        }
        ComposeAction::Collided { preview_id } => {
            if state.preview_id == preview_id {
                state.prev_preview_id = Some(preview_id);
                state.preview_id = PreviewId::new();
            }
        }
    }
}

/// Output of the rich-text parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedText {
    /// Message body with modifiers stripped.
    pub text: String,
    pub entities: Entities,
    /// Explicit in-game or out-of-game modifier, if any.
    pub in_game: Option<bool>,
    pub is_action: bool,
    /// Whether the draft is broadcast as a live preview.
    pub broadcast: bool,
    /// Character name given inline, overriding the channel default.
    pub character_name: String,
}

/// Turns editor source text into message text and entities.
pub trait TextParser: Send + Sync {
    fn parse(&self, source: &str) -> ParsedText;
}

/// Treats the whole source as one plain text span.
pub struct PlainTextParser;

impl TextParser for PlainTextParser {
    fn parse(&self, source: &str) -> ParsedText {
        let text = source.trim().to_string();
        let entities = if text.is_empty() {
            Vec::new()
        } else {
            vec![json!({ "type": "Text", "start": 0, "len": text.len() })]
        };
        ParsedText {
            text,
            entities,
            in_game: None,
            is_action: false,
            broadcast: true,
            character_name: String::new(),
        }
    }
}

/// Whether a parsed draft ends up in-game once defaults are applied.
pub fn effective_in_game(parsed: &ParsedText, default_in_game: bool) -> bool {
    if !parsed.character_name.trim().is_empty() {
        return true;
    }
    parsed.in_game.unwrap_or(default_in_game)
}

pub fn validate_media(media: &LocalMedia, limits: &MediaLimits) -> Result<(), ComposeError> {
    if media.size() > limits.max_bytes {
        return Err(ComposeError::MediaTooLarge {
            size: media.size(),
            max: limits.max_bytes,
        });
    }
    if !limits
        .supported_types
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(&media.mime_type))
    {
        return Err(ComposeError::MediaTypeNotSupported(media.mime_type.clone()));
    }
    Ok(())
}

/// Rejects a draft that cannot be sent, before any optimistic state exists.
pub fn check_compose(
    compose: &ComposeState,
    parsed: &ParsedText,
    character_name: &str,
    default_in_game: bool,
    limits: &MediaLimits,
) -> Result<(), ComposeError> {
    if effective_in_game(parsed, default_in_game)
        && parsed.character_name.trim().is_empty()
        && character_name.trim().is_empty()
    {
        return Err(ComposeError::NoName);
    }
    if let Some(ComposeMedia::Local(media)) = &compose.media {
        validate_media(media, limits)?;
    }
    if parsed.text.trim().is_empty() {
        return Err(ComposeError::TextEmpty);
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/compose_tests.rs"]
mod tests;
