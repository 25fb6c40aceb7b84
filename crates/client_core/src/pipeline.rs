//! Local intents turned into optimistic overlays and HTTP calls.
//!
//! Every mutation follows the same shape: validate, put an overlay in the
//! store, run the request against a deadline, then either confirm or mark the
//! item as failed. A request that misses its deadline keeps running; if it
//! succeeds later the confirmed message replaces the failure marker.

use std::{future::Future, sync::Arc, time::Duration};

use shared::{
    domain::{ChannelId, MediaId, MessageId, UserId},
    protocol::{
        EditMessage, GetMessagesByChannel, Message, MoveMessageBetween, NewMessage,
        PresignRequest, PresignResponse,
    },
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::ChatApi,
    channel::ChannelAction,
    clock::Clock,
    compose::{
        check_compose, compose_reducer, effective_in_game, ComposeMedia, ComposeState, LocalMedia,
        TextParser, WhisperTarget,
    },
    config::ClientSettings,
    error::{ApiCallError, PipelineError, SettleError},
    item::{ChatItem, FailKind, FailTo, MessageItem, OptimisticEntry, OverlayKind},
    pos::{allocate_between, optimistic_pos_between, Positioned, Rational},
    store::ChatStore,
};

/// Who is sending, and the channel defaults that apply to the draft.
#[derive(Debug, Clone, PartialEq)]
pub struct SendContext {
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub is_master: bool,
    /// Character name selected for this channel.
    pub character_name: String,
    pub default_in_game: bool,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Confirmed(Box<Message>),
    /// The intent was applied locally and the item now carries this marker.
    Failed(FailTo),
}

/// Where a dragged message lands.
#[derive(Debug, Clone, PartialEq)]
pub struct MovePlan {
    pub message: MessageItem,
    pub optimistic_pos: f64,
    pub lower: Option<Rational>,
    pub upper: Option<Rational>,
}

/// Runs `request` on its own task and waits for it at most `limit`.
///
/// On timeout the task is left running; a success that arrives afterwards is
/// handed to `on_late_success`.
pub async fn settle<T, F, L>(limit: Duration, request: F, on_late_success: L) -> Result<T, SettleError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, ApiCallError>> + Send + 'static,
    L: FnOnce(T) + Send + 'static,
{
    let mut handle = tokio::spawn(request);
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(result)) => result.map_err(SettleError::from),
        Ok(Err(err)) => Err(SettleError::Aborted(err.to_string())),
        Err(_) => {
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(value)) => {
                        info!("pipeline: late response arrived after timeout");
                        on_late_success(value);
                    }
                    Ok(Err(err)) => debug!(error = %err, "pipeline: late request failed"),
                    Err(err) => debug!(error = %err, "pipeline: late request aborted"),
                }
            });
            Err(SettleError::TimedOut)
        }
    }
}

fn neighbour(items: &[ChatItem], index: Option<usize>) -> Option<&ChatItem> {
    index
        .and_then(|index| items.get(index))
        .filter(|item| !item.is_dummy_preview())
}

/// Works out the target slot for dragging `items[from]` onto `items[to]`.
pub fn plan_move(items: &[ChatItem], from: usize, to: usize) -> Result<MovePlan, PipelineError> {
    if from == to {
        return Err(PipelineError::NothingToMove);
    }
    let Some(ChatItem::Message(message)) = items.get(from) else {
        return Err(PipelineError::NothingToMove);
    };
    let (lower, upper) = if to > from {
        (neighbour(items, Some(to)), neighbour(items, to.checked_add(1)))
    } else {
        (neighbour(items, to.checked_sub(1)), neighbour(items, Some(to)))
    };
    let optimistic_pos = optimistic_pos_between(lower.map(Positioned::pos), upper.map(Positioned::pos))?;
    let lower = lower.map(ChatItem::rational);
    let upper = upper.map(ChatItem::rational);
    allocate_between(None, lower, upper)?;
    Ok(MovePlan {
        message: message.clone(),
        optimistic_pos,
        lower,
        upper,
    })
}

pub struct MutationPipeline {
    store: Arc<ChatStore>,
    api: Arc<dyn ChatApi>,
    clock: Arc<dyn Clock>,
    parser: Arc<dyn TextParser>,
    settings: ClientSettings,
}

impl MutationPipeline {
    pub fn new(
        store: Arc<ChatStore>,
        api: Arc<dyn ChatApi>,
        clock: Arc<dyn Clock>,
        parser: Arc<dyn TextParser>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            store,
            api,
            clock,
            parser,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    fn ensure_idle(&self, channel_id: ChannelId, key: Uuid) -> Result<(), PipelineError> {
        let state = self.store.get();
        let busy = state
            .channel(channel_id)
            .and_then(|channel| channel.overlays.get(&key))
            .is_some_and(OptimisticEntry::is_in_flight);
        if busy {
            return Err(PipelineError::Busy(key));
        }
        Ok(())
    }

    fn fail(&self, channel_id: ChannelId, key: Uuid, fail_to: FailTo) -> MutationOutcome {
        self.store
            .dispatch_channel(channel_id, ChannelAction::Fail { key, fail_to });
        MutationOutcome::Failed(fail_to)
    }

    fn confirm(&self, channel_id: ChannelId, key: Uuid, message: Message, edit: bool) -> MutationOutcome {
        self.store.dispatch_channel(
            channel_id,
            ChannelAction::MessageSent {
                key,
                message: Box::new(message.clone()),
                edit,
            },
        );
        MutationOutcome::Confirmed(Box::new(message))
    }

    /// Confirms a response that arrived after its deadline.
    fn late_confirm(&self, channel_id: ChannelId, key: Uuid, edit: bool) -> impl FnOnce(Message) + Send + 'static {
        let store = Arc::clone(&self.store);
        move |message| {
            store.dispatch_channel(
                channel_id,
                ChannelAction::MessageSent {
                    key,
                    message: Box::new(message),
                    edit,
                },
            );
        }
    }

    fn whisper_targets(&self, channel_id: ChannelId, target: &WhisperTarget) -> Option<Vec<UserId>> {
        match target {
            WhisperTarget::Disabled => None,
            WhisperTarget::Users(users) => Some(users.clone()),
            WhisperTarget::Master => {
                let state = self.store.get();
                let masters = state
                    .meta
                    .members
                    .get(&channel_id)
                    .map(|members| {
                        members
                            .iter()
                            .filter(|member| member.is_master)
                            .map(|member| member.user_id)
                            .collect()
                    })
                    .unwrap_or_default();
                Some(masters)
            }
        }
    }

    async fn upload(&self, media: &LocalMedia) -> Result<MediaId, SettleError> {
        let api = Arc::clone(&self.api);
        let request = PresignRequest {
            filename: media.filename.clone(),
            mime_type: media.mime_type.clone(),
            size: media.size(),
        };
        let presigned = settle(
            self.settings.presign_timeout,
            async move { api.presign_media(&request).await },
            |_: PresignResponse| {},
        )
        .await?;

        let api = Arc::clone(&self.api);
        let url = presigned.url.clone();
        let bytes = media.bytes.as_ref().clone();
        let mime_type = media.mime_type.clone();
        settle(
            self.settings.upload_timeout,
            async move { api.upload_media(&url, bytes, &mime_type).await },
            |_: ()| {},
        )
        .await?;
        Ok(presigned.media_id)
    }

    /// Sends the draft as a new message.
    pub async fn send(
        &self,
        ctx: &SendContext,
        compose: &ComposeState,
    ) -> Result<MutationOutcome, PipelineError> {
        let parsed = self.parser.parse(&compose.source);
        check_compose(
            compose,
            &parsed,
            &ctx.character_name,
            ctx.default_in_game,
            &self.settings.media,
        )?;
        let preview_id = compose.preview_id;
        let key = preview_id.0;
        self.ensure_idle(ctx.channel_id, key)?;

        let in_game = effective_in_game(&parsed, ctx.default_in_game);
        let name = if parsed.character_name.trim().is_empty() {
            ctx.character_name.clone()
        } else {
            parsed.character_name.clone()
        };
        let own_preview_key = self
            .store
            .get()
            .channel(ctx.channel_id)
            .and_then(|channel| channel.preview_map.get(&ctx.sender_id))
            .filter(|preview| preview.id() == preview_id)
            .map(|preview| preview.key.as_pair());
        let mut draft = NewMessage {
            message_id: None,
            preview_id: Some(preview_id),
            channel_id: ctx.channel_id,
            name,
            text: parsed.text,
            entities: parsed.entities,
            in_game,
            is_action: parsed.is_action,
            media_id: match &compose.media {
                Some(ComposeMedia::Uploaded(media_id)) => Some(*media_id),
                _ => None,
            },
            pos: own_preview_key,
            whisper_to_users: self.whisper_targets(ctx.channel_id, &compose.whisper_to),
            color: ctx.color.clone(),
        };
        let local_media = match &compose.media {
            Some(ComposeMedia::Local(media)) => Some(media),
            _ => None,
        };

        self.store.dispatch_channel(
            ctx.channel_id,
            ChannelAction::MessageSending {
                draft: Box::new(draft.clone()),
                sender_id: ctx.sender_id,
                is_master: ctx.is_master,
                send_time: self.clock.now_ms(),
                local_media: local_media.map(|media| media.filename.clone()),
                compose: Some(Box::new(compose.clone())),
            },
        );

        if let Some(media) = local_media {
            match self.upload(media).await {
                Ok(media_id) => draft.media_id = Some(media_id),
                Err(err) => {
                    warn!(channel_id = %ctx.channel_id, %preview_id, error = %err, "pipeline: media upload failed");
                    return Ok(self.fail(ctx.channel_id, key, FailTo::during_upload(FailKind::Send)));
                }
            }
        }

        let api = Arc::clone(&self.api);
        let result = settle(
            self.settings.request_timeout,
            async move { api.send_message(&draft).await },
            self.late_confirm(ctx.channel_id, key, false),
        )
        .await;
        match result {
            Ok(message) => Ok(self.confirm(ctx.channel_id, key, message, false)),
            Err(err) => {
                warn!(channel_id = %ctx.channel_id, %preview_id, error = %err, "pipeline: send failed");
                Ok(self.fail(ctx.channel_id, key, FailTo::new(FailKind::Send)))
            }
        }
    }

    /// Submits an edit of the message `compose` is editing.
    pub async fn edit(
        &self,
        ctx: &SendContext,
        compose: &ComposeState,
    ) -> Result<MutationOutcome, PipelineError> {
        let message_id = MessageId::from(compose.preview_id);
        let parsed = self.parser.parse(&compose.source);
        check_compose(
            compose,
            &parsed,
            &ctx.character_name,
            ctx.default_in_game,
            &self.settings.media,
        )?;
        let loaded = self
            .store
            .get()
            .channel(ctx.channel_id)
            .is_some_and(|channel| channel.message(message_id).is_some());
        if !compose.is_editing() || !loaded {
            return Err(PipelineError::MessageNotFound(message_id));
        }
        let key = message_id.0;
        self.ensure_idle(ctx.channel_id, key)?;

        let in_game = effective_in_game(&parsed, ctx.default_in_game);
        let name = if parsed.character_name.trim().is_empty() {
            ctx.character_name.clone()
        } else {
            parsed.character_name.clone()
        };
        let mut request = EditMessage {
            message_id,
            name,
            text: parsed.text,
            entities: parsed.entities,
            in_game,
            is_action: parsed.is_action,
            media_id: match &compose.media {
                Some(ComposeMedia::Uploaded(media_id)) => Some(*media_id),
                _ => None,
            },
            color: ctx.color.clone(),
        };
        let local_media = match &compose.media {
            Some(ComposeMedia::Local(media)) => Some(media),
            _ => None,
        };

        self.store.dispatch_channel(
            ctx.channel_id,
            ChannelAction::MessageEditing {
                edit: Box::new(request.clone()),
                send_time: self.clock.now_ms(),
                local_media: local_media.map(|media| media.filename.clone()),
                compose: Some(Box::new(compose.clone())),
            },
        );

        if let Some(media) = local_media {
            match self.upload(media).await {
                Ok(media_id) => request.media_id = Some(media_id),
                Err(err) => {
                    warn!(channel_id = %ctx.channel_id, %message_id, error = %err, "pipeline: media upload failed");
                    return Ok(self.fail(ctx.channel_id, key, FailTo::during_upload(FailKind::Edit)));
                }
            }
        }

        let api = Arc::clone(&self.api);
        let result = settle(
            self.settings.request_timeout,
            async move { api.edit_message(&request).await },
            self.late_confirm(ctx.channel_id, key, true),
        )
        .await;
        match result {
            Ok(message) => Ok(self.confirm(ctx.channel_id, key, message, true)),
            Err(err) => {
                warn!(channel_id = %ctx.channel_id, %message_id, error = %err, "pipeline: edit failed");
                Ok(self.fail(ctx.channel_id, key, FailTo::new(FailKind::Edit)))
            }
        }
    }

    /// Drags `items[from]` to the slot of `items[to]`.
    pub async fn move_message(
        &self,
        channel_id: ChannelId,
        items: &[ChatItem],
        from: usize,
        to: usize,
    ) -> Result<MutationOutcome, PipelineError> {
        let plan = plan_move(items, from, to)?;
        let message_id = plan.message.id();
        let key = message_id.0;
        self.ensure_idle(channel_id, key)?;

        let request = MoveMessageBetween {
            channel_id,
            message_id,
            expect_pos: plan.message.key().as_pair(),
            range: (
                plan.lower.map(|key| key.as_pair()),
                plan.upper.map(|key| key.as_pair()),
            ),
        };
        self.store.dispatch_channel(
            channel_id,
            ChannelAction::SetOptimistic(Box::new(OptimisticEntry {
                kind: OverlayKind::Move,
                ref_id: key,
                item: ChatItem::Message(MessageItem {
                    optimistic: true,
                    ..plan.message
                }),
                optimistic_pos: plan.optimistic_pos,
                timestamp: self.clock.now_ms(),
                compose: None,
            })),
        );

        let api = Arc::clone(&self.api);
        let result = settle(
            self.settings.request_timeout,
            async move { api.move_message_between(&request).await },
            self.late_confirm(channel_id, key, true),
        )
        .await;
        match result {
            Ok(message) => Ok(self.confirm(channel_id, key, message, true)),
            Err(err) => {
                warn!(%channel_id, %message_id, error = %err, "pipeline: move failed");
                Ok(self.fail(channel_id, key, FailTo::new(FailKind::Move)))
            }
        }
    }

    pub async fn delete(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<MutationOutcome, PipelineError> {
        self.ensure_idle(channel_id, message_id.0)?;
        let api = Arc::clone(&self.api);
        let store = Arc::clone(&self.store);
        let result = settle(
            self.settings.request_timeout,
            async move { api.delete_message(message_id).await },
            move |message: Message| {
                store.dispatch_channel(
                    channel_id,
                    ChannelAction::MessageDeleted {
                        message_id,
                        pos: message.pos,
                    },
                );
            },
        )
        .await;
        match result {
            Ok(message) => {
                self.store.dispatch_channel(
                    channel_id,
                    ChannelAction::MessageDeleted {
                        message_id,
                        pos: message.pos,
                    },
                );
                Ok(MutationOutcome::Confirmed(Box::new(message)))
            }
            Err(err) => {
                warn!(%channel_id, %message_id, error = %err, "pipeline: delete failed");
                Ok(self.fail(channel_id, message_id.0, FailTo::new(FailKind::Delete)))
            }
        }
    }

    /// Archives the message, or restores it when already archived.
    pub async fn toggle_archive(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<MutationOutcome, PipelineError> {
        self.ensure_idle(channel_id, message_id.0)?;
        let api = Arc::clone(&self.api);
        let result = settle(
            self.settings.request_timeout,
            async move { api.toggle_fold(message_id).await },
            self.late_confirm(channel_id, message_id.0, true),
        )
        .await;
        match result {
            Ok(message) => Ok(self.confirm(channel_id, message_id.0, message, true)),
            Err(err) => {
                warn!(%channel_id, %message_id, error = %err, "pipeline: archive toggle failed");
                Ok(self.fail(channel_id, message_id.0, FailTo::new(FailKind::Archive)))
            }
        }
    }

    /// Drops a failed overlay and hands back its draft for the editor.
    pub fn discard_failed(&self, channel_id: ChannelId, key: Uuid) -> Option<ComposeState> {
        let state = self.store.get();
        let entry = state.channel(channel_id)?.overlays.get(&key)?;
        if entry.is_in_flight() {
            return None;
        }
        let compose = entry.compose.clone();
        self.store
            .dispatch_channel(channel_id, ChannelAction::RemoveOptimistic { key });
        compose
    }

    /// Gives the draft a fresh preview id when the server found the slot of
    /// its current one taken. Returns whether the id changed.
    pub fn resolve_collision(&self, channel_id: ChannelId, compose: &mut ComposeState) -> bool {
        let action = self
            .store
            .get()
            .channel(channel_id)
            .and_then(|channel| channel.collision_for(compose.preview_id));
        let Some(action) = action else {
            return false;
        };
        debug!(%channel_id, preview_id = %compose.preview_id, "pipeline: preview slot taken, rotating id");
        compose_reducer(compose, action);
        true
    }

    /// Fetches one page of history older than `before` and returns its size.
    pub async fn load_more(
        &self,
        channel_id: ChannelId,
        before: Option<f64>,
        limit: u32,
    ) -> Result<usize, PipelineError> {
        let api = Arc::clone(&self.api);
        let request = GetMessagesByChannel {
            channel_id,
            before,
            limit,
        };
        let messages = settle(
            self.settings.request_timeout,
            async move { api.fetch_messages(&request).await },
            |_: Vec<Message>| {},
        )
        .await
        .map_err(PipelineError::History)?;
        let count = messages.len();
        debug!(%channel_id, count, ?before, "pipeline: history page loaded");
        self.store
            .dispatch_channel(channel_id, ChannelAction::MessagesLoaded { messages, limit });
        Ok(count)
    }

    /// Loads the page just above the oldest loaded message.
    pub async fn load_older(&self, channel_id: ChannelId) -> Result<usize, PipelineError> {
        let before = self
            .store
            .get()
            .channel(channel_id)
            .and_then(|channel| channel.top_pos());
        self.load_more(channel_id, before, self.settings.history_page_size)
            .await
    }
}

#[cfg(test)]
#[path = "tests/pipeline_tests.rs"]
mod tests;
