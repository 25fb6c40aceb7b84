use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{
    clock::{Clock, SystemClock},
    compose::{compose_reducer, ComposeAction, ComposeState},
    item::ChatItem,
    load_settings,
    projection::ProjectionInput,
    ChatClient, MutationOutcome, SendContext,
};
use shared::domain::{ChannelId, SpaceId, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the server url from client.toml and APP__SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    space_id: Uuid,
    #[arg(long)]
    channel_id: Uuid,
    #[arg(long)]
    user_id: Uuid,
    /// Character name for in-game messages.
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long)]
    in_game: bool,
}

fn describe(item: &ChatItem) -> String {
    match item {
        ChatItem::Message(item) => {
            let marker = match (item.optimistic, item.fail_to) {
                (_, Some(fail_to)) => format!(" [failed: {:?}]", fail_to.kind),
                (true, None) => " [sending]".to_string(),
                (false, None) => String::new(),
            };
            format!("{:>8.3} {}: {}{marker}", item.message.pos, item.message.name, item.message.text)
        }
        ChatItem::Preview(item) => format!(
            "{:>8.3} {} is typing: {}",
            item.pos,
            item.preview.name,
            item.preview.text.as_deref().unwrap_or("...")
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let space_id = SpaceId(args.space_id);
    let channel_id = ChannelId(args.channel_id);
    let user_id = UserId(args.user_id);
    let timing = settings.preview_timing();
    let client = ChatClient::start(settings, space_id, Some(user_id))?;

    client.projections.lock().await.open_channel(channel_id);
    let mut updates = client.store.subscribe();
    let projections = Arc::clone(&client.projections);
    let pipeline = Arc::clone(&client.pipeline);
    let printer = tokio::spawn(async move {
        let mut last_printed = 0;
        let mut history_requested = false;
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if state.context.initialized && !history_requested {
                history_requested = true;
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    if let Err(err) = pipeline.load_older(channel_id).await {
                        warn!(%channel_id, error = %err, "desktop: first history page failed");
                    }
                });
            }
            let Some(channel) = state.channel(channel_id) else {
                continue;
            };
            let input = ProjectionInput {
                my_id: Some(user_id),
                now_ms: SystemClock.now_ms(),
                timing,
                ..ProjectionInput::default()
            };
            let list = projections.lock().await.projector(channel_id).project(channel, input);
            if list.items.len() != last_printed {
                last_printed = list.items.len();
                println!("--- {} items, {} hidden ---", list.items.len(), list.filtered_count);
                for item in list.items.iter().rev().take(10).rev() {
                    println!("{}", describe(item));
                }
            }
        }
    });

    let ctx = SendContext {
        channel_id,
        sender_id: user_id,
        is_master: false,
        character_name: args.name,
        default_in_game: args.in_game,
        color: String::new(),
    };
    let mut compose = ComposeState::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/load", _) => match client.pipeline.load_older(channel_id).await {
                Ok(count) => info!(count, "desktop: history page loaded"),
                Err(err) => warn!(error = %err, "desktop: history request failed"),
            },
            ("/close", secs) => client
                .store
                .debug_close_connection(secs.parse().unwrap_or(5)),
            ("/retry", _) => client.store.reconnect_now(),
            _ => {
                compose_reducer(&mut compose, ComposeAction::SetSource(line.to_string()));
                client.pipeline.resolve_collision(channel_id, &mut compose);
                match client.pipeline.send(&ctx, &compose).await {
                    Ok(MutationOutcome::Confirmed(message)) => {
                        info!(message_id = %message.id, "desktop: sent");
                        compose_reducer(&mut compose, ComposeAction::Sent { edit: false });
                    }
                    Ok(MutationOutcome::Failed(fail_to)) => {
                        warn!(kind = ?fail_to.kind, "desktop: send failed, draft kept");
                    }
                    Err(err) => warn!(error = %err, "desktop: draft rejected"),
                }
            }
        }
    }

    printer.abort();
    client.projections.lock().await.close_channel(channel_id);
    client.shutdown();
    Ok(())
}
