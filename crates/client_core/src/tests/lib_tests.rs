use std::{collections::HashMap, time::Duration};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use shared::protocol::{EventBody, EventId, ServerEvent, PING, PONG};
use tokio::{net::TcpListener, sync::mpsc};

use super::*;

#[derive(Clone)]
struct ServerState {
    received: mpsc::UnboundedSender<String>,
    queries: mpsc::UnboundedSender<HashMap<String, String>>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let _ = state.queries.send(query.clone());
    ws.on_upgrade(move |socket| ws_connection(state, socket, query))
}

async fn ws_connection(state: ServerState, socket: WebSocket, query: HashMap<String, String>) {
    let (mut sender, mut receiver) = socket.split();
    let Some(mailbox) = query.get("mailbox").and_then(|id| id.parse().ok()) else {
        return;
    };
    let initialized = ServerEvent {
        mailbox: SpaceId(mailbox),
        id: EventId::at(500),
        body: EventBody::Initialized,
    };
    let Ok(text) = serde_json::to_string(&initialized) else {
        return;
    };
    if sender.send(WsMessage::Text(PING.to_string())).await.is_err() {
        return;
    }
    if sender.send(WsMessage::Text(text)).await.is_err() {
        return;
    }
    while let Some(Ok(msg)) = receiver.next().await {
        if let WsMessage::Text(text) = msg {
            let _ = state.received.send(text);
        }
    }
}

async fn spawn_server(
) -> anyhow::Result<(String, mpsc::UnboundedReceiver<String>, mpsc::UnboundedReceiver<HashMap<String, String>>)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (received, received_rx) = mpsc::unbounded_channel();
    let (queries, queries_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/api/events/connect", get(ws_handler))
        .with_state(ServerState { received, queries });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/api"), received_rx, queries_rx))
}

#[tokio::test]
async fn client_follows_the_mailbox_over_a_real_websocket() -> anyhow::Result<()> {
    let (server_url, mut received, mut queries) = spawn_server().await?;
    let space_id = SpaceId::new();
    let user_id = UserId::new();
    let settings = ClientSettings {
        server_url,
        ..ClientSettings::default()
    };
    let client = ChatClient::start(settings, space_id, Some(user_id))?;

    let query = tokio::time::timeout(Duration::from_secs(5), queries.recv())
        .await?
        .expect("server saw the upgrade");
    assert_eq!(query.get("mailbox"), Some(&space_id.to_string()));
    assert_eq!(query.get("userId"), Some(&user_id.to_string()));
    assert_eq!(query.get("after"), None);

    let pong = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await?
        .expect("client answered the ping");
    assert_eq!(pong, PONG);

    let mut updates = client.store.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let done = updates.borrow_and_update().context.initialized;
            if done {
                break;
            }
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await?;
    let state = client.store.get();
    assert!(state.context.initialized);
    assert_eq!(state.last_event_id, EventId::at(500));
    assert!(state.connection.is_connected());

    client.shutdown();
    Ok(())
}

#[tokio::test]
async fn start_rejects_an_unusable_server_url() {
    let settings = ClientSettings {
        server_url: "ftp://example.test".to_string(),
        ..ClientSettings::default()
    };
    assert!(ChatClient::start(settings, SpaceId::new(), None).is_err());
}
