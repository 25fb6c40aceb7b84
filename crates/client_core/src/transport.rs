use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{stream::BoxStream, SinkExt, StreamExt};
use shared::{domain::{SpaceId, UserId}, protocol::EventId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingFrame {
    Text(String),
    Close,
}

/// Both halves of an open mailbox socket. The incoming stream ends when the
/// socket closes.
pub struct MailboxSocket {
    pub outgoing: mpsc::UnboundedSender<OutgoingFrame>,
    pub incoming: BoxStream<'static, Result<String>>,
}

#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<MailboxSocket>;
}

/// Rewrites an http(s) base into its ws(s) counterpart.
pub fn websocket_base(server_url: &str) -> Result<String> {
    if server_url.starts_with("https://") {
        Ok(server_url.replacen("https://", "wss://", 1))
    } else if server_url.starts_with("http://") {
        Ok(server_url.replacen("http://", "ws://", 1))
    } else if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
        Ok(server_url.to_string())
    } else {
        Err(anyhow!("server_url must start with http:// or https://"))
    }
}

/// `{base}/events/connect?mailbox=..` with the resumption cursor when one exists.
pub fn mailbox_url(
    ws_base: &str,
    mailbox: SpaceId,
    after: EventId,
    user_id: Option<UserId>,
) -> Result<Url> {
    let base = ws_base.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/events/connect"))
        .with_context(|| format!("invalid websocket base url: {ws_base}"))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("mailbox", &mailbox.to_string());
        if !after.is_zero() {
            query.append_pair("after", &after.timestamp.to_string());
            query.append_pair("node", &after.node.to_string());
            query.append_pair("seq", &after.seq.to_string());
        }
        if let Some(user_id) = user_id {
            query.append_pair("userId", &user_id.to_string());
        }
    }
    Ok(url)
}

pub struct WsConnector;

#[async_trait]
impl MailboxConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<MailboxSocket> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<OutgoingFrame>();
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                match frame {
                    OutgoingFrame::Text(text) => {
                        if let Err(err) = ws_writer.send(Message::Text(text)).await {
                            warn!("transport: websocket send failed: {err}");
                            break;
                        }
                    }
                    OutgoingFrame::Close => {
                        if let Err(err) = ws_writer.close().await {
                            debug!("transport: websocket close failed: {err}");
                        }
                        break;
                    }
                }
            }
        });

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Result<String>>();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.send(Ok(text)).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = incoming_tx.send(Err(anyhow!("websocket receive failed: {err}")));
                        break;
                    }
                }
            }
        });

        Ok(MailboxSocket {
            outgoing,
            incoming: UnboundedReceiverStream::new(incoming_rx).boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_bases_map_to_websocket_schemes() {
        assert_eq!(
            websocket_base("https://chat.example").expect("https"),
            "wss://chat.example"
        );
        assert_eq!(
            websocket_base("http://127.0.0.1:3000").expect("http"),
            "ws://127.0.0.1:3000"
        );
        assert!(websocket_base("ftp://nope").is_err());
    }

    #[test]
    fn mailbox_url_carries_cursor_only_when_set() {
        let mailbox = SpaceId::new();
        let fresh = mailbox_url("ws://localhost/api/", mailbox, EventId::zero(), None)
            .expect("fresh url");
        assert_eq!(
            fresh.as_str(),
            format!("ws://localhost/api/events/connect?mailbox={mailbox}")
        );

        let user_id = UserId::new();
        let resumed = mailbox_url(
            "ws://localhost",
            mailbox,
            EventId {
                timestamp: 100,
                node: 2,
                seq: 7,
            },
            Some(user_id),
        )
        .expect("resumed url");
        let pairs: Vec<(String, String)> = resumed.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("after".to_string(), "100".to_string())));
        assert!(pairs.contains(&("node".to_string(), "2".to_string())));
        assert!(pairs.contains(&("seq".to_string(), "7".to_string())));
        assert!(pairs.contains(&("userId".to_string(), user_id.to_string())));
    }
}
