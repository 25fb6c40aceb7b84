//! HTTP calls behind the mutation pipeline.

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::MessageId,
    error::{ApiException, ApiResult},
    protocol::{
        EditMessage, GetMessagesByChannel, Message, MoveMessageBetween, NewMessage,
        PresignRequest, PresignResponse,
    },
};
use tracing::debug;

use crate::error::ApiCallError;

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, request: &NewMessage) -> Result<Message, ApiCallError>;
    async fn edit_message(&self, request: &EditMessage) -> Result<Message, ApiCallError>;
    async fn move_message_between(
        &self,
        request: &MoveMessageBetween,
    ) -> Result<Message, ApiCallError>;
    async fn delete_message(&self, message_id: MessageId) -> Result<Message, ApiCallError>;
    /// Archives a message, or restores an archived one.
    async fn toggle_fold(&self, message_id: MessageId) -> Result<Message, ApiCallError>;
    /// A page of history, newest first.
    async fn fetch_messages(
        &self,
        request: &GetMessagesByChannel,
    ) -> Result<Vec<Message>, ApiCallError>;
    async fn presign_media(
        &self,
        request: &PresignRequest,
    ) -> Result<PresignResponse, ApiCallError>;
    async fn upload_media(
        &self,
        url: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), ApiCallError>;
}

#[derive(Clone)]
pub struct HttpChatApi {
    http: Client,
    server_url: String,
}

impl HttpChatApi {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiCallError> {
    let envelope: ApiResult<T> = response.json().await?;
    envelope
        .into_result()
        .map_err(|err| ApiCallError::Rejected(ApiException::from(err)))
}

impl HttpChatApi {
    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiCallError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.server_url))
            .json(body)
            .send()
            .await?;
        unwrap_envelope(response).await
    }

    async fn post_by_id(&self, path: &str, message_id: MessageId) -> Result<Message, ApiCallError> {
        let response = self
            .http
            .post(format!("{}{path}", self.server_url))
            .query(&[("id", message_id.0)])
            .send()
            .await?;
        unwrap_envelope(response).await
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn send_message(&self, request: &NewMessage) -> Result<Message, ApiCallError> {
        self.post_json("/messages/send", request).await
    }

    async fn edit_message(&self, request: &EditMessage) -> Result<Message, ApiCallError> {
        let response = self
            .http
            .patch(format!("{}/messages/edit", self.server_url))
            .json(request)
            .send()
            .await?;
        unwrap_envelope(response).await
    }

    async fn move_message_between(
        &self,
        request: &MoveMessageBetween,
    ) -> Result<Message, ApiCallError> {
        self.post_json("/messages/move_between", request).await
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<Message, ApiCallError> {
        self.post_by_id("/messages/delete", message_id).await
    }

    async fn toggle_fold(&self, message_id: MessageId) -> Result<Message, ApiCallError> {
        self.post_by_id("/messages/toggle_fold", message_id).await
    }

    async fn fetch_messages(
        &self,
        request: &GetMessagesByChannel,
    ) -> Result<Vec<Message>, ApiCallError> {
        let mut query = vec![
            ("channelId", request.channel_id.0.to_string()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(before) = request.before {
            query.push(("before", before.to_string()));
        }
        let response = self
            .http
            .get(format!("{}/messages/by_channel", self.server_url))
            .query(&query)
            .send()
            .await?;
        unwrap_envelope(response).await
    }

    async fn presign_media(
        &self,
        request: &PresignRequest,
    ) -> Result<PresignResponse, ApiCallError> {
        self.post_json("/media/presigned", request).await
    }

    async fn upload_media(
        &self,
        url: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), ApiCallError> {
        let size = bytes.len();
        let response = self
            .http
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiCallError::UploadStatus(status.as_u16()));
        }
        debug!(size, "api: media uploaded");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
