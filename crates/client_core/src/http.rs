//! `reqwest` implementation of [`ChatBackend`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{AiMode, ConversationId, SessionId, UserId},
    error::{ApiError, ApiException},
    protocol::{
        CalendarAuthStatus, CalendarAuthUrlResponse, CalendarCallbackRequest,
        CalendarCallbackResponse, CalendarProcessRequest, CalendarProcessResponse, ChatRequest,
        ChatResponse, ConversationDetail, ConversationDetailResponse, ConversationListResponse,
        ConversationSummary, CreateConversationResponse, SwitchConversationResponse,
    },
};
use tracing::debug;
use url::Url;

use crate::{backend::ChatBackend, error::RequestFailure};

pub const SESSION_HEADER: &str = "X-Session-ID";

pub struct HttpChatBackend {
    http: Client,
    base_url: Url,
    user_id: UserId,
}

impl HttpChatBackend {
    pub fn new(server_url: &str, user_id: UserId, session_id: SessionId) -> Result<Self> {
        let base_url = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("server url '{server_url}' cannot carry a path"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            SESSION_HEADER,
            HeaderValue::from_str(session_id.as_str())
                .context("session id is not a valid header value")?,
        );
        let http = Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url,
            user_id,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn user_query(&self) -> [(&'static str, &str); 1] {
        [("user_id", self.user_id.as_str())]
    }
}

async fn api_error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(body) => body.error,
        Err(_) => format!("server returned {status}"),
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = api_error_message(response).await;
    Err(ApiException::new(status.as_u16(), message).into())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    ensure_success(response)
        .await?
        .json::<T>()
        .await
        .context("failed to decode server response")
}

/// Decodes a body whose outcome belongs in a transcript slot. Error statuses
/// become [`RequestFailure::Server`] carrying the server's `error` text.
async fn decode_slot_reply<T: DeserializeOwned>(
    response: Response,
) -> std::result::Result<T, RequestFailure> {
    let status = response.status();
    if !status.is_success() {
        return Err(RequestFailure::Server(api_error_message(response).await));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| RequestFailure::Network(format!("malformed response: {err}")))
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response = self
            .http
            .get(self.endpoint(&["conversations"])?)
            .query(&self.user_query())
            .send()
            .await
            .context("failed to fetch conversations")?;
        let body: ConversationListResponse = decode(response).await?;
        Ok(body.conversations)
    }

    async fn create_conversation(&self) -> Result<ConversationId> {
        let response = self
            .http
            .post(self.endpoint(&["conversations", "new"])?)
            .query(&self.user_query())
            .send()
            .await
            .context("failed to create conversation")?;
        let body: CreateConversationResponse = decode(response).await?;
        Ok(body.conversation.id)
    }

    async fn switch_conversation(&self, id: &ConversationId) -> Result<Option<AiMode>> {
        let response = self
            .http
            .post(self.endpoint(&["conversations", id.as_str(), "switch"])?)
            .query(&self.user_query())
            .send()
            .await
            .with_context(|| format!("failed to switch to conversation {id}"))?;
        let body: SwitchConversationResponse = decode(response).await?;
        Ok(body.conversation.ai_mode)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        let response = self
            .http
            .delete(self.endpoint(&["conversations", id.as_str()])?)
            .query(&self.user_query())
            .send()
            .await
            .with_context(|| format!("failed to delete conversation {id}"))?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_conversation(&self, id: &ConversationId) -> Result<ConversationDetail> {
        let response = self
            .http
            .get(self.endpoint(&["conversations", id.as_str()])?)
            .query(&self.user_query())
            .send()
            .await
            .with_context(|| format!("failed to load conversation {id}"))?;
        let body: ConversationDetailResponse = decode(response).await?;
        Ok(body.conversation)
    }

    async fn ask(&self, question: &str) -> std::result::Result<ChatResponse, RequestFailure> {
        let url = self.endpoint(&["chat"]).map_err(RequestFailure::network)?;
        debug!(%url, "dispatching chat request");
        let response = self
            .http
            .post(url)
            .json(&ChatRequest {
                question: question.to_string(),
                user_id: self.user_id.clone(),
            })
            .send()
            .await
            .map_err(RequestFailure::network)?;
        decode_slot_reply(response).await
    }

    async fn process_calendar(
        &self,
        message: &str,
    ) -> std::result::Result<CalendarProcessResponse, RequestFailure> {
        let url = self
            .endpoint(&["calendar", "process"])
            .map_err(RequestFailure::network)?;
        debug!(%url, "dispatching calendar request");
        let response = self
            .http
            .post(url)
            .json(&CalendarProcessRequest {
                message: message.to_string(),
                user_id: self.user_id.clone(),
            })
            .send()
            .await
            .map_err(RequestFailure::network)?;
        decode_slot_reply(response).await
    }

    async fn calendar_auth_status(&self) -> Result<CalendarAuthStatus> {
        let response = self
            .http
            .get(self.endpoint(&["calendar", "auth", "status"])?)
            .query(&self.user_query())
            .send()
            .await
            .context("failed to check calendar auth status")?;
        decode(response).await
    }

    async fn calendar_auth_url(&self) -> Result<String> {
        let response = self
            .http
            .get(self.endpoint(&["calendar", "auth", "url"])?)
            .query(&self.user_query())
            .send()
            .await
            .context("failed to request calendar auth url")?;
        let body: CalendarAuthUrlResponse = decode(response).await?;
        match (body.success, body.auth_url) {
            (true, Some(url)) if !url.is_empty() => Ok(url),
            _ => Err(anyhow!(
                "calendar auth url unavailable: {}",
                body.error.unwrap_or_else(|| "no url returned".to_string())
            )),
        }
    }

    async fn calendar_auth_callback(&self, code: &str) -> Result<CalendarCallbackResponse> {
        let response = self
            .http
            .post(self.endpoint(&["calendar", "auth", "callback"])?)
            .json(&CalendarCallbackRequest {
                code: code.to_string(),
                user_id: self.user_id.clone(),
            })
            .send()
            .await
            .context("failed to complete calendar auth")?;
        // a rejected code still carries a message worth showing
        if response.status() == StatusCode::BAD_REQUEST {
            return Ok(response
                .json::<CalendarCallbackResponse>()
                .await
                .unwrap_or_else(|_| CalendarCallbackResponse {
                    success: false,
                    message: "calendar authorization was rejected".to_string(),
                    data: None,
                }));
        }
        decode(response).await
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
