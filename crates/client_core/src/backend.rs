use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{AiMode, ConversationId},
    protocol::{
        CalendarAuthStatus, CalendarCallbackResponse, CalendarProcessResponse, ChatResponse,
        ConversationDetail, ConversationSummary,
    },
};

use crate::error::RequestFailure;

/// Server endpoints the chat client consumes.
///
/// `ask` and `process_calendar` report failures as [`RequestFailure`] since
/// their outcome lands in a transcript slot; everything else uses `anyhow`.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn create_conversation(&self) -> Result<ConversationId>;
    async fn switch_conversation(&self, id: &ConversationId) -> Result<Option<AiMode>>;
    async fn delete_conversation(&self, id: &ConversationId) -> Result<()>;
    async fn fetch_conversation(&self, id: &ConversationId) -> Result<ConversationDetail>;
    async fn ask(&self, question: &str) -> std::result::Result<ChatResponse, RequestFailure>;
    async fn process_calendar(
        &self,
        message: &str,
    ) -> std::result::Result<CalendarProcessResponse, RequestFailure>;
    async fn calendar_auth_status(&self) -> Result<CalendarAuthStatus>;
    async fn calendar_auth_url(&self) -> Result<String>;
    async fn calendar_auth_callback(&self, code: &str) -> Result<CalendarCallbackResponse>;
}

pub struct MissingChatBackend;

#[async_trait]
impl ChatBackend for MissingChatBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Err(anyhow!("chat backend unavailable"))
    }

    async fn create_conversation(&self) -> Result<ConversationId> {
        Err(anyhow!("chat backend unavailable"))
    }

    async fn switch_conversation(&self, id: &ConversationId) -> Result<Option<AiMode>> {
        Err(anyhow!("chat backend unavailable; cannot switch to {id}"))
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        Err(anyhow!("chat backend unavailable; cannot delete {id}"))
    }

    async fn fetch_conversation(&self, id: &ConversationId) -> Result<ConversationDetail> {
        Err(anyhow!("chat backend unavailable; cannot load {id}"))
    }

    async fn ask(&self, _question: &str) -> std::result::Result<ChatResponse, RequestFailure> {
        Err(RequestFailure::Network("chat backend unavailable".into()))
    }

    async fn process_calendar(
        &self,
        _message: &str,
    ) -> std::result::Result<CalendarProcessResponse, RequestFailure> {
        Err(RequestFailure::Network("chat backend unavailable".into()))
    }

    async fn calendar_auth_status(&self) -> Result<CalendarAuthStatus> {
        Err(anyhow!("chat backend unavailable"))
    }

    async fn calendar_auth_url(&self) -> Result<String> {
        Err(anyhow!("chat backend unavailable"))
    }

    async fn calendar_auth_callback(&self, _code: &str) -> Result<CalendarCallbackResponse> {
        Err(anyhow!("chat backend unavailable"))
    }
}
