use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{AiMode, ConversationId, UserId};

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses the timestamp shapes the server mixes: RFC 3339, ISO-8601 without
/// an offset, and SQLite's `CURRENT_TIMESTAMP` text.
pub fn parse_server_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_utc());
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_server_timestamp))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_mode: Option<AiMode>,
    #[serde(default)]
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationListResponse {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedConversation {
    pub id: ConversationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    pub conversation: CreatedConversation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchedConversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_mode: Option<AiMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConversationResponse {
    #[serde(default)]
    pub conversation: SwitchedConversation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(default)]
    pub messages: Vec<TranscriptEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_mode: Option<AiMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetailResponse {
    pub conversation: ConversationDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_mode: Option<AiMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarProcessRequest {
    pub message: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarProcessResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl CalendarProcessResponse {
    /// Authorization link when the server asks the user to connect a calendar first.
    pub fn required_auth_url(&self) -> Option<&str> {
        let data = self.data.as_ref()?;
        let requires_auth = data
            .get("requires_auth")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if !requires_auth && self.action.as_deref() != Some("auth_required") {
            return None;
        }
        match data.get("auth_url")? {
            serde_json::Value::String(url) => Some(url.as_str()),
            // the server sometimes nests the `/calendar/auth/url` reply here
            serde_json::Value::Object(inner) => inner.get("auth_url")?.as_str(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarAuthStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarAuthUrlResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarCallbackRequest {
    pub code: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarCallbackResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CalendarCallbackResponse {
    pub fn user_email(&self) -> Option<&str> {
        self.data.as_ref()?.get("user_email")?.as_str()
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
