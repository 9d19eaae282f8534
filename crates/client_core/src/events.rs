//! Events published to the presentation layer.

use shared::{
    domain::{AiMode, ConversationId},
    protocol::ConversationSummary,
};

use crate::{controller::PendingState, transcript::MessageSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Transient message shown outside the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SlotAppended(MessageSlot),
    /// A bot placeholder reached its final content or error.
    SlotUpdated(MessageSlot),
    TranscriptReplaced(Vec<MessageSlot>),
    ConversationsUpdated {
        conversations: Vec<ConversationSummary>,
        current: Option<ConversationId>,
    },
    AiModeChanged(Option<AiMode>),
    SuggestionsUpdated(Vec<String>),
    PendingChanged(PendingState),
    Notice(Notice),
    CalendarAuthRequired {
        auth_url: String,
    },
    CalendarAuthCompleted {
        user_email: Option<String>,
    },
}
