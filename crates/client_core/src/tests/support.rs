//! In-memory backend shared by the client and calendar tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{AiMode, ConversationId},
    protocol::{
        CalendarAuthStatus, CalendarCallbackResponse, CalendarProcessResponse, ChatResponse,
        ConversationDetail, ConversationSummary, TranscriptEntry,
    },
};
use tokio::sync::{broadcast, oneshot};

use crate::{backend::ChatBackend, error::RequestFailure, events::ClientEvent};

type ChatReply = std::result::Result<ChatResponse, RequestFailure>;

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub conversations: StdMutex<Vec<ConversationSummary>>,
    pub details: StdMutex<HashMap<ConversationId, ConversationDetail>>,
    pub switch_modes: StdMutex<HashMap<ConversationId, AiMode>>,
    pub next_created: StdMutex<Option<ConversationId>>,
    pub chat_gates: StdMutex<VecDeque<oneshot::Receiver<ChatReply>>>,
    pub list_gates: StdMutex<VecDeque<oneshot::Receiver<Vec<ConversationSummary>>>>,
    pub list_calls: AtomicU32,
    pub calendar_reply: StdMutex<Option<CalendarProcessResponse>>,
    pub asked: StdMutex<Vec<String>>,
    pub calendar_asked: StdMutex<Vec<String>>,
    pub deleted: StdMutex<Vec<ConversationId>>,
    pub fail_list: StdMutex<bool>,
    pub auth_statuses: StdMutex<VecDeque<Result<CalendarAuthStatus, String>>>,
    pub auth_checks: AtomicU32,
    pub auth_url: StdMutex<Option<String>>,
    pub callback_reply: StdMutex<Option<CalendarCallbackResponse>>,
}

impl FakeBackend {
    /// Holds the next `ask` until the returned sender fires.
    pub fn gate_next_chat(&self) -> oneshot::Sender<ChatReply> {
        let (tx, rx) = oneshot::channel();
        self.chat_gates.lock().expect("gates").push_back(rx);
        tx
    }

    /// Holds the next `list_conversations` until the returned sender supplies
    /// the list it should return.
    pub fn gate_next_list(&self) -> oneshot::Sender<Vec<ConversationSummary>> {
        let (tx, rx) = oneshot::channel();
        self.list_gates.lock().expect("list gates").push_back(rx);
        tx
    }

    /// Waits until `list_conversations` has been entered `calls` times.
    pub async fn wait_for_list_calls(&self, calls: u32) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.list_calls.load(Ordering::SeqCst) < calls {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for list call");
    }

    pub fn set_conversations(&self, conversations: Vec<ConversationSummary>) {
        *self.conversations.lock().expect("conversations") = conversations;
    }

    pub fn set_detail(&self, id: &str, pairs: &[(&str, &str)], ai_mode: Option<&str>) {
        self.details.lock().expect("details").insert(
            ConversationId::new(id),
            ConversationDetail {
                messages: pairs
                    .iter()
                    .map(|(question, answer)| TranscriptEntry {
                        question: question.to_string(),
                        answer: answer.to_string(),
                    })
                    .collect(),
                ai_mode: ai_mode.map(AiMode::new),
            },
        );
    }

    pub fn push_auth_status(&self, status: Result<CalendarAuthStatus, String>) {
        self.auth_statuses.lock().expect("statuses").push_back(status);
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().expect("asked").clone()
    }
}

pub(crate) fn summary(id: &str, message_count: u32, is_current: bool) -> ConversationSummary {
    ConversationSummary {
        id: ConversationId::new(id),
        title: format!("conversation {id}"),
        updated_at: None,
        message_count,
        ai_mode: None,
        is_current,
    }
}

pub(crate) fn answer(text: &str) -> ChatReply {
    Ok(ChatResponse {
        answer: Some(text.to_string()),
        ..ChatResponse::default()
    })
}

/// Waits for the first event matching `pred`, skipping the rest.
pub(crate) async fn next_event<F>(rx: &mut broadcast::Receiver<ClientEvent>, pred: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.list_gates.lock().expect("list gates").pop_front();
        if let Some(rx) = gate {
            return rx.await.map_err(|_| anyhow!("list gate dropped"));
        }
        if *self.fail_list.lock().expect("fail_list") {
            return Err(anyhow!("conversation list unavailable"));
        }
        Ok(self.conversations.lock().expect("conversations").clone())
    }

    async fn create_conversation(&self) -> Result<ConversationId> {
        self.next_created
            .lock()
            .expect("next_created")
            .take()
            .ok_or_else(|| anyhow!("create refused"))
    }

    async fn switch_conversation(&self, id: &ConversationId) -> Result<Option<AiMode>> {
        if !self.details.lock().expect("details").contains_key(id) {
            return Err(anyhow!("conversation {id} not found"));
        }
        Ok(self.switch_modes.lock().expect("modes").get(id).cloned())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        self.deleted.lock().expect("deleted").push(id.clone());
        Ok(())
    }

    async fn fetch_conversation(&self, id: &ConversationId) -> Result<ConversationDetail> {
        self.details
            .lock()
            .expect("details")
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("conversation {id} not found"))
    }

    async fn ask(&self, question: &str) -> ChatReply {
        self.asked.lock().expect("asked").push(question.to_string());
        let gate = self.chat_gates.lock().expect("gates").pop_front();
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(RequestFailure::Network("gate dropped".into()))),
            None => answer(&format!("echo: {question}")),
        }
    }

    async fn process_calendar(
        &self,
        message: &str,
    ) -> std::result::Result<CalendarProcessResponse, RequestFailure> {
        self.calendar_asked
            .lock()
            .expect("calendar_asked")
            .push(message.to_string());
        self.calendar_reply
            .lock()
            .expect("calendar_reply")
            .clone()
            .ok_or_else(|| RequestFailure::Network("calendar unavailable".into()))
    }

    async fn calendar_auth_status(&self) -> Result<CalendarAuthStatus> {
        self.auth_checks.fetch_add(1, Ordering::SeqCst);
        let next = self.auth_statuses.lock().expect("statuses").pop_front();
        match next {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(CalendarAuthStatus {
                status: "not_authenticated".into(),
                ..CalendarAuthStatus::default()
            }),
        }
    }

    async fn calendar_auth_url(&self) -> Result<String> {
        self.auth_url
            .lock()
            .expect("auth_url")
            .clone()
            .ok_or_else(|| anyhow!("calendar auth url unavailable"))
    }

    async fn calendar_auth_callback(&self, _code: &str) -> Result<CalendarCallbackResponse> {
        self.callback_reply
            .lock()
            .expect("callback_reply")
            .clone()
            .ok_or_else(|| anyhow!("callback failed"))
    }
}
