//! Async chat client: drives the request controller against a backend and
//! keeps the conversation list in sync with the server.
//!
//! The controller lives behind a `tokio::sync::Mutex` that is never held
//! across network I/O, so every state transition is applied atomically in
//! the order the lock is taken.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use shared::{
    domain::{AiMode, ConversationId, SequenceId},
    protocol::{CalendarAuthStatus, CalendarCallbackResponse, ConversationSummary},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    backend::ChatBackend,
    calendar::{spawn_auth_poll, AuthPollCancel, AuthPollOutcome, PollSettings},
    controller::{
        ControllerOptions, Outcome, PendingRequest, PendingState, RequestController, Resolution,
    },
    error::{RequestFailure, SubmitError},
    events::{ClientEvent, Notice},
    intent::{ChatOnly, IntentClassifier, Route},
    transcript::MessageSlot,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub controller: ControllerOptions,
    /// When set, a request without a response after this long resolves as a
    /// network failure.
    pub request_timeout: Option<Duration>,
    pub calendar_poll: PollSettings,
}

/// Everything a dispatched request brings back besides the slot outcome.
#[derive(Debug, Default)]
struct Reply {
    suggestions: Option<Vec<String>>,
    ai_mode: Option<AiMode>,
    auth_url: Option<String>,
}

struct ClientState {
    controller: RequestController,
    conversations: Vec<ConversationSummary>,
    current_conversation: Option<ConversationId>,
    ai_mode: Option<AiMode>,
    suggestions: Vec<String>,
    /// Bumped by every list refresh and every local conversation change. A
    /// refresh only applies if nothing bumped it while the request was out.
    list_generation: u64,
    calendar_poll: Option<(u64, AuthPollCancel)>,
    poll_counter: u64,
}

impl ClientState {
    fn next_list_generation(&mut self) -> u64 {
        self.list_generation += 1;
        self.list_generation
    }
}

pub struct ChatClient {
    backend: Arc<dyn ChatBackend>,
    intent: Arc<dyn IntentClassifier>,
    request_timeout: Option<Duration>,
    calendar_poll: PollSettings,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Arc<Self> {
        Self::new_with_dependencies(backend, Arc::new(ChatOnly), ClientOptions::default())
    }

    pub fn new_with_dependencies(
        backend: Arc<dyn ChatBackend>,
        intent: Arc<dyn IntentClassifier>,
        options: ClientOptions,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            backend,
            intent,
            request_timeout: options.request_timeout,
            calendar_poll: options.calendar_poll,
            inner: Mutex::new(ClientState {
                controller: RequestController::new(options.controller),
                conversations: Vec::new(),
                current_conversation: None,
                ai_mode: None,
                suggestions: Vec::new(),
                list_generation: 0,
                calendar_poll: None,
                poll_counter: 0,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub async fn pending_state(&self) -> PendingState {
        self.inner.lock().await.controller.pending_state()
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.lock().await.controller.is_busy()
    }

    pub async fn transcript(&self) -> Vec<MessageSlot> {
        self.inner.lock().await.controller.transcript().slots().to_vec()
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.lock().await.conversations.clone()
    }

    pub async fn current_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().await.current_conversation.clone()
    }

    pub async fn ai_mode(&self) -> Option<AiMode> {
        self.inner.lock().await.ai_mode.clone()
    }

    pub async fn suggestions(&self) -> Vec<String> {
        self.inner.lock().await.suggestions.clone()
    }

    /// Loads the conversation list and, if the server reports one as
    /// current, its transcript.
    pub async fn start(&self) -> Result<()> {
        let conversations = self.refresh_conversations().await?;
        let Some(current) = conversations.iter().find(|c| c.is_current) else {
            return Ok(());
        };
        let id = current.id.clone();
        let detail = self.backend.fetch_conversation(&id).await?;

        let (slots, state) = {
            let mut guard = self.inner.lock().await;
            guard.controller.load_history(&detail.messages);
            guard.ai_mode = detail.ai_mode.clone().or_else(|| current.ai_mode.clone());
            (
                guard.controller.transcript().slots().to_vec(),
                guard.controller.pending_state(),
            )
        };
        info!(
            conversation_id = %id,
            messages = detail.messages.len(),
            "restored current conversation"
        );
        self.emit(ClientEvent::TranscriptReplaced(slots));
        self.emit(ClientEvent::PendingChanged(state));
        self.emit(ClientEvent::AiModeChanged(self.ai_mode().await));
        Ok(())
    }

    /// Accepts a question and dispatches it in the background. Returns as
    /// soon as both slots exist; the answer arrives as a `SlotUpdated` event.
    pub async fn submit(self: &Arc<Self>, question: &str) -> Result<SequenceId, SubmitError> {
        let route = self.intent.route(question);
        let now = tokio::time::Instant::now().into_std();

        let accepted = {
            let mut guard = self.inner.lock().await;
            guard.controller.submit(question, route, now).map(|request| {
                let transcript = guard.controller.transcript();
                let user = transcript.get(&request.user_slot).cloned();
                let bot = transcript.get(&request.bot_slot).cloned();
                (request, user, bot, guard.controller.pending_state())
            })
        };

        let (request, user, bot, state) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                debug!("submission rejected: {err}");
                self.emit(ClientEvent::Notice(match &err {
                    SubmitError::Validation => Notice::error("Please enter a question."),
                    SubmitError::Busy | SubmitError::RateLimited { .. } => {
                        Notice::info(err.to_string())
                    }
                }));
                return Err(err);
            }
        };

        for slot in [user, bot].into_iter().flatten() {
            self.emit(ClientEvent::SlotAppended(slot));
        }
        self.emit(ClientEvent::PendingChanged(state));

        let sequence_id = request.sequence_id;
        info!(sequence_id = sequence_id.0, route = %request.route, "dispatching question");
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.dispatch(request).await;
        });
        Ok(sequence_id)
    }

    /// Asks the follow-up suggestion at `index` (zero-based) from the last
    /// answer as if it had been typed.
    pub async fn submit_suggestion(self: &Arc<Self>, index: usize) -> Result<SequenceId> {
        let question = self.inner.lock().await.suggestions.get(index).cloned();
        let Some(question) = question else {
            return Err(anyhow!("no suggestion number {}", index + 1));
        };
        Ok(self.submit(&question).await?)
    }

    async fn dispatch(&self, request: PendingRequest) {
        let exchange = self.exchange(&request);
        let (outcome, reply) = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(result) => result,
                Err(_) => (
                    Outcome::Failed(RequestFailure::Network(format!(
                        "no response after {}s",
                        limit.as_secs()
                    ))),
                    Reply::default(),
                ),
            },
            None => exchange.await,
        };
        self.apply(request.sequence_id, outcome, reply).await;
    }

    async fn exchange(&self, request: &PendingRequest) -> (Outcome, Reply) {
        match request.route {
            Route::Chat => match self.backend.ask(&request.question).await {
                Ok(response) => match (response.error, response.answer) {
                    (Some(error), _) => (
                        Outcome::Failed(RequestFailure::Server(error)),
                        Reply::default(),
                    ),
                    (None, Some(answer)) => (
                        Outcome::Answer(answer),
                        Reply {
                            suggestions: Some(response.suggestions),
                            ai_mode: response.ai_mode,
                            auth_url: None,
                        },
                    ),
                    (None, None) => (
                        Outcome::Failed(RequestFailure::Server(
                            "the server returned an empty answer".to_string(),
                        )),
                        Reply::default(),
                    ),
                },
                Err(failure) => (Outcome::Failed(failure), Reply::default()),
            },
            Route::Calendar => match self.backend.process_calendar(&request.question).await {
                Ok(response) => {
                    let auth_url = response.required_auth_url().map(str::to_string);
                    (
                        Outcome::Answer(response.message),
                        Reply {
                            auth_url,
                            ..Reply::default()
                        },
                    )
                }
                Err(failure) => (Outcome::Failed(failure), Reply::default()),
            },
        }
    }

    /// Resolves a pending request from outside the dispatch path. Unknown or
    /// already resolved ids are discarded without side effects.
    pub async fn resolve(&self, sequence_id: SequenceId, outcome: Outcome) -> Resolution {
        self.apply(sequence_id, outcome, Reply::default()).await
    }

    async fn apply(&self, sequence_id: SequenceId, outcome: Outcome, reply: Reply) -> Resolution {
        let succeeded = matches!(outcome, Outcome::Answer(_));
        let (resolution, state, mode_changed, suggestions) = {
            let mut guard = self.inner.lock().await;
            let resolution = guard.controller.resolve(sequence_id, outcome);
            let mut mode_changed = None;
            let mut suggestions = None;
            if resolution.is_applied() && succeeded {
                if let Some(mode) = reply.ai_mode {
                    guard.ai_mode = Some(mode.clone());
                    mode_changed = Some(mode);
                }
                if let Some(list) = reply.suggestions {
                    guard.suggestions = list.clone();
                    suggestions = Some(list);
                }
            }
            (resolution, guard.controller.pending_state(), mode_changed, suggestions)
        };

        let applied_slot = match &resolution {
            Resolution::Applied { slot, .. } => Some(slot.clone()),
            Resolution::Discarded => None,
        };
        let Some(slot) = applied_slot else {
            debug!(sequence_id = sequence_id.0, "late or duplicate response ignored");
            return resolution;
        };

        self.emit(ClientEvent::SlotUpdated(slot));
        self.emit(ClientEvent::PendingChanged(state));
        if let Some(list) = suggestions {
            self.emit(ClientEvent::SuggestionsUpdated(list));
        }
        if let Some(mode) = mode_changed {
            self.emit(ClientEvent::AiModeChanged(Some(mode)));
        }
        if let Some(auth_url) = reply.auth_url {
            self.emit(ClientEvent::CalendarAuthRequired { auth_url });
        }

        if let Err(err) = self.refresh_conversations().await {
            warn!("conversation refresh after answer failed: {err:#}");
        }
        resolution
    }

    /// Replaces the local conversation list with the server's. The server's
    /// `is_current` flag overrides any optimistic local choice. A reply that
    /// was overtaken by a newer refresh or a local conversation change is
    /// returned but not applied.
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let ticket = self.inner.lock().await.next_list_generation();
        let conversations = self.backend.list_conversations().await?;
        let current = conversations
            .iter()
            .find(|c| c.is_current)
            .map(|c| c.id.clone());
        {
            let mut guard = self.inner.lock().await;
            if guard.list_generation != ticket {
                debug!(ticket, latest = guard.list_generation, "stale conversation list dropped");
                return Ok(conversations);
            }
            guard.conversations = conversations.clone();
            guard.current_conversation = current.clone();
        }
        debug!(count = conversations.len(), "conversation list refreshed");
        self.emit(ClientEvent::ConversationsUpdated {
            conversations: conversations.clone(),
            current,
        });
        Ok(conversations)
    }

    pub async fn create_conversation(&self) -> Result<ConversationId> {
        let id = match self.backend.create_conversation().await {
            Ok(id) => id,
            Err(err) => {
                self.emit(ClientEvent::Notice(Notice::error(format!(
                    "Could not create a new conversation: {err}"
                ))));
                return Err(err);
            }
        };

        let (dropped, state) = {
            let mut guard = self.inner.lock().await;
            let dropped = guard.controller.supersede();
            guard.next_list_generation();
            guard.current_conversation = Some(id.clone());
            guard.ai_mode = None;
            guard.suggestions.clear();
            (dropped, guard.controller.pending_state())
        };
        info!(conversation_id = %id, superseded = dropped.len(), "created conversation");
        self.emit(ClientEvent::TranscriptReplaced(Vec::new()));
        self.emit(ClientEvent::PendingChanged(state));
        self.emit(ClientEvent::AiModeChanged(None));
        self.emit(ClientEvent::SuggestionsUpdated(Vec::new()));

        if let Err(err) = self.refresh_conversations().await {
            warn!("conversation refresh after create failed: {err:#}");
        }
        self.emit(ClientEvent::Notice(Notice::success("New conversation created.")));
        Ok(id)
    }

    pub async fn switch_conversation(&self, id: &ConversationId) -> Result<()> {
        let switched_mode = match self.backend.switch_conversation(id).await {
            Ok(mode) => mode,
            Err(err) => {
                self.emit(ClientEvent::Notice(Notice::error(format!(
                    "Could not switch conversation: {err}"
                ))));
                return Err(err);
            }
        };
        let detail = self.backend.fetch_conversation(id).await;

        let (dropped, slots, state, mode) = {
            let mut guard = self.inner.lock().await;
            let (dropped, history_mode) = match &detail {
                Ok(detail) => (
                    guard.controller.load_history(&detail.messages),
                    detail.ai_mode.clone(),
                ),
                Err(_) => (guard.controller.supersede(), None),
            };
            guard.next_list_generation();
            guard.current_conversation = Some(id.clone());
            guard.ai_mode = switched_mode.or(history_mode);
            guard.suggestions.clear();
            (
                dropped,
                guard.controller.transcript().slots().to_vec(),
                guard.controller.pending_state(),
                guard.ai_mode.clone(),
            )
        };
        info!(conversation_id = %id, superseded = dropped.len(), "switched conversation");
        self.emit(ClientEvent::TranscriptReplaced(slots));
        self.emit(ClientEvent::PendingChanged(state));
        self.emit(ClientEvent::AiModeChanged(mode));
        self.emit(ClientEvent::SuggestionsUpdated(Vec::new()));

        if let Err(err) = &detail {
            self.emit(ClientEvent::Notice(Notice::error(format!(
                "Could not load messages: {err}"
            ))));
        }
        if let Err(err) = self.refresh_conversations().await {
            warn!("conversation refresh after switch failed: {err:#}");
        }
        detail.map(|_| ())
    }

    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        if let Err(err) = self.backend.delete_conversation(id).await {
            self.emit(ClientEvent::Notice(Notice::error(format!(
                "Could not delete conversation: {err}"
            ))));
            return Err(err);
        }

        let cleared = {
            let mut guard = self.inner.lock().await;
            guard.next_list_generation();
            if guard.current_conversation.as_ref() == Some(id) {
                guard.controller.supersede();
                guard.current_conversation = None;
                guard.ai_mode = None;
                guard.suggestions.clear();
                Some(guard.controller.pending_state())
            } else {
                None
            }
        };
        info!(conversation_id = %id, was_current = cleared.is_some(), "deleted conversation");
        if let Some(state) = cleared {
            self.emit(ClientEvent::TranscriptReplaced(Vec::new()));
            self.emit(ClientEvent::PendingChanged(state));
            self.emit(ClientEvent::AiModeChanged(None));
        }

        if let Err(err) = self.refresh_conversations().await {
            warn!("conversation refresh after delete failed: {err:#}");
        }
        self.emit(ClientEvent::Notice(Notice::success("Conversation deleted.")));
        Ok(())
    }

    /// Starts a fresh client session: numbering restarts and nothing is pending.
    pub async fn reset(&self) {
        let state = {
            let mut guard = self.inner.lock().await;
            guard.controller.reset();
            guard.suggestions.clear();
            guard.controller.pending_state()
        };
        self.emit(ClientEvent::TranscriptReplaced(Vec::new()));
        self.emit(ClientEvent::PendingChanged(state));
    }

    pub async fn calendar_status(&self) -> Result<CalendarAuthStatus> {
        self.backend.calendar_auth_status().await
    }

    /// Fetches the authorization link and polls until the grant lands.
    /// A poll already running is cancelled first.
    pub async fn begin_calendar_auth(self: &Arc<Self>) -> Result<String> {
        let auth_url = self.backend.calendar_auth_url().await?;
        let handle = spawn_auth_poll(Arc::clone(&self.backend), self.calendar_poll);
        let poll_id = {
            let mut guard = self.inner.lock().await;
            guard.poll_counter += 1;
            let poll_id = guard.poll_counter;
            let replaced = guard.calendar_poll.replace((poll_id, handle.canceller()));
            if let Some((_, previous)) = replaced {
                previous.cancel();
            }
            poll_id
        };
        self.emit(ClientEvent::CalendarAuthRequired {
            auth_url: auth_url.clone(),
        });

        let client = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = handle.join().await;
            client.finish_calendar_auth(poll_id, outcome).await;
        });
        Ok(auth_url)
    }

    pub async fn cancel_calendar_auth(&self) {
        if let Some((_, cancel)) = self.inner.lock().await.calendar_poll.take() {
            cancel.cancel();
        }
    }

    /// Reports a finished poll. Outcomes of a poll that has since been
    /// replaced or cancelled are ignored.
    async fn finish_calendar_auth(&self, poll_id: u64, outcome: AuthPollOutcome) {
        {
            let mut guard = self.inner.lock().await;
            let is_current = matches!(&guard.calendar_poll, Some((id, _)) if *id == poll_id);
            if !is_current {
                debug!(poll_id, ?outcome, "outcome of a superseded calendar poll ignored");
                return;
            }
            guard.calendar_poll = None;
        }
        match outcome {
            AuthPollOutcome::Authenticated { user_email } => {
                self.emit(ClientEvent::CalendarAuthCompleted { user_email });
                self.emit(ClientEvent::Notice(Notice::success(
                    "Calendar connected. Calendar requests are now available.",
                )));
            }
            AuthPollOutcome::TimedOut => {
                self.emit(ClientEvent::Notice(Notice::error(
                    "Calendar authorization timed out. Start it again to retry.",
                )));
            }
            AuthPollOutcome::Cancelled => debug!("calendar auth poll ended by cancel"),
        }
    }

    /// Hands a manually copied authorization code to the server.
    pub async fn complete_calendar_auth(&self, code: &str) -> Result<CalendarCallbackResponse> {
        let code = code.trim();
        if code.is_empty() {
            return Err(anyhow!("authorization code must not be empty"));
        }
        let response = self.backend.calendar_auth_callback(code).await?;
        if response.success {
            self.cancel_calendar_auth().await;
            self.emit(ClientEvent::CalendarAuthCompleted {
                user_email: response.user_email().map(str::to_string),
            });
            self.emit(ClientEvent::Notice(Notice::success(response.message.clone())));
        } else {
            self.emit(ClientEvent::Notice(Notice::error(response.message.clone())));
        }
        Ok(response)
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
