//! Request-lifecycle controller.
//!
//! Owns the sequence counter, the pending-request table and the transcript
//! slots. Every accepted question gets a user slot and a bot placeholder, and
//! exactly one call to [`RequestController::resolve`] may turn that
//! placeholder into a final answer or an error. Resolutions for ids that are
//! no longer pending are discarded without touching any slot.
//!
//! The controller is synchronous and does no I/O; the caller supplies `now`
//! so gating is deterministic under test.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use shared::{domain::SequenceId, protocol::TranscriptEntry};
use tracing::{debug, warn};

use crate::{
    error::{RequestFailure, SubmitError},
    intent::Route,
    transcript::{MessageSlot, SlotId, SlotState, Transcript},
};

pub const DEFAULT_MIN_SUBMIT_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_TYPING_PLACEHOLDER: &str = "Answering...";
pub const DEFAULT_NETWORK_APOLOGY: &str =
    "Something went wrong while sending your question. Please try again.";

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub min_submit_interval: Duration,
    pub typing_placeholder: String,
    pub network_apology: String,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            min_submit_interval: DEFAULT_MIN_SUBMIT_INTERVAL,
            typing_placeholder: DEFAULT_TYPING_PLACEHOLDER.to_string(),
            network_apology: DEFAULT_NETWORK_APOLOGY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub sequence_id: SequenceId,
    pub question: String,
    pub route: Route,
    pub user_slot: SlotId,
    pub bot_slot: SlotId,
    pub accepted_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Answer(String),
    Failed(RequestFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The bot slot was finalized and the pending entry removed.
    Applied {
        request: PendingRequest,
        slot: MessageSlot,
    },
    /// Nothing was pending under this id; no state changed.
    Discarded,
}

impl Resolution {
    pub fn is_applied(&self) -> bool {
        matches!(self, Resolution::Applied { .. })
    }
}

/// Read-only view used by the presentation layer to enable or disable input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingState {
    pub busy: bool,
    pub pending: usize,
    pub last_sequence: Option<SequenceId>,
}

#[derive(Debug)]
pub struct RequestController {
    options: ControllerOptions,
    counter: u64,
    pending: HashMap<SequenceId, PendingRequest>,
    last_accepted_at: Option<Instant>,
    transcript: Transcript,
}

impl Default for RequestController {
    fn default() -> Self {
        Self::new(ControllerOptions::default())
    }
}

impl RequestController {
    pub fn new(options: ControllerOptions) -> Self {
        Self {
            options,
            counter: 0,
            pending: HashMap::new(),
            last_accepted_at: None,
            transcript: Transcript::new(),
        }
    }

    /// The busy gate is held exactly while a request is pending.
    pub fn is_busy(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, sequence_id: SequenceId) -> Option<&PendingRequest> {
        self.pending.get(&sequence_id)
    }

    pub fn last_sequence(&self) -> Option<SequenceId> {
        (self.counter > 0).then_some(SequenceId(self.counter))
    }

    pub fn pending_state(&self) -> PendingState {
        PendingState {
            busy: self.is_busy(),
            pending: self.pending.len(),
            last_sequence: self.last_sequence(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Accepts `question` if it passes validation, the busy gate and the rate
    /// limit. On success both slots exist and the request is pending.
    pub fn submit(
        &mut self,
        question: &str,
        route: Route,
        now: Instant,
    ) -> Result<PendingRequest, SubmitError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SubmitError::Validation);
        }
        if self.is_busy() {
            return Err(SubmitError::Busy);
        }
        if let Some(last) = self.last_accepted_at {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.options.min_submit_interval {
                return Err(SubmitError::RateLimited {
                    retry_after: self.options.min_submit_interval - elapsed,
                });
            }
        }

        self.counter += 1;
        let sequence_id = SequenceId(self.counter);
        let request = PendingRequest {
            sequence_id,
            question: question.to_string(),
            route,
            user_slot: SlotId::user(sequence_id),
            bot_slot: SlotId::bot(sequence_id),
            accepted_at: now,
        };

        self.transcript.push(MessageSlot {
            id: request.user_slot,
            content: request.question.clone(),
            state: SlotState::Final,
        });
        self.transcript.push(MessageSlot {
            id: request.bot_slot,
            content: self.options.typing_placeholder.clone(),
            state: SlotState::Typing,
        });
        self.pending.insert(sequence_id, request.clone());
        self.last_accepted_at = Some(now);

        debug!(sequence_id = sequence_id.0, route = %route, "question accepted");
        Ok(request)
    }

    /// Applies the single resolution of `sequence_id`. Idempotent: a second
    /// call, or a call after [`supersede`](Self::supersede), is discarded.
    pub fn resolve(&mut self, sequence_id: SequenceId, outcome: Outcome) -> Resolution {
        let Some(request) = self.pending.remove(&sequence_id) else {
            debug!(sequence_id = sequence_id.0, "discarding resolution for unknown request");
            return Resolution::Discarded;
        };

        let (content, state) = match outcome {
            Outcome::Answer(answer) => (answer, SlotState::Final),
            Outcome::Failed(RequestFailure::Network(reason)) => {
                warn!(sequence_id = sequence_id.0, %reason, "request failed before a response");
                (self.options.network_apology.clone(), SlotState::Failed)
            }
            Outcome::Failed(RequestFailure::Server(message)) => {
                warn!(sequence_id = sequence_id.0, %message, "server reported an error");
                (message, SlotState::Failed)
            }
        };

        match self.transcript.update(&request.bot_slot, content, state) {
            Some(slot) => Resolution::Applied {
                slot: slot.clone(),
                request,
            },
            None => {
                // Slots and pending entries are cleared together, so this
                // only happens if the two drift apart.
                warn!(
                    sequence_id = sequence_id.0,
                    slot = %request.bot_slot,
                    "pending request had no bot slot"
                );
                Resolution::Discarded
            }
        }
    }

    /// Logically cancels every pending request and empties the transcript.
    /// The rate-limit clock keeps running.
    pub fn supersede(&mut self) -> Vec<SequenceId> {
        let mut dropped: Vec<SequenceId> = self.pending.drain().map(|(id, _)| id).collect();
        dropped.sort();
        self.transcript.clear();
        if !dropped.is_empty() {
            debug!(?dropped, "superseded pending requests");
        }
        dropped
    }

    /// Replaces the transcript with server history. Anything pending is
    /// superseded first since its slots disappear.
    pub fn load_history(&mut self, entries: &[TranscriptEntry]) -> Vec<SequenceId> {
        let dropped = self.supersede();
        self.transcript.replace_with_history(entries);
        dropped
    }

    /// Starts a fresh client session: sequence numbering restarts.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.pending.clear();
        self.last_accepted_at = None;
        self.transcript.clear();
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
