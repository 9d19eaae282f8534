//! Client core for the chat frontend: request lifecycle, conversation sync,
//! and the calendar authorization flow, independent of any presentation layer.

pub mod backend;
pub mod calendar;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod http;
pub mod intent;
pub mod transcript;

pub use backend::{ChatBackend, MissingChatBackend};
pub use calendar::{AuthPollOutcome, PollSettings};
pub use client::{ChatClient, ClientOptions};
pub use config::{load_settings, ClientSettings};
pub use controller::{
    ControllerOptions, Outcome, PendingRequest, PendingState, RequestController, Resolution,
};
pub use error::{RequestFailure, SubmitError};
pub use events::{ClientEvent, Notice, NoticeLevel};
pub use http::HttpChatBackend;
pub use intent::{ChatOnly, IntentClassifier, KeywordIntent, Route};
pub use transcript::{MessageSlot, SlotId, SlotState, Transcript};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
