use std::time::Duration;

use thiserror::Error;

/// Why a question was not accepted. None of these touch controller state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("question must not be empty")]
    Validation,
    #[error("a previous question is still waiting for its answer")]
    Busy,
    #[error("sending too fast; retry in {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },
}

/// Terminal failure of a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestFailure {
    /// No response was obtained (connect error, decode error, timeout).
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with an error payload.
    #[error("server error: {0}")]
    Server(String),
}

impl RequestFailure {
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }
}
