//! Calendar OAuth completion polling.
//!
//! After the user is sent to the authorization page the server learns about
//! the grant on its own callback, so the client re-checks the status on a
//! fixed interval until it flips, the ceiling elapses, or the poll is
//! cancelled.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPollOutcome {
    Authenticated { user_email: Option<String> },
    TimedOut,
    Cancelled,
}

/// Cloneable cancel switch for a running poll.
#[derive(Clone)]
pub struct AuthPollCancel(Arc<watch::Sender<bool>>);

impl AuthPollCancel {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

pub struct AuthPollHandle {
    cancel: AuthPollCancel,
    task: JoinHandle<AuthPollOutcome>,
}

impl AuthPollHandle {
    pub fn canceller(&self) -> AuthPollCancel {
        self.cancel.clone()
    }

    pub async fn join(self) -> AuthPollOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("calendar auth poll task failed: {err}");
                AuthPollOutcome::Cancelled
            }
        }
    }
}

pub fn spawn_auth_poll(backend: Arc<dyn ChatBackend>, settings: PollSettings) -> AuthPollHandle {
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(async move { poll_auth_status(backend.as_ref(), settings, rx).await });
    AuthPollHandle {
        cancel: AuthPollCancel(Arc::new(tx)),
        task,
    }
}

/// Checks the auth status every `settings.interval` until one of the stop
/// conditions holds. Status-check errors are logged and polling continues.
/// Dropping every cancel handle counts as cancellation.
pub async fn poll_auth_status(
    backend: &dyn ChatBackend,
    settings: PollSettings,
    mut cancel: watch::Receiver<bool>,
) -> AuthPollOutcome {
    let deadline = Instant::now() + settings.timeout;
    let mut ticker = time::interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u32;

    loop {
        if *cancel.borrow() {
            return AuthPollOutcome::Cancelled;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    debug!(attempts, "calendar auth poll cancelled");
                    return AuthPollOutcome::Cancelled;
                }
                continue;
            }
            _ = time::sleep_until(deadline) => {
                info!(attempts, "calendar auth poll timed out");
                return AuthPollOutcome::TimedOut;
            }
        }

        attempts += 1;
        match backend.calendar_auth_status().await {
            Ok(status) if status.authenticated => {
                info!(attempts, "calendar authorization confirmed");
                return AuthPollOutcome::Authenticated {
                    user_email: status.user_email,
                };
            }
            Ok(status) => debug!(attempts, status = %status.status, "calendar not yet authorized"),
            Err(err) => warn!(attempts, "calendar auth status check failed: {err:#}"),
        }

        if Instant::now() >= deadline {
            info!(attempts, "calendar auth poll timed out");
            return AuthPollOutcome::TimedOut;
        }
    }
}

#[cfg(test)]
#[path = "tests/calendar_tests.rs"]
mod tests;
