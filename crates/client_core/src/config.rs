use std::{fs, io, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use shared::domain::{SessionId, UserId};
use uuid::Uuid;

use crate::{
    calendar::{PollSettings, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT},
    client::ClientOptions,
    controller::{ControllerOptions, DEFAULT_MIN_SUBMIT_INTERVAL},
    intent::{ChatOnly, IntentClassifier, KeywordIntent},
};

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    /// Generated per run when unset.
    pub user_id: Option<String>,
    pub min_submit_interval_ms: u64,
    pub request_timeout_secs: Option<u64>,
    pub calendar_poll_interval_secs: u64,
    pub calendar_poll_timeout_secs: u64,
    pub calendar_routing: bool,
    /// Replaces the built-in keyword list when set.
    pub calendar_keywords: Option<Vec<String>>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            user_id: None,
            min_submit_interval_ms: DEFAULT_MIN_SUBMIT_INTERVAL.as_millis() as u64,
            request_timeout_secs: None,
            calendar_poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            calendar_poll_timeout_secs: DEFAULT_POLL_TIMEOUT.as_secs(),
            calendar_routing: true,
            calendar_keywords: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    user_id: Option<String>,
    min_submit_interval_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    calendar_poll_interval_secs: Option<u64>,
    calendar_poll_timeout_secs: Option<u64>,
    calendar_routing: Option<bool>,
    calendar_keywords: Option<Vec<String>>,
}

/// Defaults, then `path` if it exists, then the process environment.
pub fn load_settings(path: &Path) -> Result<ClientSettings> {
    let mut settings = ClientSettings::default();
    match fs::read_to_string(path) {
        Ok(raw) => settings
            .apply_toml(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    }
    settings.apply_env(|key| std::env::var(key).ok())?;
    Ok(settings)
}

impl ClientSettings {
    pub fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.user_id {
            self.user_id = Some(v);
        }
        if let Some(v) = file.min_submit_interval_ms {
            self.min_submit_interval_ms = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = Some(v);
        }
        if let Some(v) = file.calendar_poll_interval_secs {
            self.calendar_poll_interval_secs = v;
        }
        if let Some(v) = file.calendar_poll_timeout_secs {
            self.calendar_poll_timeout_secs = v;
        }
        if let Some(v) = file.calendar_routing {
            self.calendar_routing = v;
        }
        if let Some(v) = file.calendar_keywords {
            self.calendar_keywords = Some(v);
        }
        Ok(())
    }

    /// `APP__*` keys win over the legacy `CHAT_SERVER_URL`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHAT_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__USER_ID") {
            self.user_id = Some(v);
        }
        if let Some(v) = lookup("APP__MIN_SUBMIT_INTERVAL_MS") {
            self.min_submit_interval_ms = parse_env("APP__MIN_SUBMIT_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
            // 0 disables the timeout
            let secs: u64 = parse_env("APP__REQUEST_TIMEOUT_SECS", &v)?;
            self.request_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = lookup("APP__CALENDAR_POLL_INTERVAL_SECS") {
            self.calendar_poll_interval_secs = parse_env("APP__CALENDAR_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("APP__CALENDAR_POLL_TIMEOUT_SECS") {
            self.calendar_poll_timeout_secs = parse_env("APP__CALENDAR_POLL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("APP__CALENDAR_ROUTING") {
            self.calendar_routing = parse_flag(&v)
                .with_context(|| format!("APP__CALENDAR_ROUTING must be a boolean, got '{v}'"))?;
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            controller: ControllerOptions {
                min_submit_interval: Duration::from_millis(self.min_submit_interval_ms),
                ..ControllerOptions::default()
            },
            request_timeout: self
                .request_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            calendar_poll: PollSettings {
                interval: Duration::from_secs(self.calendar_poll_interval_secs.max(1)),
                timeout: Duration::from_secs(self.calendar_poll_timeout_secs),
            },
        }
    }

    pub fn intent(&self) -> Arc<dyn IntentClassifier> {
        if !self.calendar_routing {
            return Arc::new(ChatOnly);
        }
        match &self.calendar_keywords {
            Some(keywords) => Arc::new(KeywordIntent::new(keywords)),
            None => Arc::new(KeywordIntent::default()),
        }
    }

    pub fn resolve_user_id(&self) -> UserId {
        match self.user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => UserId::new(id),
            _ => UserId::new(format!("user_{}", Uuid::new_v4().simple())),
        }
    }
}

pub fn new_session_id() -> SessionId {
    SessionId::new(Uuid::new_v4().to_string())
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has an invalid value '{raw}'"))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
