//! Chooses the endpoint a question is sent to.

use std::fmt;

pub const DEFAULT_CALENDAR_KEYWORDS: &[&str] = &[
    "lịch",
    "deadline",
    "hẹn",
    "cuộc họp",
    "sự kiện",
    "nhắc nhở",
    "meeting",
    "event",
    "reminder",
    "schedule",
    "appointment",
    "tạo lịch",
    "đặt lịch",
    "thêm lịch",
    "lên lịch",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Chat,
    Calendar,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Chat => "chat",
            Route::Calendar => "calendar",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait IntentClassifier: Send + Sync {
    fn route(&self, question: &str) -> Route;
}

/// Routes everything to `/chat`.
pub struct ChatOnly;

impl IntentClassifier for ChatOnly {
    fn route(&self, _question: &str) -> Route {
        Route::Chat
    }
}

/// Case-insensitive substring match against a calendar keyword list.
#[derive(Debug, Clone)]
pub struct KeywordIntent {
    keywords: Vec<String>,
}

impl KeywordIntent {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for KeywordIntent {
    fn default() -> Self {
        Self::new(DEFAULT_CALENDAR_KEYWORDS)
    }
}

impl IntentClassifier for KeywordIntent {
    fn route(&self, question: &str) -> Route {
        let lower = question.to_lowercase();
        if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            Route::Calendar
        } else {
            Route::Chat
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_keywords_route_to_calendar() {
        let intent = KeywordIntent::default();
        assert_eq!(intent.route("Tạo lịch họp ngày mai 9h"), Route::Calendar);
        assert_eq!(intent.route("Set a MEETING for friday"), Route::Calendar);
        assert_eq!(intent.route("Đặt deadline dự án ngày 15/12"), Route::Calendar);
    }

    #[test]
    fn other_questions_route_to_chat() {
        let intent = KeywordIntent::default();
        assert_eq!(intent.route("2+2?"), Route::Chat);
        assert_eq!(intent.route("Explain Newton's second law"), Route::Chat);
    }

    #[test]
    fn custom_keywords_replace_defaults() {
        let intent = KeywordIntent::new(["  Agenda ", ""]);
        assert_eq!(intent.keywords(), &["agenda".to_string()]);
        assert_eq!(intent.route("show my agenda"), Route::Calendar);
        assert_eq!(intent.route("schedule a meeting"), Route::Chat);
    }

    #[test]
    fn chat_only_never_routes_to_calendar() {
        assert_eq!(ChatOnly.route("meeting tomorrow"), Route::Chat);
    }
}
