//! One-time user notifications queued on a request.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::Request;

/// Severity of a user message.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Development detail, 10
    Debug,
    /// Informational, 20
    Info,
    /// An action succeeded, 25
    Success,
    /// Something needs attention, 30
    #[default]
    Warning,
    /// An action failed, 40
    Error,
}

impl Level {
    /// Numeric level.
    pub fn value(self) -> u8 {
        match self {
            Level::Debug => 10,
            Level::Info => 20,
            Level::Success => 25,
            Level::Warning => 30,
            Level::Error => 40,
        }
    }

    /// The tag rendered for this level.
    pub fn tag(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A queued user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Severity
    pub level: Level,
    /// Text shown to the user
    pub message: String,
    /// Extra space-separated tags supplied by the caller
    pub extra_tags: String,
}

impl Message {
    /// Full tag string: extra tags followed by the level tag.
    pub fn tags(&self) -> String {
        let extra = self.extra_tags.trim();
        if extra.is_empty() {
            self.level.tag().to_string()
        } else {
            format!("{} {}", extra, self.level.tag())
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Queues a message on the request.
pub fn add_message(
    request: &mut Request,
    level: Level,
    message: impl Into<String>,
    extra_tags: impl Into<String>,
) {
    request.messages_mut().push(Message {
        level,
        message: message.into(),
        extra_tags: extra_tags.into(),
    });
}
