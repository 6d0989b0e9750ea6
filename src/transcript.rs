//! The conversation record shared by the chat loop and the spreadsheet export.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Marker appended to a summary that had to be cut short.
pub const TRUNCATION_MARKER: char = '…';

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A `chat/completions` `messages` item, also one transcript row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::new(Role::Assistant, content)
    }
}

/// Messages of one chat session in the order they were exchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Content of the first message the user typed, skipping any system role.
    pub fn first_user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        Transcript { messages }
    }
}

/// Short title for a session, at most a fixed number of characters long.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary(String);

impl Summary {
    /// Clean up a model-produced summary and cut it down to `budget` characters.
    ///
    /// Longer text keeps `budget - 1` characters and ends in [`TRUNCATION_MARKER`].
    pub fn truncated(text: &str, budget: usize) -> Self {
        let cleaned = text
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '「' | '」'))
            .trim();
        if cleaned.chars().count() <= budget {
            return Summary(cleaned.to_string());
        }
        if budget == 0 {
            return Summary(String::new());
        }
        let mut out: String = cleaned.chars().take(budget - 1).collect();
        out.push(TRUNCATION_MARKER);
        Summary(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
