use std::fmt;

use serde::Serialize;

use crate::inference::{ChatMessage, Role};

/// The value a prompt hands to a chat model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptValue {
    Text(String),
    Chat(Vec<ChatMessage>),
}

impl PromptValue {
    /// Messages to send. A text prompt becomes a single user message.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            PromptValue::Text(text) => vec![ChatMessage::user(text)],
            PromptValue::Chat(messages) => messages,
        }
    }
}

/// Text prompts render as-is; chat prompts as one `Role: content` line per
/// message.
impl fmt::Display for PromptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptValue::Text(text) => f.write_str(text),
            PromptValue::Chat(messages) => {
                for (i, message) in messages.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    let prefix = match message.role {
                        Role::System => "System",
                        Role::User => "Human",
                        Role::Assistant => "AI",
                    };
                    write!(f, "{prefix}: {}", message.content)?;
                }
                Ok(())
            }
        }
    }
}

impl From<String> for PromptValue {
    fn from(text: String) -> Self {
        PromptValue::Text(text)
    }
}

impl From<&str> for PromptValue {
    fn from(text: &str) -> Self {
        PromptValue::Text(text.to_string())
    }
}

impl From<Vec<ChatMessage>> for PromptValue {
    fn from(messages: Vec<ChatMessage>) -> Self {
        PromptValue::Chat(messages)
    }
}
