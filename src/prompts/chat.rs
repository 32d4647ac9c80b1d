//! Chat prompt templates: role-tagged message templates rendered together.

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::PromptError;
use super::template::{PartialValue, PromptTemplate};
use super::{merge_variables, FormatPrompt, PromptArgs};
use crate::inference::{ChatMessage, Role};
use crate::runnable::{ChainError, PromptValue, Runnable};

/// One message of a chat prompt: a role plus a text template.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    role: Role,
    prompt: PromptTemplate,
}

impl MessageTemplate {
    pub fn new(role: Role, prompt: PromptTemplate) -> Self {
        Self { role, prompt }
    }

    pub fn system(template: &str) -> Result<Self, PromptError> {
        Ok(Self::new(Role::System, PromptTemplate::from_template(template)?))
    }

    pub fn human(template: &str) -> Result<Self, PromptError> {
        Ok(Self::new(Role::User, PromptTemplate::from_template(template)?))
    }

    pub fn ai(template: &str) -> Result<Self, PromptError> {
        Ok(Self::new(Role::Assistant, PromptTemplate::from_template(template)?))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn input_variables(&self) -> &[String] {
        self.prompt.input_variables()
    }

    pub fn format(&self, args: &PromptArgs) -> Result<ChatMessage, PromptError> {
        Ok(ChatMessage::new(self.role, self.prompt.format(args)?))
    }
}

#[derive(Debug, Clone)]
pub struct ChatPromptTemplate {
    messages: Vec<MessageTemplate>,
    input_variables: Vec<String>,
}

impl ChatPromptTemplate {
    pub fn from_messages(messages: Vec<MessageTemplate>) -> Self {
        let input_variables =
            merge_variables(messages.iter().map(|m| m.input_variables().to_vec()));
        Self {
            messages,
            input_variables,
        }
    }

    /// Build from `(role, template)` pairs.
    pub fn from_role_strings(pairs: &[(Role, &str)]) -> Result<Self, PromptError> {
        let messages = pairs
            .iter()
            .map(|(role, text)| -> Result<MessageTemplate, PromptError> {
                Ok(MessageTemplate::new(*role, PromptTemplate::from_template(*text)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_messages(messages))
    }

    pub fn messages(&self) -> &[MessageTemplate] {
        &self.messages
    }

    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    pub fn format_messages(&self, args: &PromptArgs) -> Result<Vec<ChatMessage>, PromptError> {
        self.messages.iter().map(|m| m.format(args)).collect()
    }

    /// Render as a single string, one `Role: content` line per message.
    pub fn format(&self, args: &PromptArgs) -> Result<String, PromptError> {
        Ok(PromptValue::Chat(self.format_messages(args)?).to_string())
    }

    /// Bind variables in every message.
    pub fn partial(&self, values: PromptArgs) -> Self {
        let messages = self
            .messages
            .iter()
            .map(|m| MessageTemplate::new(m.role, m.prompt.partial(values.clone())))
            .collect();
        Self::from_messages(messages)
    }

    /// Bind a variable in every message to a function evaluated at each
    /// format.
    pub fn partial_with<F>(&self, name: &str, func: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let value = PartialValue::Dynamic(Arc::new(func));
        let messages = self
            .messages
            .iter()
            .map(|m| MessageTemplate::new(m.role, m.prompt.with_partial(name, value.clone())))
            .collect();
        Self::from_messages(messages)
    }
}

impl FormatPrompt for ChatPromptTemplate {
    fn input_variables(&self) -> Vec<String> {
        self.input_variables.clone()
    }

    fn format_prompt(&self, args: &PromptArgs) -> Result<PromptValue, PromptError> {
        self.format_messages(args).map(PromptValue::Chat)
    }
}

#[async_trait]
impl Runnable for ChatPromptTemplate {
    type Input = PromptArgs;
    type Output = PromptValue;

    async fn invoke(&self, input: PromptArgs) -> Result<PromptValue, ChainError> {
        Ok(self.format_prompt(&input)?)
    }
}
