//! Prompt templates.
//!
//! - [`PromptTemplate`]: a single text template with `{var}` placeholders
//! - [`ChatPromptTemplate`]: a list of role-tagged message templates
//! - [`PipelinePromptTemplate`]: stage prompts whose outputs feed a final one
//!
//! All three are runnables from [`PromptArgs`] to [`PromptValue`].

pub mod chat;
pub mod errors;
pub mod pipeline;
pub mod template;

use std::collections::HashMap;

use crate::runnable::PromptValue;

pub use chat::{ChatPromptTemplate, MessageTemplate};
pub use errors::PromptError;
pub use pipeline::PipelinePromptTemplate;
pub use template::{current_date, PartialValue, PromptTemplate};

/// Variable values passed to a template.
pub type PromptArgs = HashMap<String, String>;

/// Anything that renders [`PromptArgs`] into a [`PromptValue`].
pub trait FormatPrompt: Send + Sync {
    /// Variables the caller must supply.
    fn input_variables(&self) -> Vec<String>;

    fn format_prompt(&self, args: &PromptArgs) -> Result<PromptValue, PromptError>;
}

/// Build [`PromptArgs`] from `key => value` pairs.
///
/// ```
/// let args = chatchain::prompt_args! { "name" => "Ada", "age" => 36 };
/// assert_eq!(args["age"], "36");
/// ```
#[macro_export]
macro_rules! prompt_args {
    () => {
        $crate::prompts::PromptArgs::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut args = $crate::prompts::PromptArgs::new();
        $(
            args.insert(
                ::std::string::ToString::to_string(&$key),
                ::std::string::ToString::to_string(&$value),
            );
        )+
        args
    }};
}

/// Union of variable lists, first-appearance order.
pub(crate) fn merge_variables<I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut merged: Vec<String> = Vec::new();
    for list in lists {
        for name in list {
            if !merged.contains(&name) {
                merged.push(name);
            }
        }
    }
    merged
}
