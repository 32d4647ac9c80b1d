use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    /// Unbalanced or empty braces in the template text.
    #[error("malformed template at byte {position}: {reason}")]
    MalformedTemplate { position: usize, reason: String },

    /// The template uses a variable that is neither declared nor partial.
    #[error("template variable '{name}' is not declared in input variables")]
    UndeclaredVariable { name: String },

    /// No value was supplied for a variable at format time.
    #[error("missing value for input variable '{name}'")]
    MissingVariable { name: String },
}
