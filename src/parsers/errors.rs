use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParserError {
    /// The text does not contain parseable JSON.
    #[error("invalid JSON: {reason}; text: {text}")]
    InvalidJson { reason: String, text: String },

    /// The JSON parsed but does not fit the expected shape.
    #[error("output does not match schema: {reason}")]
    SchemaMismatch { reason: String },

    #[error("model output was empty")]
    EmptyOutput,

    /// Local repair and every fixer attempt failed.
    #[error("could not fix output after {attempts} fixer attempts: {reason}")]
    FixFailed { attempts: u32, reason: String },
}
