//! Chain error type.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::loaders::LoaderError;
use crate::parsers::ParserError;
use crate::prompts::PromptError;

/// Any error a composed chain can surface.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// The primary and every fallback failed. Carries the primary's error.
    #[error("all {attempts} runnables failed, first error: {first}")]
    FallbacksExhausted {
        attempts: usize,
        #[source]
        first: Box<ChainError>,
    },

    /// Error raised by user code inside a lambda.
    #[error("{reason}")]
    Custom { reason: String },
}

impl ChainError {
    pub fn custom(reason: impl Into<String>) -> Self {
        ChainError::Custom {
            reason: reason.into(),
        }
    }

    /// The inference error at the bottom of this chain error, if any.
    pub fn as_inference(&self) -> Option<&InferenceError> {
        match self {
            ChainError::Inference(e) => Some(e),
            ChainError::FallbacksExhausted { first, .. } => first.as_inference(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_names_first_error() {
        let err = ChainError::FallbacksExhausted {
            attempts: 2,
            first: Box::new(ChainError::custom("primary down")),
        };
        assert_eq!(err.to_string(), "all 2 runnables failed, first error: primary down");
    }

    #[test]
    fn test_as_inference_looks_through_fallbacks() {
        let err = ChainError::FallbacksExhausted {
            attempts: 2,
            first: Box::new(ChainError::from(InferenceError::Timeout { duration_secs: 3 })),
        };
        assert!(matches!(
            err.as_inference(),
            Some(InferenceError::Timeout { duration_secs: 3 })
        ));
        assert!(ChainError::custom("x").as_inference().is_none());
    }
}
