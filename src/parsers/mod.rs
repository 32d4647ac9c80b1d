//! Output parsers.
//!
//! Parsers turn a model's reply into a typed value. Each one is usable
//! directly via [`TextParser::parse`] and as the last stage of a chain, where
//! it consumes the model's [`ChatMessage`] output.

pub mod errors;
pub mod fixing;
pub mod list;
pub mod repair;
pub mod string;
pub mod structured;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::inference::ChatMessage;
use crate::runnable::{ChainError, ChainStream};

pub use errors::ParserError;
pub use fixing::OutputFixingParser;
pub use list::CommaSeparatedListOutputParser;
pub use string::StringOutputParser;
pub use structured::{FieldKind, FieldSpec, StructuredOutputParser};

pub trait TextParser: Send + Sync {
    type Output: Serialize + Send + 'static;

    fn parse(&self, text: &str) -> Result<Self::Output, ParserError>;

    /// Text to put in a prompt so the model answers in a parseable format.
    fn format_instructions(&self) -> String {
        String::new()
    }
}

/// Concatenate streamed message chunks into the full reply text.
pub(crate) async fn collect_text(upstream: ChainStream<'_, ChatMessage>) -> Result<String, ChainError> {
    upstream
        .try_fold(String::new(), |mut text, chunk| async move {
            text.push_str(&chunk.content);
            Ok::<_, ChainError>(text)
        })
        .await
}

/// Streaming for parsers that need the whole reply: aggregate, then parse once.
pub(crate) fn parse_aggregated<'a, P: TextParser>(
    parser: &'a P,
    upstream: ChainStream<'a, ChatMessage>,
) -> ChainStream<'a, P::Output> {
    stream::once(async move {
        let text = collect_text(upstream).await?;
        Ok::<_, ChainError>(parser.parse(&text)?)
    })
    .boxed()
}
