//! Plain-text output parsing. The only parser that streams per chunk.

use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};

use super::{ParserError, TextParser};
use crate::inference::ChatMessage;
use crate::runnable::{ChainError, ChainStream, Runnable};

/// Extracts the text content of a model reply. Streams chunk by chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringOutputParser;

impl TextParser for StringOutputParser {
    type Output = String;

    fn parse(&self, text: &str) -> Result<String, ParserError> {
        Ok(text.to_string())
    }
}

#[async_trait]
impl Runnable for StringOutputParser {
    type Input = ChatMessage;
    type Output = String;

    async fn invoke(&self, input: ChatMessage) -> Result<String, ChainError> {
        Ok(input.content)
    }

    fn transform<'a>(&'a self, upstream: ChainStream<'a, ChatMessage>) -> ChainStream<'a, String> {
        upstream.map_ok(|chunk| chunk.content).boxed()
    }
}
