//! Comma-separated list parsing.

use async_trait::async_trait;

use super::{parse_aggregated, ParserError, TextParser};
use crate::inference::ChatMessage;
use crate::runnable::{ChainError, ChainStream, Runnable};

/// Parses `a, b, c` into `["a", "b", "c"]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommaSeparatedListOutputParser;

impl TextParser for CommaSeparatedListOutputParser {
    type Output = Vec<String>;

    fn parse(&self, text: &str) -> Result<Vec<String>, ParserError> {
        let items: Vec<String> = text
            .trim()
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect();
        if items.is_empty() {
            return Err(ParserError::EmptyOutput);
        }
        Ok(items)
    }

    fn format_instructions(&self) -> String {
        "Your response should be a list of comma separated values, eg: `foo, bar, baz`".into()
    }
}

#[async_trait]
impl Runnable for CommaSeparatedListOutputParser {
    type Input = ChatMessage;
    type Output = Vec<String>;

    async fn invoke(&self, input: ChatMessage) -> Result<Vec<String>, ChainError> {
        Ok(self.parse(&input.content)?)
    }

    fn transform<'a>(
        &'a self,
        upstream: ChainStream<'a, ChatMessage>,
    ) -> ChainStream<'a, Vec<String>> {
        parse_aggregated(self, upstream)
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::{self, StreamExt};

    use super::*;

    #[test]
    fn test_parse_trims_items() {
        let items = CommaSeparatedListOutputParser
            .parse(" red,green , blue ,\n")
            .unwrap();
        assert_eq!(items, vec!["red", "green", "blue"]);
    }

    #[test]
    fn test_parse_single_item() {
        assert_eq!(CommaSeparatedListOutputParser.parse("only").unwrap(), vec!["only"]);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(
            CommaSeparatedListOutputParser.parse("  , ").unwrap_err(),
            ParserError::EmptyOutput
        );
    }

    #[tokio::test]
    async fn test_transform_aggregates_chunks() {
        let upstream = stream::iter(vec![
            Ok(ChatMessage::assistant("apple, ba")),
            Ok(ChatMessage::assistant("nana, cherry")),
        ])
        .boxed();
        let parser = CommaSeparatedListOutputParser;
        let out: Vec<_> = parser.transform(upstream).collect().await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap(), &vec!["apple", "banana", "cherry"]);
    }
}
