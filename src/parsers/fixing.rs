//! Output fixing: when parsing fails, repair locally, then ask a model.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use super::repair::repair_json;
use super::{collect_text, ParserError, TextParser};
use crate::inference::ChatMessage;
use crate::prompt_args;
use crate::prompts::{PromptError, PromptTemplate};
use crate::runnable::{ChainError, ChainStream, PromptValue, Runnable};

/// Fixer attempts after local repair fails.
pub const DEFAULT_FIX_RETRIES: u32 = 1;

const FIX_PROMPT: &str = "Instructions:
--------------
{instructions}
--------------
Completion:
--------------
{completion}
--------------

Above, the Completion did not satisfy the constraints given in the Instructions.
Error:
--------------
{error}
--------------

Please try again. Fix only the format and the value types; keep every fact of the \
Completion unchanged. Respond only with an answer that satisfies the constraints laid \
out in the Instructions:";

/// Wraps a parser with a fixer model.
///
/// `parse` tries the inner parser, then local JSON repair, then up to
/// `max_retries` fixer calls, each given the instructions, the failed
/// completion and the parse error.
pub struct OutputFixingParser<P, M> {
    parser: P,
    fixer: M,
    prompt: PromptTemplate,
    max_retries: u32,
}

impl<P, M> OutputFixingParser<P, M>
where
    P: TextParser,
    M: Runnable<Input = PromptValue, Output = ChatMessage>,
{
    pub fn new(parser: P, fixer: M) -> Result<Self, PromptError> {
        Ok(Self {
            parser,
            fixer,
            prompt: PromptTemplate::from_template(FIX_PROMPT)?,
            max_retries: DEFAULT_FIX_RETRIES,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn inner(&self) -> &P {
        &self.parser
    }

    pub async fn parse(&self, completion: &str) -> Result<P::Output, ChainError> {
        let mut error = match self.parser.parse(completion) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if let Some(repaired) = repair_json(completion) {
            if let Ok(value) = self.parser.parse(&repaired.to_string()) {
                tracing::info!("output fixed by local repair");
                return Ok(value);
            }
        }

        let instructions = self.parser.format_instructions();
        let mut completion = completion.to_string();
        for attempt in 1..=self.max_retries {
            tracing::warn!(attempt, error = %error, "output parse failed, asking fixer model");
            let prompt = self.prompt.format(&prompt_args! {
                "instructions" => instructions,
                "completion" => completion,
                "error" => error,
            })?;
            let reply = self.fixer.invoke(PromptValue::Text(prompt)).await?;
            match self.parser.parse(&reply.content) {
                Ok(value) => {
                    tracing::info!(attempt, "output fixed by model");
                    return Ok(value);
                }
                Err(e) => {
                    completion = reply.content;
                    error = e;
                }
            }
        }

        Err(ParserError::FixFailed {
            attempts: self.max_retries,
            reason: error.to_string(),
        }
        .into())
    }
}

#[async_trait]
impl<P, M> Runnable for OutputFixingParser<P, M>
where
    P: TextParser,
    M: Runnable<Input = PromptValue, Output = ChatMessage>,
{
    type Input = ChatMessage;
    type Output = P::Output;

    async fn invoke(&self, input: ChatMessage) -> Result<P::Output, ChainError> {
        self.parse(&input.content).await
    }

    fn transform<'a>(
        &'a self,
        upstream: ChainStream<'a, ChatMessage>,
    ) -> ChainStream<'a, P::Output> {
        stream::once(async move {
            let text = collect_text(upstream).await?;
            self.parse(&text).await
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::parsers::{CommaSeparatedListOutputParser, FieldSpec, StructuredOutputParser};
    use crate::runnable::RunnableLambda;

    #[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq)]
    struct Person {
        name: String,
        age: f64,
    }

    fn person_parser() -> StructuredOutputParser<Person> {
        StructuredOutputParser::from_fields(vec![
            FieldSpec::string("name", "the person's name"),
            FieldSpec::number("age", "age in years").range(0.0, 150.0),
        ])
    }

    /// A fixer that replies with canned text and records its prompts.
    fn scripted_fixer(
        reply: &'static str,
    ) -> (
        Arc<Mutex<Vec<String>>>,
        impl Runnable<Input = PromptValue, Output = ChatMessage>,
    ) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let seen = prompts.clone();
        let fixer = RunnableLambda::new(move |p: PromptValue| {
            seen.lock().unwrap().push(p.to_string());
            Ok(ChatMessage::assistant(reply))
        });
        (prompts, fixer)
    }

    #[tokio::test]
    async fn test_valid_output_skips_fixer() {
        let (prompts, fixer) = scripted_fixer("unused");
        let parser = OutputFixingParser::new(person_parser(), fixer).unwrap();
        let p = parser.parse(r#"{"name": "Ada", "age": 36}"#).await.unwrap();
        assert_eq!(p.name, "Ada");
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_repair_before_model() {
        let (prompts, fixer) = scripted_fixer("unused");
        let parser = OutputFixingParser::new(person_parser(), fixer).unwrap();
        let p = parser.parse(r#"{"name": "Ada", "age": 36,"#).await.unwrap();
        assert_eq!(p, Person { name: "Ada".into(), age: 36.0 });
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_model_fixes_type_error() {
        let (prompts, fixer) = scripted_fixer(r#"{"name": "Ada", "age": 36}"#);
        let parser = OutputFixingParser::new(person_parser(), fixer).unwrap();
        let p = parser.parse(r#"{"name": "Ada", "age": "thirty-six"}"#).await.unwrap();
        assert_eq!(p.age, 36.0);

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("thirty-six"));
        assert!(prompts[0].contains("field 'age' should be a number"));
        assert!(prompts[0].contains("```json"));
    }

    #[tokio::test]
    async fn test_fix_failed_after_retries() {
        let (prompts, fixer) = scripted_fixer("still not json");
        let parser = OutputFixingParser::new(person_parser(), fixer)
            .unwrap()
            .with_max_retries(2);
        let err = parser.parse("nope").await.unwrap_err();
        assert!(matches!(
            err,
            ChainError::Parser(ParserError::FixFailed { attempts: 2, .. })
        ));
        assert_eq!(prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fixer_model_error_propagates() {
        let fixer = RunnableLambda::new(|_: PromptValue| -> Result<ChatMessage, ChainError> {
            Err(ChainError::custom("fixer offline"))
        });
        let parser = OutputFixingParser::new(CommaSeparatedListOutputParser, fixer).unwrap();
        let err = parser.invoke(ChatMessage::assistant(" , ")).await.unwrap_err();
        assert_eq!(err.to_string(), "fixer offline");
    }
}
