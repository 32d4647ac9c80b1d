//! JSON output parsing against a declared field schema.

use std::collections::HashMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::repair::extract_json_block;
use super::{parse_aggregated, ParserError, TextParser};
use crate::inference::ChatMessage;
use crate::runnable::{ChainError, ChainStream, Runnable};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    /// A JSON number, optionally bounded (inclusive).
    Number { min: Option<f64>, max: Option<f64> },
    Boolean,
    /// An array of strings.
    List,
}

/// One expected field of the JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    fn new(name: &str, description: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: true,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, description, FieldKind::String)
    }

    pub fn number(name: &str, description: &str) -> Self {
        Self::new(name, description, FieldKind::Number { min: None, max: None })
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, description, FieldKind::Boolean)
    }

    pub fn list(name: &str, description: &str) -> Self {
        Self::new(name, description, FieldKind::List)
    }

    /// Bound a number field. No effect on other kinds.
    pub fn range(mut self, min: f64, max: f64) -> Self {
        if let FieldKind::Number { .. } = self.kind {
            self.kind = FieldKind::Number {
                min: Some(min),
                max: Some(max),
            };
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    fn schema(&self) -> Value {
        let mut schema = match &self.kind {
            FieldKind::String => json!({ "type": "string" }),
            FieldKind::Boolean => json!({ "type": "boolean" }),
            FieldKind::List => json!({ "type": "array", "items": { "type": "string" } }),
            FieldKind::Number { min, max } => {
                let mut s = json!({ "type": "number" });
                if let Some(min) = min {
                    s["minimum"] = json!(min);
                }
                if let Some(max) = max {
                    s["maximum"] = json!(max);
                }
                s
            }
        };
        schema["description"] = json!(self.description);
        schema
    }

    fn check(&self, value: &Value) -> Result<(), ParserError> {
        let mismatch = |expected: &str| ParserError::SchemaMismatch {
            reason: format!("field '{}' should be {expected}, got {value}", self.name),
        };
        match &self.kind {
            FieldKind::String if !value.is_string() => Err(mismatch("a string")),
            FieldKind::Boolean if !value.is_boolean() => Err(mismatch("a boolean")),
            FieldKind::List => match value.as_array() {
                Some(items) if items.iter().all(Value::is_string) => Ok(()),
                _ => Err(mismatch("an array of strings")),
            },
            FieldKind::Number { min, max } => {
                let n = value.as_f64().ok_or_else(|| mismatch("a number"))?;
                if min.is_some_and(|min| n < min) || max.is_some_and(|max| n > max) {
                    return Err(ParserError::SchemaMismatch {
                        reason: format!(
                            "field '{}' = {n} is outside [{}, {}]",
                            self.name,
                            min.map_or("-inf".into(), |v| v.to_string()),
                            max.map_or("inf".into(), |v| v.to_string()),
                        ),
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Parses a JSON object (optionally inside a ```json fence), checks it
/// against the field specs and deserializes the declared fields into `T`.
///
/// Undeclared keys are dropped before deserialization.
#[derive(Debug, Clone)]
pub struct StructuredOutputParser<T> {
    fields: Vec<FieldSpec>,
    _marker: PhantomData<fn() -> T>,
}

impl StructuredOutputParser<HashMap<String, String>> {
    /// String fields only, from `(name, description)` pairs.
    pub fn from_names_and_descriptions(pairs: &[(&str, &str)]) -> Self {
        Self::from_fields(
            pairs
                .iter()
                .map(|(name, description)| FieldSpec::string(name, description))
                .collect(),
        )
    }
}

impl<T> StructuredOutputParser<T>
where
    T: DeserializeOwned + Serialize + Send + 'static,
{
    pub fn from_fields(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            _marker: PhantomData,
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// The JSON schema the output must follow.
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
            "$schema": "http://json-schema.org/draft-07/schema#",
        })
    }

    fn validate(&self, value: Value) -> Result<Value, ParserError> {
        let Value::Object(mut object) = value else {
            return Err(ParserError::SchemaMismatch {
                reason: format!("expected a JSON object, got {value}"),
            });
        };

        let mut projected = Map::new();
        for field in &self.fields {
            match object.remove(&field.name) {
                Some(Value::Null) | None if !field.required => {}
                Some(v) => {
                    field.check(&v)?;
                    projected.insert(field.name.clone(), v);
                }
                None => {
                    return Err(ParserError::SchemaMismatch {
                        reason: format!("missing required field '{}'", field.name),
                    })
                }
            }
        }
        Ok(Value::Object(projected))
    }
}

impl<T> TextParser for StructuredOutputParser<T>
where
    T: DeserializeOwned + Serialize + Send + 'static,
{
    type Output = T;

    fn parse(&self, text: &str) -> Result<T, ParserError> {
        if text.trim().is_empty() {
            return Err(ParserError::EmptyOutput);
        }
        let candidate = extract_json_block(text);
        let value: Value =
            serde_json::from_str(candidate).map_err(|e| ParserError::InvalidJson {
                reason: e.to_string(),
                text: text.to_string(),
            })?;

        let projected = self.validate(value)?;
        serde_json::from_value(projected).map_err(|e| ParserError::SchemaMismatch {
            reason: e.to_string(),
        })
    }

    fn format_instructions(&self) -> String {
        let schema = serde_json::to_string(&self.json_schema()).unwrap_or_default();
        format!(
            "You must format your output as a JSON value that adheres to the \"JSON Schema\" \
             instance below.\n\n\
             The output is parsed and type-checked against this schema, so every field must \
             match it exactly and there must be no trailing commas. Do not add fields that \
             the schema does not list.\n\n\
             Here is the JSON Schema instance your output must adhere to. Include the \
             enclosing markdown codeblock:\n```json\n{schema}\n```\n"
        )
    }
}

#[async_trait]
impl<T> Runnable for StructuredOutputParser<T>
where
    T: DeserializeOwned + Serialize + Send + 'static,
{
    type Input = ChatMessage;
    type Output = T;

    async fn invoke(&self, input: ChatMessage) -> Result<T, ChainError> {
        Ok(self.parse(&input.content)?)
    }

    fn transform<'a>(&'a self, upstream: ChainStream<'a, ChatMessage>) -> ChainStream<'a, T> {
        parse_aggregated(self, upstream)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Answer {
        answer: String,
        sources: Vec<String>,
        confidence: f64,
        verified: Option<bool>,
    }

    fn answer_parser() -> StructuredOutputParser<Answer> {
        StructuredOutputParser::from_fields(vec![
            FieldSpec::string("answer", "answer to the user's question"),
            FieldSpec::list("sources", "sources used to answer the question"),
            FieldSpec::number("confidence", "confidence from 0 to 100").range(0.0, 100.0),
            FieldSpec::boolean("verified", "whether the answer was checked").optional(),
        ])
    }

    #[test]
    fn test_names_and_descriptions_parses_fenced_json() {
        let parser = StructuredOutputParser::from_names_and_descriptions(&[
            ("answer", "answer to the user's question"),
            ("source", "source used to answer the question, should be a website."),
        ]);
        let text = "```json\n{\"answer\": \"Paris\", \"source\": \"https://en.wikipedia.org/wiki/Paris\"}\n```";
        let out = parser.parse(text).unwrap();
        assert_eq!(out["answer"], "Paris");
        assert_eq!(out["source"], "https://en.wikipedia.org/wiki/Paris");
    }

    #[test]
    fn test_undeclared_keys_are_dropped() {
        let parser = StructuredOutputParser::from_names_and_descriptions(&[("answer", "a")]);
        let out = parser.parse(r#"{"answer": "yes", "extra": 42}"#).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_typed_fields() {
        let out = answer_parser()
            .parse(r#"{"answer": "42", "sources": ["hitchhiker"], "confidence": 99}"#)
            .unwrap();
        assert_eq!(
            out,
            Answer {
                answer: "42".into(),
                sources: vec!["hitchhiker".into()],
                confidence: 99.0,
                verified: None,
            }
        );
    }

    #[test]
    fn test_out_of_range_number() {
        let err = answer_parser()
            .parse(r#"{"answer": "x", "sources": [], "confidence": 150}"#)
            .unwrap_err();
        assert!(matches!(err, ParserError::SchemaMismatch { .. }));
        assert!(err.to_string().contains("outside [0, 100]"));
    }

    #[test]
    fn test_wrong_type_and_missing_field() {
        let err = answer_parser()
            .parse(r#"{"answer": "x", "sources": "one", "confidence": 1}"#)
            .unwrap_err();
        assert!(err.to_string().contains("array of strings"));

        let err = answer_parser().parse(r#"{"answer": "x", "confidence": 1}"#).unwrap_err();
        assert!(err.to_string().contains("missing required field 'sources'"));
    }

    #[test]
    fn test_invalid_json_and_empty() {
        assert!(matches!(
            answer_parser().parse("The capital is Paris."),
            Err(ParserError::InvalidJson { .. })
        ));
        assert_eq!(answer_parser().parse("   ").unwrap_err(), ParserError::EmptyOutput);
    }

    #[test]
    fn test_format_instructions_embed_schema() {
        let instructions = answer_parser().format_instructions();
        assert!(instructions.contains("```json"));
        assert!(instructions.contains("\"minimum\":0.0"));
        assert!(instructions.contains("\"required\":[\"answer\",\"sources\",\"confidence\"]"));
    }
}
