//! f-string style text templates.
//!
//! `{name}` is a variable, `{{` and `}}` are literal braces. Variable names
//! are taken verbatim between the braces (surrounding whitespace trimmed).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::errors::PromptError;
use super::{FormatPrompt, PromptArgs};
use crate::runnable::{ChainError, PromptValue, Runnable};

// ─── Parsing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

fn parse_segments(template: &str) -> Result<Vec<Segment>, PromptError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (inner_pos, c) in chars.by_ref() {
                    match c {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => {
                            return Err(PromptError::MalformedTemplate {
                                position: inner_pos,
                                reason: "nested '{' inside a variable".into(),
                            })
                        }
                        _ => name.push(c),
                    }
                }
                if !closed {
                    return Err(PromptError::MalformedTemplate {
                        position: pos,
                        reason: "unclosed '{'".into(),
                    });
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(PromptError::MalformedTemplate {
                        position: pos,
                        reason: "empty variable name".into(),
                    });
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Variable(name.to_string()));
            }
            '}' => {
                return Err(PromptError::MalformedTemplate {
                    position: pos,
                    reason: "single '}' must be escaped as '}}'".into(),
                })
            }
            _ => literal.push(ch),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Variable names in first-appearance order, without duplicates.
fn variables_of(segments: &[Segment]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for segment in segments {
        if let Segment::Variable(name) = segment {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }
    names
}

// ─── Partial values ──────────────────────────────────────────────────────────

/// A value bound ahead of time. Dynamic values are re-evaluated on every
/// format.
#[derive(Clone)]
pub enum PartialValue {
    Static(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl PartialValue {
    pub fn resolve(&self) -> String {
        match self {
            PartialValue::Static(value) => value.clone(),
            PartialValue::Dynamic(func) => (**func)(),
        }
    }
}

impl fmt::Debug for PartialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            PartialValue::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Today's date as `YYYY-MM-DD`, for use as a dynamic partial.
pub fn current_date() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

// ─── PromptTemplate ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    segments: Vec<Segment>,
    input_variables: Vec<String>,
    partials: HashMap<String, PartialValue>,
}

impl PromptTemplate {
    /// Build a template whose input variables are inferred from the text.
    pub fn from_template(template: impl Into<String>) -> Result<Self, PromptError> {
        let template = template.into();
        let segments = parse_segments(&template)?;
        let input_variables = variables_of(&segments);
        Ok(Self {
            template,
            segments,
            input_variables,
            partials: HashMap::new(),
        })
    }

    /// Build a template with explicitly declared input variables.
    ///
    /// Every variable in the text must be declared.
    pub fn new<I, S>(input_variables: I, template: impl Into<String>) -> Result<Self, PromptError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let template = template.into();
        let segments = parse_segments(&template)?;
        let declared: Vec<String> = input_variables.into_iter().map(Into::into).collect();

        if let Some(name) = variables_of(&segments)
            .into_iter()
            .find(|name| !declared.contains(name))
        {
            return Err(PromptError::UndeclaredVariable { name });
        }

        Ok(Self {
            template,
            segments,
            input_variables: declared,
            partials: HashMap::new(),
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Variables the caller must still supply.
    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    /// Bind some variables to fixed values.
    pub fn partial(&self, values: PromptArgs) -> Self {
        let mut next = self.clone();
        for (name, value) in values {
            next.bind(name, PartialValue::Static(value));
        }
        next
    }

    /// Bind a variable to a function evaluated at each format.
    pub fn partial_with<F>(&self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let mut next = self.clone();
        next.bind(name.into(), PartialValue::Dynamic(Arc::new(func)));
        next
    }

    /// Bind one variable to an already built partial value.
    pub(crate) fn with_partial(&self, name: &str, value: PartialValue) -> Self {
        let mut next = self.clone();
        next.bind(name.to_string(), value);
        next
    }

    fn bind(&mut self, name: String, value: PartialValue) {
        self.input_variables.retain(|v| *v != name);
        self.partials.insert(name, value);
    }

    /// Render the template. Caller values override partials; extra values
    /// are ignored.
    pub fn format(&self, args: &PromptArgs) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => {
                    if let Some(value) = args.get(name) {
                        out.push_str(value);
                    } else if let Some(partial) = self.partials.get(name) {
                        out.push_str(&partial.resolve());
                    } else {
                        return Err(PromptError::MissingVariable { name: name.clone() });
                    }
                }
            }
        }
        Ok(out)
    }
}

impl FormatPrompt for PromptTemplate {
    fn input_variables(&self) -> Vec<String> {
        self.input_variables.clone()
    }

    fn format_prompt(&self, args: &PromptArgs) -> Result<PromptValue, PromptError> {
        self.format(args).map(PromptValue::Text)
    }
}

#[async_trait]
impl Runnable for PromptTemplate {
    type Input = PromptArgs;
    type Output = PromptValue;

    async fn invoke(&self, input: PromptArgs) -> Result<PromptValue, ChainError> {
        Ok(self.format_prompt(&input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt_args;

    #[test]
    fn test_from_template_infers_variables_in_order() {
        let prompt =
            PromptTemplate::from_template("Tell a {adjective} joke about {content}, {adjective}!")
                .unwrap();
        assert_eq!(prompt.input_variables(), ["adjective", "content"]);
        let text = prompt
            .format(&prompt_args! { "adjective" => "funny", "content" => "chickens" })
            .unwrap();
        assert_eq!(text, "Tell a funny joke about chickens, funny!");
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let prompt = PromptTemplate::from_template("{{\"name\": \"{name}\"}}").unwrap();
        assert_eq!(prompt.input_variables(), ["name"]);
        assert_eq!(
            prompt.format(&prompt_args! { "name" => "Ada" }).unwrap(),
            "{\"name\": \"Ada\"}"
        );
    }

    #[test]
    fn test_no_variables() {
        let prompt = PromptTemplate::from_template("Tell me a joke").unwrap();
        assert!(prompt.input_variables().is_empty());
        assert_eq!(prompt.format(&PromptArgs::new()).unwrap(), "Tell me a joke");
    }

    #[test]
    fn test_malformed_templates() {
        for bad in ["oops {name", "stray } brace", "empty {} var", "nested {a{b}}"] {
            assert!(
                matches!(
                    PromptTemplate::from_template(bad),
                    Err(PromptError::MalformedTemplate { .. })
                ),
                "expected malformed: {bad}"
            );
        }
    }

    #[test]
    fn test_declared_variables_must_cover_template() {
        let err = PromptTemplate::new(["name"], "Hi {name}, you are {age}").unwrap_err();
        assert_eq!(err, PromptError::UndeclaredVariable { name: "age".into() });

        let ok = PromptTemplate::new(["name", "age"], "Hi {name}, you are {age}").unwrap();
        assert_eq!(ok.input_variables(), ["name", "age"]);
    }

    #[test]
    fn test_missing_variable() {
        let prompt = PromptTemplate::from_template("Hi {name}").unwrap();
        let err = prompt.format(&prompt_args! { "other" => "x" }).unwrap_err();
        assert_eq!(err, PromptError::MissingVariable { name: "name".into() });
    }

    #[test]
    fn test_partial_removes_variable() {
        let prompt = PromptTemplate::from_template("{greeting}, {name}!").unwrap();
        let partial = prompt.partial(prompt_args! { "greeting" => "Hello" });
        assert_eq!(partial.input_variables(), ["name"]);
        assert_eq!(
            partial.format(&prompt_args! { "name" => "Ada" }).unwrap(),
            "Hello, Ada!"
        );
        // the original is untouched
        assert_eq!(prompt.input_variables(), ["greeting", "name"]);
    }

    #[test]
    fn test_dynamic_partial_evaluated_each_format() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let prompt = PromptTemplate::from_template("call #{n}")
            .unwrap()
            .partial_with("n", move || (c.fetch_add(1, Ordering::SeqCst) + 1).to_string());

        assert_eq!(prompt.format(&PromptArgs::new()).unwrap(), "call #1");
        assert_eq!(prompt.format(&PromptArgs::new()).unwrap(), "call #2");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_caller_value_overrides_partial() {
        let prompt = PromptTemplate::from_template("{a}")
            .unwrap()
            .partial(prompt_args! { "a" => "partial" });
        assert_eq!(prompt.format(&prompt_args! { "a" => "caller" }).unwrap(), "caller");
    }

    #[test]
    fn test_current_date_partial() {
        let prompt = PromptTemplate::from_template("Today is {date}.")
            .unwrap()
            .partial_with("date", current_date);
        let text = prompt.format(&PromptArgs::new()).unwrap();
        assert_eq!(text.len(), "Today is YYYY-MM-DD.".len());
    }

    #[tokio::test]
    async fn test_invoke_yields_text_value() {
        let prompt = PromptTemplate::from_template("Hello {name}").unwrap();
        let value = prompt.invoke(prompt_args! { "name" => "Ada" }).await.unwrap();
        assert_eq!(value, PromptValue::Text("Hello Ada".into()));

        let err = prompt.invoke(PromptArgs::new()).await.unwrap_err();
        assert!(matches!(err, ChainError::Prompt(PromptError::MissingVariable { .. })));
    }
}
