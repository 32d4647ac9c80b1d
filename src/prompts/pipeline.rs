//! Pipeline prompts: several named stage prompts are rendered in order and
//! their outputs become variables of a final prompt.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::errors::PromptError;
use super::template::PartialValue;
use super::{merge_variables, FormatPrompt, PromptArgs};
use crate::runnable::{ChainError, PromptValue, Runnable};

pub struct PipelinePromptTemplate {
    stages: Vec<(String, Box<dyn FormatPrompt>)>,
    final_prompt: Box<dyn FormatPrompt>,
    input_variables: Vec<String>,
    partials: HashMap<String, PartialValue>,
}

impl PipelinePromptTemplate {
    /// `stages` run in order; each stage sees the caller's values plus the
    /// outputs of earlier stages.
    pub fn new(
        stages: Vec<(String, Box<dyn FormatPrompt>)>,
        final_prompt: Box<dyn FormatPrompt>,
    ) -> Self {
        let stage_names: Vec<&String> = stages.iter().map(|(name, _)| name).collect();
        let input_variables = merge_variables(
            stages
                .iter()
                .map(|(_, p)| p.input_variables())
                .chain(std::iter::once(final_prompt.input_variables())),
        )
        .into_iter()
        .filter(|v| !stage_names.contains(&v))
        .collect();

        Self {
            stages,
            final_prompt,
            input_variables,
            partials: HashMap::new(),
        }
    }

    /// Variables the caller must still supply.
    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    /// Bind some variables to fixed values, visible to every stage and the
    /// final prompt.
    pub fn partial(mut self, values: PromptArgs) -> Self {
        for (name, value) in values {
            self.bind(name, PartialValue::Static(value));
        }
        self
    }

    /// Bind a variable to a function evaluated once per format.
    pub fn partial_with<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.bind(name.into(), PartialValue::Dynamic(Arc::new(func)));
        self
    }

    fn bind(&mut self, name: String, value: PartialValue) {
        self.input_variables.retain(|v| *v != name);
        self.partials.insert(name, value);
    }

    /// Render every stage, then the final prompt. Caller values override
    /// partials.
    pub fn format(&self, args: &PromptArgs) -> Result<PromptValue, PromptError> {
        let mut values: PromptArgs = self
            .partials
            .iter()
            .filter(|(name, _)| !args.contains_key(*name))
            .map(|(name, partial)| (name.clone(), partial.resolve()))
            .collect();
        values.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (name, prompt) in &self.stages {
            let rendered = prompt.format_prompt(&values)?.to_string();
            tracing::trace!(stage = %name, chars = rendered.len(), "pipeline stage rendered");
            values.insert(name.clone(), rendered);
        }
        self.final_prompt.format_prompt(&values)
    }
}

impl fmt::Debug for PipelinePromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelinePromptTemplate")
            .field(
                "stages",
                &self.stages.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .field("input_variables", &self.input_variables)
            .field("partials", &self.partials)
            .finish_non_exhaustive()
    }
}

impl FormatPrompt for PipelinePromptTemplate {
    fn input_variables(&self) -> Vec<String> {
        self.input_variables.clone()
    }

    fn format_prompt(&self, args: &PromptArgs) -> Result<PromptValue, PromptError> {
        self.format(args)
    }
}

#[async_trait]
impl Runnable for PipelinePromptTemplate {
    type Input = PromptArgs;
    type Output = PromptValue;

    async fn invoke(&self, input: PromptArgs) -> Result<PromptValue, ChainError> {
        Ok(self.format(&input)?)
    }
}
