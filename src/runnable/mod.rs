//! Runnable composition.
//!
//! Everything that turns an input into an output (prompt templates, chat
//! models, output parsers, closures) implements [`Runnable`]. Runnables
//! compose with [`Runnable::pipe`] and [`Runnable::with_fallbacks`], and every
//! composite supports single, batched and streaming execution, plus a run log
//! of each step's output via [`Runnable::stream_log`].

pub mod errors;
pub mod fallbacks;
pub mod lambda;
pub mod log;
pub mod pipe;
pub mod value;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::inference::ChatMessage;

pub use errors::ChainError;
pub use fallbacks::WithFallbacks;
pub use lambda::RunnableLambda;
pub use log::{LogEvent, LogStream, StepLog};
pub use pipe::Pipe;
pub use value::PromptValue;

/// Concurrent invocations in [`Runnable::batch`].
pub const BATCH_CONCURRENCY: usize = 8;

/// Stream of partial outputs.
pub type ChainStream<'a, T> = BoxStream<'a, Result<T, ChainError>>;

/// Type-erased runnable.
pub type BoxRunnable<I, O> = Box<dyn Runnable<Input = I, Output = O>>;

/// Downcast `value` to `T` when they are the same type.
fn cast<T: 'static, U: 'static>(value: U) -> Option<T> {
    let boxed: Box<dyn Any> = Box::new(value);
    boxed.downcast::<T>().ok().map(|b| *b)
}

/// Join the chunks a [`Runnable::transform`] received into one input.
///
/// Zero or one chunk passes through. Several `String` chunks concatenate;
/// several `ChatMessage` chunks concatenate their content under the first
/// chunk's role. Any other input type cannot be merged.
pub(crate) fn merge_chunks<T: 'static>(mut chunks: Vec<T>) -> Result<Option<T>, ChainError> {
    if chunks.len() <= 1 {
        return Ok(chunks.pop());
    }
    let count = chunks.len();
    let chunks: Box<dyn Any> = Box::new(chunks);
    let chunks = match chunks.downcast::<Vec<String>>() {
        Ok(text) => return Ok(cast(text.concat())),
        Err(other) => other,
    };
    if let Ok(messages) = chunks.downcast::<Vec<ChatMessage>>() {
        let role = messages[0].role;
        let content: String = messages.iter().map(|m| m.content.as_str()).collect();
        return Ok(cast(ChatMessage::new(role, content)));
    }
    Err(ChainError::custom(format!(
        "cannot merge {count} streamed chunks of {}",
        std::any::type_name::<T>()
    )))
}

#[async_trait]
pub trait Runnable: Send + Sync {
    type Input: Send + 'static;
    type Output: Serialize + Send + 'static;

    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, ChainError>;

    /// Invoke on every input concurrently. Results keep input order and one
    /// failure does not affect the others.
    async fn batch(&self, inputs: Vec<Self::Input>) -> Vec<Result<Self::Output, ChainError>> {
        stream::iter(inputs)
            .map(|input| self.invoke(input))
            .buffered(BATCH_CONCURRENCY)
            .collect()
            .await
    }

    /// Stream partial outputs. Defaults to a single item from `invoke`.
    fn stream<'a>(&'a self, input: Self::Input) -> ChainStream<'a, Self::Output> {
        stream::once(self.invoke(input)).boxed()
    }

    /// Map a stream of input chunks to a stream of outputs.
    ///
    /// By default the chunks are merged into one input (see [`merge_chunks`])
    /// and passed to `stream` once. An empty upstream yields nothing.
    fn transform<'a>(
        &'a self,
        upstream: ChainStream<'a, Self::Input>,
    ) -> ChainStream<'a, Self::Output> {
        stream::once(async move {
            let chunks: Vec<Self::Input> = upstream.try_collect().await?;
            Ok::<_, ChainError>(match merge_chunks(chunks)? {
                Some(input) => self.stream(input),
                None => stream::empty().boxed(),
            })
        })
        .try_flatten()
        .boxed()
    }

    /// Name used in run logs. Defaults to the bare type name.
    fn name(&self) -> String {
        log::short_type_name(std::any::type_name::<Self>()).to_string()
    }

    /// Run and report every step's output as it completes, ending with the
    /// final output. Leaf runnables report a single step.
    fn stream_log<'a>(&'a self, input: Self::Input) -> LogStream<'a, Self::Output> {
        stream::once(async move {
            let output = self.invoke(input).await?;
            let events: [Result<LogEvent<Self::Output>, ChainError>; 2] =
                [Ok(LogEvent::step(self.name(), &output)), Ok(LogEvent::Final(output))];
            Ok::<_, ChainError>(stream::iter(events))
        })
        .try_flatten()
        .boxed()
    }

    fn pipe<R>(self, next: R) -> Pipe<Self, R>
    where
        Self: Sized,
        R: Runnable<Input = Self::Output>,
    {
        Pipe::new(self, next)
    }

    fn with_fallbacks(
        self,
        fallbacks: Vec<BoxRunnable<Self::Input, Self::Output>>,
    ) -> WithFallbacks<Self::Input, Self::Output>
    where
        Self: Sized + 'static,
        Self::Input: Clone,
    {
        WithFallbacks::new(Box::new(self), fallbacks)
    }

    fn boxed(self) -> BoxRunnable<Self::Input, Self::Output>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

#[async_trait]
impl<R: Runnable + ?Sized> Runnable for Box<R> {
    type Input = R::Input;
    type Output = R::Output;

    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, ChainError> {
        (**self).invoke(input).await
    }

    async fn batch(&self, inputs: Vec<Self::Input>) -> Vec<Result<Self::Output, ChainError>> {
        (**self).batch(inputs).await
    }

    fn stream<'a>(&'a self, input: Self::Input) -> ChainStream<'a, Self::Output> {
        (**self).stream(input)
    }

    fn transform<'a>(
        &'a self,
        upstream: ChainStream<'a, Self::Input>,
    ) -> ChainStream<'a, Self::Output> {
        (**self).transform(upstream)
    }

    fn name(&self) -> String {
        (**self).name()
    }

    fn stream_log<'a>(&'a self, input: Self::Input) -> LogStream<'a, Self::Output> {
        (**self).stream_log(input)
    }
}

#[async_trait]
impl<R: Runnable + ?Sized> Runnable for Arc<R> {
    type Input = R::Input;
    type Output = R::Output;

    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, ChainError> {
        (**self).invoke(input).await
    }

    async fn batch(&self, inputs: Vec<Self::Input>) -> Vec<Result<Self::Output, ChainError>> {
        (**self).batch(inputs).await
    }

    fn stream<'a>(&'a self, input: Self::Input) -> ChainStream<'a, Self::Output> {
        (**self).stream(input)
    }

    fn transform<'a>(
        &'a self,
        upstream: ChainStream<'a, Self::Input>,
    ) -> ChainStream<'a, Self::Output> {
        (**self).transform(upstream)
    }

    fn name(&self) -> String {
        (**self).name()
    }

    fn stream_log<'a>(&'a self, input: Self::Input) -> LogStream<'a, Self::Output> {
        (**self).stream_log(input)
    }
}
