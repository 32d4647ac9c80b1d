//! Sequential composition of two runnables.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};

use super::{ChainError, ChainStream, LogEvent, LogStream, Runnable};

/// Two runnables in sequence: the output of `first` is the input of `second`.
#[derive(Debug, Clone)]
pub struct Pipe<A, B> {
    first: A,
    second: B,
}

impl<A, B> Pipe<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }
}

#[async_trait]
impl<A, B> Runnable for Pipe<A, B>
where
    A: Runnable,
    B: Runnable<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn invoke(&self, input: Self::Input) -> Result<Self::Output, ChainError> {
        let intermediate = self.first.invoke(input).await?;
        self.second.invoke(intermediate).await
    }

    /// Streams `first` and feeds its chunks through `second.transform`, so a
    /// streaming model followed by a streaming parser emits per token.
    fn stream<'a>(&'a self, input: Self::Input) -> ChainStream<'a, Self::Output> {
        self.second.transform(self.first.stream(input))
    }

    fn transform<'a>(
        &'a self,
        upstream: ChainStream<'a, Self::Input>,
    ) -> ChainStream<'a, Self::Output> {
        self.second.transform(self.first.transform(upstream))
    }

    fn name(&self) -> String {
        format!("{} | {}", self.first.name(), self.second.name())
    }

    /// Steps of `first` are forwarded as they arrive. Its final output starts
    /// `second`, whose events follow.
    fn stream_log<'a>(&'a self, input: Self::Input) -> LogStream<'a, Self::Output> {
        self.first
            .stream_log(input)
            .map_ok(move |event| match event {
                LogEvent::Step(step) => {
                    stream::once(future::ready(Ok(LogEvent::Step(step)))).boxed()
                }
                LogEvent::Final(intermediate) => self.second.stream_log(intermediate),
            })
            .try_flatten()
            .boxed()
    }
}
