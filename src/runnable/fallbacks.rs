//! Graceful fallback across interchangeable runnables.
//!
//! The primary runnable is tried first; on a handled error each fallback is
//! tried in order with a fresh clone of the input. The first success wins.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::json;

use super::{BoxRunnable, ChainError, ChainStream, LogEvent, LogStream, Runnable};

/// Default predicate: every error triggers the next fallback.
fn handle_all(_: &ChainError) -> bool {
    true
}

pub struct WithFallbacks<I, O> {
    primary: BoxRunnable<I, O>,
    fallbacks: Vec<BoxRunnable<I, O>>,
    handles: fn(&ChainError) -> bool,
}

/// Progress of [`WithFallbacks::stream_log`] across attempts.
struct LogAttempts<'a, I, O> {
    input: I,
    next: usize,
    current: Option<LogStream<'a, O>>,
    first_error: Option<ChainError>,
    done: bool,
}

impl<I, O> WithFallbacks<I, O>
where
    I: Clone + Send + 'static,
    O: Serialize + Send + 'static,
{
    pub fn new(primary: BoxRunnable<I, O>, fallbacks: Vec<BoxRunnable<I, O>>) -> Self {
        Self {
            primary,
            fallbacks,
            handles: handle_all,
        }
    }

    /// Restrict which errors move on to the next runnable. Others are
    /// returned immediately.
    pub fn with_handled_errors(mut self, handles: fn(&ChainError) -> bool) -> Self {
        self.handles = handles;
        self
    }

    /// Primary plus fallbacks.
    pub fn runnable_count(&self) -> usize {
        1 + self.fallbacks.len()
    }

    /// Primary at 0, then fallbacks in order.
    fn runnable_at(&self, idx: usize) -> Option<&BoxRunnable<I, O>> {
        match idx {
            0 => Some(&self.primary),
            n => self.fallbacks.get(n - 1),
        }
    }

    fn exhausted(&self, first: ChainError) -> ChainError {
        tracing::warn!(attempts = self.runnable_count(), error = %first, "all runnables failed");
        ChainError::FallbacksExhausted {
            attempts: self.runnable_count(),
            first: Box::new(first),
        }
    }

    /// Open a stream and pull its first item so a failure can still move on
    /// to the next runnable.
    async fn open<'a>(
        runnable: &'a BoxRunnable<I, O>,
        input: I,
    ) -> Result<ChainStream<'a, O>, ChainError> {
        let mut inner = runnable.stream(input);
        match inner.next().await {
            None => Ok(stream::empty().boxed()),
            Some(Ok(chunk)) => Ok(stream::once(future::ready(Ok(chunk))).chain(inner).boxed()),
            Some(Err(e)) => Err(e),
        }
    }

    async fn open_first_healthy<'a>(&'a self, input: I) -> Result<ChainStream<'a, O>, ChainError> {
        let first = match Self::open(&self.primary, input.clone()).await {
            Ok(s) => return Ok(s),
            Err(e) if !(self.handles)(&e) => return Err(e),
            Err(e) => e,
        };
        tracing::warn!(error = %first, "primary stream failed, trying fallbacks");

        for (idx, fallback) in self.fallbacks.iter().enumerate() {
            match Self::open(fallback, input.clone()).await {
                Ok(s) => {
                    tracing::info!(fallback = idx + 1, "streaming from fallback");
                    return Ok(s);
                }
                Err(e) if !(self.handles)(&e) => return Err(e),
                Err(e) => tracing::warn!(fallback = idx + 1, error = %e, "fallback stream failed"),
            }
        }
        Err(self.exhausted(first))
    }
}

#[async_trait]
impl<I, O> Runnable for WithFallbacks<I, O>
where
    I: Clone + Send + 'static,
    O: Serialize + Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn invoke(&self, input: I) -> Result<O, ChainError> {
        let first = match self.primary.invoke(input.clone()).await {
            Ok(output) => return Ok(output),
            Err(e) if !(self.handles)(&e) => return Err(e),
            Err(e) => e,
        };
        tracing::warn!(error = %first, "primary failed, trying fallbacks");

        for (idx, fallback) in self.fallbacks.iter().enumerate() {
            match fallback.invoke(input.clone()).await {
                Ok(output) => {
                    tracing::info!(fallback = idx + 1, "fallback succeeded");
                    return Ok(output);
                }
                Err(e) if !(self.handles)(&e) => return Err(e),
                Err(e) => tracing::warn!(fallback = idx + 1, error = %e, "fallback failed"),
            }
        }
        Err(self.exhausted(first))
    }

    /// Switches runnables only before the first chunk. An error after output
    /// has started is passed through.
    fn stream<'a>(&'a self, input: I) -> ChainStream<'a, O> {
        stream::once(self.open_first_healthy(input))
            .try_flatten()
            .boxed()
    }

    /// Events of every attempt in order. A handled failure is logged as a
    /// step with an `error` field before the next runnable starts.
    fn stream_log<'a>(&'a self, input: I) -> LogStream<'a, O> {
        let attempts = LogAttempts {
            input,
            next: 0,
            current: None,
            first_error: None,
            done: false,
        };
        stream::unfold(attempts, move |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                if let Some(events) = state.current.as_mut() {
                    let event = events.next().await;
                    match event {
                        Some(Ok(event)) => return Some((Ok(event), state)),
                        None => return None,
                        Some(Err(e)) if !(self.handles)(&e) => {
                            state.done = true;
                            return Some((Err(e), state));
                        }
                        Some(Err(e)) => {
                            let name = self
                                .runnable_at(state.next - 1)
                                .map(|r| r.name())
                                .unwrap_or_default();
                            tracing::warn!(runnable = %name, error = %e, "attempt failed");
                            let step = LogEvent::step(name, &json!({ "error": e.to_string() }));
                            state.current = None;
                            state.first_error.get_or_insert(e);
                            return Some((Ok(step), state));
                        }
                    }
                }

                match self.runnable_at(state.next) {
                    Some(runnable) => {
                        state.current = Some(runnable.stream_log(state.input.clone()));
                        state.next += 1;
                    }
                    None => {
                        state.done = true;
                        let first = state.first_error.take()?;
                        return Some((Err(self.exhausted(first)), state));
                    }
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::inference::InferenceError;
    use crate::runnable::RunnableLambda;

    fn failing(reason: &'static str) -> BoxRunnable<String, String> {
        RunnableLambda::new(move |_: String| -> Result<String, ChainError> {
            Err(ChainError::custom(reason))
        })
        .boxed()
    }

    fn echo(tag: &'static str) -> BoxRunnable<String, String> {
        RunnableLambda::new(move |s: String| Ok(format!("{tag}:{s}"))).boxed()
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallbacks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let fallback = RunnableLambda::new(move |s: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(s)
        })
        .boxed();

        let chain = WithFallbacks::new(echo("primary"), vec![fallback]);
        assert_eq!(chain.invoke("hi".into()).await.unwrap(), "primary:hi");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_in_order_with_same_input() {
        let chain = WithFallbacks::new(
            failing("primary down"),
            vec![failing("second down"), echo("third"), echo("fourth")],
        );
        assert_eq!(chain.runnable_count(), 4);
        assert_eq!(chain.invoke("joke".into()).await.unwrap(), "third:joke");
    }

    #[tokio::test]
    async fn test_all_failing_carries_first_error() {
        let chain = WithFallbacks::new(failing("primary down"), vec![failing("backup down")]);
        match chain.invoke("x".into()).await.unwrap_err() {
            ChainError::FallbacksExhausted { attempts, first } => {
                assert_eq!(attempts, 2);
                assert_eq!(first.to_string(), "primary down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unhandled_error_is_returned_immediately() {
        fn only_inference(e: &ChainError) -> bool {
            matches!(e, ChainError::Inference(_))
        }
        let primary = RunnableLambda::new(|_: String| -> Result<String, ChainError> {
            Err(InferenceError::Timeout { duration_secs: 1 }.into())
        })
        .boxed();

        let chain = WithFallbacks::new(primary, vec![failing("not inference"), echo("never")])
            .with_handled_errors(only_inference);
        let err = chain.invoke("x".into()).await.unwrap_err();
        assert_eq!(err.to_string(), "not inference");
    }

    #[tokio::test]
    async fn test_stream_switches_before_first_chunk() {
        let chain = failing("primary down").with_fallbacks(vec![echo("backup")]);
        let items: Vec<String> = chain
            .stream("hi".into())
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(items, vec!["backup:hi"]);
    }

    #[tokio::test]
    async fn test_stream_all_failing() {
        let chain = failing("a").with_fallbacks(vec![failing("b")]);
        let items: Vec<_> = chain.stream("hi".into()).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(ChainError::FallbacksExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_log_records_failed_attempts() {
        let chain = WithFallbacks::new(
            RunnableLambda::new(|_: String| -> Result<String, ChainError> {
                Err(ChainError::custom("primary down"))
            })
            .with_name("primary")
            .boxed(),
            vec![RunnableLambda::new(|s: String| Ok(format!("backup:{s}")))
                .with_name("backup")
                .boxed()],
        );
        let events: Vec<LogEvent<String>> = chain
            .stream_log("hi".into())
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        let failed = events[0].as_step().unwrap();
        assert_eq!(failed.name, "primary");
        assert_eq!(failed.output["error"], "primary down");
        assert_eq!(events[1].as_step().unwrap().name, "backup");
        assert_eq!(events[2], LogEvent::Final("backup:hi".to_string()));
    }

    #[tokio::test]
    async fn test_stream_log_all_failing_ends_with_exhausted() {
        let chain = failing("a").with_fallbacks(vec![failing("b")]);
        let events: Vec<_> = chain.stream_log("hi".into()).collect().await;
        assert_eq!(events.len(), 3);
        assert!(events[0].is_ok() && events[1].is_ok());
        assert!(matches!(
            events[2],
            Err(ChainError::FallbacksExhausted { attempts: 2, .. })
        ));
    }
}
