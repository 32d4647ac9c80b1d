use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;

use super::{ChainError, Runnable};

/// Adapts a plain closure into a [`Runnable`].
pub struct RunnableLambda<I, O, F> {
    func: F,
    name: Option<String>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> RunnableLambda<I, O, F>
where
    F: Fn(I) -> Result<O, ChainError>,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            name: None,
            _marker: PhantomData,
        }
    }

    /// Name shown in run logs instead of `RunnableLambda`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl<I, O, F> fmt::Debug for RunnableLambda<I, O, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableLambda")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, O, F> Runnable for RunnableLambda<I, O, F>
where
    I: Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Result<O, ChainError> + Send + Sync,
{
    type Input = I;
    type Output = O;

    async fn invoke(&self, input: I) -> Result<O, ChainError> {
        (self.func)(input)
    }

    fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| "RunnableLambda".to_string())
    }
}
