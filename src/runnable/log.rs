//! Run log events: every step's output as it completes, then the final value.

use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use super::ChainError;

/// Stream of run log events.
pub type LogStream<'a, T> = BoxStream<'a, Result<LogEvent<T>, ChainError>>;

/// One completed step of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepLog {
    pub name: String,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent<T> {
    /// A step finished; its output rendered as JSON.
    Step(StepLog),
    /// The value `invoke` would have returned. Always the last event.
    Final(T),
}

impl<T> LogEvent<T> {
    pub fn step(name: impl Into<String>, output: &impl Serialize) -> Self {
        LogEvent::Step(StepLog {
            name: name.into(),
            output: serde_json::to_value(output).unwrap_or(Value::Null),
        })
    }

    pub fn as_step(&self) -> Option<&StepLog> {
        match self {
            LogEvent::Step(step) => Some(step),
            LogEvent::Final(_) => None,
        }
    }

    pub fn into_final(self) -> Option<T> {
        match self {
            LogEvent::Final(value) => Some(value),
            LogEvent::Step(_) => None,
        }
    }
}

/// `crate::module::Name<Generics>` → `Name`.
pub(crate) fn short_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}
