//! Chat model client for OpenAI-compatible endpoints.
//!
//! - Environment and YAML registry configuration
//! - Streaming and non-streaming chat completions with retry
//! - SSE stream parsing
//! - Model factories, including the deliberately broken demo client
//!
//! The client speaks the OpenAI Chat Completions API, so switching
//! providers is a configuration change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod factory;
pub mod streaming;
pub mod types;

pub use client::ChatModel;
pub use config::{EnvConfig, ModelEntry, ModelSettings, ModelsConfig};
pub use errors::InferenceError;
pub use factory::{chain_from_registry, failing_demo_model, primary_model};
pub use types::{ChatMessage, ChatResponse, Role, StreamChunk, Usage};
