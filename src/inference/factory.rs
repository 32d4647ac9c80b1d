//! Chat model factory.
//!
//! Builds ready-to-use clients from the environment record or from a model
//! registry. Nothing here contacts the endpoint.

use super::client::ChatModel;
use super::config::{
    ordered_model_keys, EnvConfig, ModelSettings, ModelsConfig, DEFAULT_TEMPERATURE,
};
use super::errors::InferenceError;
use super::types::ChatMessage;
use crate::runnable::{PromptValue, Runnable, WithFallbacks};

/// The primary client: exactly the three environment values, temperature
/// 0.7 and the default retry budget.
pub fn primary_model(env: &EnvConfig) -> Result<ChatModel, InferenceError> {
    let settings = ModelSettings::from_env_config(env).with_temperature(DEFAULT_TEMPERATURE);
    tracing::debug!(
        model = settings.model.as_deref().unwrap_or("<unset>"),
        base_url = settings.base_url.as_deref().unwrap_or("<unset>"),
        max_retries = settings.max_retries,
        "building primary model"
    );
    ChatModel::new(settings)
}

/// A client that always fails on first use.
///
/// Demo fixture for fallback composition: same model name and key as the
/// environment, but a blank base URL and no retries, so every call ends in
/// [`InferenceError::InvalidEndpoint`] without any network traffic.
pub fn failing_demo_model(env: &EnvConfig) -> Result<ChatModel, InferenceError> {
    let settings = ModelSettings::from_env_config(env)
        .with_base_url("")
        .with_max_retries(0);
    ChatModel::new(settings)
}

/// The registry's active model wrapped with every other fallback-chain model
/// as an ordered fallback.
pub fn chain_from_registry(
    config: &ModelsConfig,
) -> Result<WithFallbacks<PromptValue, ChatMessage>, InferenceError> {
    let mut models = Vec::new();
    for key in ordered_model_keys(config)? {
        // ordered_model_keys only yields keys present in the registry
        let Some(entry) = config.models.get(&key) else {
            continue;
        };
        tracing::debug!(model_key = %key, "adding model to chain");
        models.push(ChatModel::new(entry.to_settings())?);
    }

    let mut models = models.into_iter();
    let primary = models.next().ok_or_else(|| InferenceError::ConfigError {
        reason: "model registry resolved to no models".into(),
    })?;
    Ok(primary.with_fallbacks(models.map(Runnable::boxed).collect()))
}
