use crate::config::Config;
use crate::error::ConfigError;
use crate::providers::openai::{GROQ_BASE_URL, OPENAI_BASE_URL, OPENROUTER_BASE_URL};
use crate::providers::{OllamaProvider, OpenAIProvider};
use crate::traits::Provider;
use std::sync::Arc;
use std::time::Duration;

const GROQ_KEY_VARS: &[&str] = &["GROQ_API_KEY", "TINKER_GROQ_API_KEY"];
const OPENAI_KEY_VARS: &[&str] = &["OPENAI_API_KEY", "TINKER_OPENAI_API_KEY"];
const OPENROUTER_KEY_VARS: &[&str] = &["OPENROUTER_API_KEY", "TINKER_OPENROUTER_API_KEY"];

/// Build the configured chat backend. Fails fast when a remote backend has no
/// credential, before any loop state exists.
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>, ConfigError> {
    let provider_name = config.provider_name();
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let (env_vars, default_base_url): (&[&str], &str) = match provider_name.as_str() {
        "ollama" => {
            let mut provider = OllamaProvider::new().with_timeout(timeout);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            return Ok(Arc::new(provider));
        }
        "groq" => (GROQ_KEY_VARS, GROQ_BASE_URL),
        "openai" => (OPENAI_KEY_VARS, OPENAI_BASE_URL),
        "openrouter" => (OPENROUTER_KEY_VARS, OPENROUTER_BASE_URL),
        _ => return Err(ConfigError::UnknownProvider(provider_name)),
    };

    let api_key = resolve_api_key_with_fallback(env_vars, &config.api_key, |var| {
        std::env::var(var).ok()
    })
    .ok_or_else(|| ConfigError::MissingCredential {
        provider: provider_name.clone(),
        vars: env_vars.join(", "),
    })?;

    let provider = OpenAIProvider::new(api_key)
        .with_label(provider_name)
        .with_base_url(config.base_url.as_deref().unwrap_or(default_base_url))
        .with_timeout(timeout);

    Ok(Arc::new(provider))
}

fn resolve_api_key_with_fallback(
    env_vars: &[&str],
    config_key: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_vars
        .iter()
        .filter_map(|var| lookup(var))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
        .or_else(|| {
            let key = config_key.trim();
            (!key.is_empty()).then(|| key.to_string())
        })
}
