use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::config::{Config, ProviderKind};
use crate::error::{CoreResult, StreamError};
use crate::http_client::HttpClient;
use crate::provider::{CannedProvider, GenerationProvider};
use crate::providers::openai::OpenAI;

/// Build the generation provider selected by `generation.provider`.
///
/// The OpenAI provider reads its key from the environment variable named in
/// config; a missing key is a validation error rather than a silent fallback.
pub fn build_provider(cfg: &Config) -> CoreResult<Arc<dyn GenerationProvider>> {
    build_provider_with_env(cfg, |name| std::env::var(name).ok())
}

fn build_provider_with_env(
    cfg: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> CoreResult<Arc<dyn GenerationProvider>> {
    let provider: Arc<dyn GenerationProvider> = match cfg.generation.provider {
        ProviderKind::Canned => Arc::new(CannedProvider::from_config(&cfg.generation.canned)?),
        ProviderKind::OpenAI => {
            let oa = &cfg.generation.openai;
            let key = env(&oa.api_key_env).filter(|k| !k.is_empty()).ok_or_else(|| {
                StreamError::Validation(format!(
                    "provider 'openai' selected but ${} is not set",
                    oa.api_key_env
                ))
            })?;
            let http = HttpClient::from_config(&cfg.http, "openai")?;
            Arc::new(OpenAI::new(http, SecretString::from(key), oa))
        }
    };
    info!(provider = provider.name(), "generation provider ready");
    Ok(provider)
}
