use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OpenAICfg;
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::model::Generation;
use crate::provider::GenerationProvider;

/// Generation backed by an OpenAI-compatible `/v1/chat/completions` endpoint.
/// The prompt is sent as a single user turn, with no history.
#[derive(Debug, Clone)]
pub struct OpenAI {
    http: HttpClient,
    base: String,
    model: String,
    system_prompt: Option<String>,
    api_key: SecretString,
}

impl OpenAI {
    pub fn new(http: HttpClient, api_key: SecretString, cfg: &OpenAICfg) -> Self {
        Self {
            http,
            api_key,
            base: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            system_prompt: cfg.system_prompt.clone(),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        let cfg = OpenAICfg {
            base_url: server_base.to_string(),
            ..OpenAICfg::default()
        };
        OpenAI::new(
            HttpClient::from_config(&crate::config::HttpCfg::default(), "openai").unwrap(),
            SecretString::from("test-key".to_string()),
            &cfg,
        )
    }
}

// Only the fields this provider reads or sends.
#[derive(Serialize, Deserialize)]
struct ChatTurn {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
}

#[derive(Deserialize)]
struct CompletionReply {
    choices: Vec<ReplyChoice>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ChatTurn,
}

#[async_trait]
impl GenerationProvider for OpenAI {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &str) -> CoreResult<Generation> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatTurn {
                role: "system".into(),
                content: system.clone(),
            });
        }
        messages.push(ChatTurn {
            role: "user".into(),
            content: prompt.to_string(),
        });
        let payload = CompletionRequest {
            model: &self.model,
            messages,
        };
        let url = format!("{}/v1/chat/completions", self.base);
        let reply = self
            .http
            .post_json::<_, CompletionReply>(&url, &payload, Some(&self.api_key))
            .await?;

        let response = reply
            .body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        debug!(
            provider = self.http.provider(),
            model = %self.model,
            upstream_id = ?reply.request_id,
            latency_ms = reply.latency.as_millis() as u64,
            "generated response"
        );
        Ok(Generation { response })
    }
}
