use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::config::CannedCfg;
use crate::error::{CoreResult, StreamError};
use crate::model::Generation;

/// Produces a complete answer for a prompt. Implementations may fail; the
/// streaming session never retries.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> CoreResult<Generation>;
}

pub const DEFAULT_ANSWER: &str = "I understand you want to create captions. I can help you generate engaging and descriptive captions for your content. Just provide me with some details about what you want to caption, and I will suggest appropriate text that captures the essence of your message. I aim to create natural, flowing text that connects with your audience while maintaining your intended tone and style. Feel free to ask for revisions or provide more specific requirements to help me better meet your needs.";

pub const GREETING_ANSWER: &str = "Hello! How can I help you today? I'm here to assist with any questions or tasks you might have.";

pub const HELP_ANSWER: &str = "I'm here to assist you. What would you like to know? Feel free to ask any questions, and I'll do my best to help.";

/// Compiled lookup rule
#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    response: String,
}

/// Static lookup-table provider. Rules are tried in order against the
/// prompt; the first match answers, otherwise the default answer is used.
#[derive(Debug)]
pub struct CannedProvider {
    rules: Vec<CompiledRule>,
    default: String,
}

/// Built-in table: greetings, then help requests. Matching is a
/// case-insensitive substring test.
const BUILTIN_RULES: [(&str, &str); 2] = [
    ("(?i)hello|hi", GREETING_ANSWER),
    ("(?i)help", HELP_ANSWER),
];

fn compile(pattern: &str, response: &str) -> CoreResult<CompiledRule> {
    let regex = Regex::new(pattern).map_err(|e| {
        StreamError::Validation(format!("invalid canned rule regex '{pattern}': {e}"))
    })?;
    Ok(CompiledRule {
        regex,
        response: response.to_string(),
    })
}

impl CannedProvider {
    /// The built-in table with the default answer as fallback.
    pub fn builtin() -> CoreResult<Self> {
        Self::from_config(&CannedCfg::default())
    }

    /// Build from config, compiling each rule's regex. An empty rule list
    /// keeps the built-in table.
    pub fn from_config(cfg: &CannedCfg) -> CoreResult<Self> {
        let rules = if cfg.rules.is_empty() {
            BUILTIN_RULES
                .iter()
                .map(|(p, r)| compile(p, r))
                .collect::<CoreResult<Vec<_>>>()?
        } else {
            cfg.rules
                .iter()
                .map(|r| compile(&r.pattern, &r.response))
                .collect::<CoreResult<Vec<_>>>()?
        };
        Ok(Self {
            rules,
            default: cfg.default.clone().unwrap_or_else(|| DEFAULT_ANSWER.to_string()),
        })
    }

    fn pick(&self, prompt: &str) -> &str {
        for r in &self.rules {
            if r.regex.is_match(prompt) {
                return &r.response;
            }
        }
        &self.default
    }
}

#[async_trait]
impl GenerationProvider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, prompt: &str) -> CoreResult<Generation> {
        let response = self.pick(prompt).to_string();
        debug!(provider = "canned", chars = response.len(), "generated response");
        Ok(Generation { response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CannedRule;

    #[tokio::test]
    async fn builtin_table_matches_greeting_then_help() {
        let p = CannedProvider::builtin().unwrap();
        assert_eq!(p.generate("Hello there").await.unwrap().response, GREETING_ANSWER);
        assert_eq!(p.generate("HI").await.unwrap().response, GREETING_ANSWER);
        assert_eq!(p.generate("please HELP").await.unwrap().response, HELP_ANSWER);
        assert_eq!(p.generate("caption my photo").await.unwrap().response, DEFAULT_ANSWER);
    }

    #[tokio::test]
    async fn greeting_wins_over_help() {
        let p = CannedProvider::builtin().unwrap();
        assert_eq!(p.generate("hello, help me").await.unwrap().response, GREETING_ANSWER);
    }

    #[tokio::test]
    async fn configured_rules_replace_builtin() {
        let cfg = CannedCfg {
            rules: vec![CannedRule {
                pattern: "(?i)^ping$".into(),
                response: "pong".into(),
            }],
            default: Some("nothing to say".into()),
        };
        let p = CannedProvider::from_config(&cfg).unwrap();
        assert_eq!(p.generate("PING").await.unwrap().response, "pong");
        assert_eq!(p.generate("hello").await.unwrap().response, "nothing to say");
    }

    #[test]
    fn invalid_rule_regex_yields_validation_error() {
        let cfg = CannedCfg {
            rules: vec![CannedRule {
                pattern: "(".into(),
                response: "x".into(),
            }],
            default: None,
        };
        match CannedProvider::from_config(&cfg).unwrap_err() {
            StreamError::Validation(msg) => assert!(msg.contains("invalid canned rule regex")),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn default_config_builds_the_builtin_table_without_panicking() {
        let p = CannedProvider::from_config(&CannedCfg::default()).unwrap();
        assert_eq!(p.rules.len(), BUILTIN_RULES.len());
        assert_eq!(p.generate("hi").await.unwrap().response, GREETING_ANSWER);
        assert_eq!(p.generate("anything").await.unwrap().response, DEFAULT_ANSWER);
    }

    #[test]
    fn default_answer_is_long_enough_to_stream() {
        assert!(crate::chunker::chunk(DEFAULT_ANSWER, 10).len() > 5);
    }
}
