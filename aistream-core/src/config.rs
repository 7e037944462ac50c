use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::error::{CoreResult, StreamError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origin allowed by the CORS layer (credentials are allowed for it).
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Interval between server pings in milliseconds (default 25000ms)
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// A connection silent for this long is dropped (default 60000ms)
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
        }
    }
}

impl ServerCfg {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3000
}
fn default_cors_origin() -> String {
    "http://localhost:4200".into()
}
fn default_ping_interval_ms() -> u64 {
    25_000
}
fn default_ping_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamingCfg {
    /// Words per chunk
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    /// Minimum delay before each chunk in milliseconds
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for StreamingCfg {
    fn default() -> Self {
        Self {
            group_size: default_group_size(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl StreamingCfg {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

fn default_group_size() -> usize {
    crate::chunker::DEFAULT_GROUP_SIZE
}
fn default_pacing_ms() -> u64 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Canned,
    OpenAI,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CannedRule {
    /// Regex matched against the normalized prompt
    pub pattern: String,
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct CannedCfg {
    /// Checked in order, first match wins. Empty → built-in table.
    #[serde(default)]
    pub rules: Vec<CannedRule>,
    /// Answer when no rule matches. None → built-in default.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OpenAICfg {
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for OpenAICfg {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_openai_base(),
            model: default_openai_model(),
            system_prompt: None,
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base() -> String {
    "https://api.openai.com".into()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct GenerationCfg {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub canned: CannedCfg,
    #[serde(default)]
    pub openai: OpenAICfg,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientCfg {
    #[serde(default = "default_client_url")]
    pub url: String,
    /// Consecutive failed connects before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_client_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientCfg {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_ms: default_client_connect_timeout_ms(),
        }
    }
}

fn default_client_url() -> String {
    "ws://127.0.0.1:3000/ws".into()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_client_connect_timeout_ms() -> u64 {
    20_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub streaming: StreamingCfg,
    #[serde(default)]
    pub generation: GenerationCfg,
    #[serde(default)]
    pub client: ClientCfg,
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    /// The result is validated before it is returned.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(StreamError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| StreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| StreamError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| StreamError::Other(e.into())))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.streaming.group_size == 0 {
            return Err(StreamError::Validation(
                "streaming.group_size must be at least 1".into(),
            ));
        }
        if self.client.max_attempts == 0 {
            return Err(StreamError::Validation(
                "client.max_attempts must be at least 1".into(),
            ));
        }
        if self.client.max_delay_ms < self.client.base_delay_ms {
            return Err(StreamError::Validation(format!(
                "client.max_delay_ms ({}) is below client.base_delay_ms ({})",
                self.client.max_delay_ms, self.client.base_delay_ms
            )));
        }
        if self.server.ping_interval_ms == 0 || self.server.ping_timeout_ms == 0 {
            return Err(StreamError::Validation(
                "server ping interval and timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_protocol_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.streaming.group_size, 10);
        assert_eq!(cfg.streaming.pacing(), Duration::from_millis(100));
        assert_eq!(cfg.client.max_attempts, 5);
        assert_eq!(cfg.client.base_delay_ms, 1_000);
        assert_eq!(cfg.client.max_delay_ms, 5_000);
        assert_eq!(cfg.server.bind_addr(), "127.0.0.1:3000");
        assert_eq!(cfg.generation.provider, ProviderKind::Canned);
        cfg.validate().unwrap();
    }

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("stream.json");
        let json = r#"{
          "server": {"port": 4000, "cors_origin": "https://chat.example"},
          "streaming": {"group_size": 5, "pacing_ms": 20},
          "generation": {
            "provider": "openai",
            "openai": {"api_key_env": "MY_KEY", "model": "gpt-4o"}
          }
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.cors_origin, "https://chat.example");
        assert_eq!(cfg.streaming.group_size, 5);
        assert_eq!(cfg.generation.provider, ProviderKind::OpenAI);
        assert_eq!(cfg.generation.openai.api_key_env, "MY_KEY");
        assert_eq!(cfg.generation.openai.base_url, "https://api.openai.com");
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 60_000);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("stream.toml");
        let toml = r#"
[streaming]
group_size = 3

[generation]
provider = "canned"

[generation.canned]
default = "fallback answer"
[[generation.canned.rules]]
pattern = "(?i)weather"
response = "It is sunny."

[client]
url = "ws://10.0.0.2:3000/ws"
max_attempts = 2
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.streaming.group_size, 3);
        assert_eq!(cfg.streaming.pacing_ms, 100);
        assert_eq!(cfg.generation.canned.rules.len(), 1);
        assert_eq!(cfg.generation.canned.default.as_deref(), Some("fallback answer"));
        assert_eq!(cfg.client.max_attempts, 2);
        assert_eq!(cfg.client.max_delay_ms, 5_000);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/aistream-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            StreamError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            StreamError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, r#"{ "streaming": { "group_size": "ten" }"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            StreamError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("stream.conf");
        fs::write(&json_path, r#"{"streaming":{"pacing_ms":7}}"#).unwrap();
        let cfg = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg.streaming.pacing_ms, 7);

        let toml_path = dir.path().join("stream2.conf");
        fs::write(&toml_path, "[streaming]\npacing_ms = 9\n").unwrap();
        let cfg = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg.streaming.pacing_ms, 9);
    }

    #[test]
    fn zero_group_size_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("zero.toml");
        fs::write(&file, "[streaming]\ngroup_size = 0\n").unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            StreamError::Validation(msg) => assert!(msg.contains("group_size")),
            other => panic!("expected Validation error, got: {:?}", other),
        }
    }

    #[test]
    fn inverted_backoff_bounds_are_rejected() {
        let mut cfg = Config::default();
        cfg.client.base_delay_ms = 6_000;
        assert!(matches!(cfg.validate(), Err(StreamError::Validation(_))));

        let mut cfg = Config::default();
        cfg.client.max_attempts = 0;
        assert!(matches!(cfg.validate(), Err(StreamError::Validation(_))));
    }
}
