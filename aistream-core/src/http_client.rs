//! JSON-over-HTTP for generation backends.

use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::config::HttpCfg;
use crate::error::{CoreResult, StreamError};

const USER_AGENT: &str = concat!("aistream/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LIMIT: usize = 300;
const REQUEST_ID_HEADERS: [&str; 3] = ["x-request-id", "request-id", "x-amzn-requestid"];

/// A decoded upstream reply.
#[derive(Debug)]
pub struct Upstream<R> {
    pub body: R,
    pub request_id: Option<String>,
    pub latency: Duration,
}

/// reqwest client bound to one backend. Failures are reported as that
/// backend's `StreamError`s.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    provider: String,
}

impl HttpClient {
    pub fn from_config(cfg: &HttpCfg, provider: &str) -> CoreResult<Self> {
        let inner = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| StreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            provider: provider.to_string(),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn post_json<T, R>(
        &self,
        url: &str,
        body: &T,
        bearer: Option<&SecretString>,
    ) -> CoreResult<Upstream<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let mut req = self.inner.post(url).json(body);
        if let Some(key) = bearer {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = req.send().await.map_err(|e| {
            debug!(provider = %self.provider, error = %e, "request did not complete");
            self.unavailable()
        })?;
        let status = resp.status();
        let request_id = header_str(resp.headers(), &REQUEST_ID_HEADERS).map(str::to_owned);

        if !status.is_success() {
            let retry_after = header_str(resp.headers(), &["retry-after"])
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            return Err(self.status_error(status, retry_after, &text));
        }

        let body = resp.json::<R>().await.map_err(|e| StreamError::ProviderError {
            provider: self.provider.clone(),
            code: status.as_u16().to_string(),
            message: format!("undecodable reply: {e}"),
        })?;
        Ok(Upstream {
            body,
            request_id,
            latency: started.elapsed(),
        })
    }

    fn unavailable(&self) -> StreamError {
        StreamError::ProviderUnavailable {
            provider: self.provider.clone(),
        }
    }

    fn status_error(&self, status: StatusCode, retry_after: Option<u64>, body: &str) -> StreamError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return StreamError::RateLimited {
                provider: self.provider.clone(),
                retry_after,
            };
        }
        if status.is_server_error() {
            return self.unavailable();
        }
        StreamError::ProviderError {
            provider: self.provider.clone(),
            code: status.as_u16().to_string(),
            message: clip(body, ERROR_BODY_LIMIT),
        }
    }
}

/// First of `names` present with a valid string value.
fn header_str<'h>(headers: &'h HeaderMap, names: &[&str]) -> Option<&'h str> {
    names
        .iter()
        .find_map(|n| headers.get(*n).and_then(|v| v.to_str().ok()))
}

fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let end = (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::{Value, json};

    fn client() -> HttpClient {
        HttpClient::from_config(&HttpCfg::default(), "openai").unwrap()
    }

    async fn failing_post(status: u16, headers: &[(&str, &str)], body: &str) -> StreamError {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/gen");
            headers
                .iter()
                .fold(then.status(status).body(body), |t, (k, v)| t.header(*k, *v));
        });
        client()
            .post_json::<_, Value>(&server.url("/gen"), &json!({"prompt": "x"}), None)
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn success_decodes_body_and_sends_bearer() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path("/gen")
                .header("authorization", "Bearer sk-test")
                .json_body(json!({"prompt": "hi"}));
            then.status(200)
                .header("x-request-id", "req-42")
                .json_body(json!({"answer": "hello"}));
        });

        let key = SecretString::from("sk-test".to_string());
        let reply = client()
            .post_json::<_, Value>(&server.url("/gen"), &json!({"prompt": "hi"}), Some(&key))
            .await
            .unwrap();

        assert_eq!(reply.body["answer"], "hello");
        assert_eq!(reply.request_id.as_deref(), Some("req-42"));
        m.assert();
    }

    #[tokio::test]
    async fn too_many_requests_carries_retry_after() {
        match failing_post(429, &[("Retry-After", "7")], "slow down").await {
            StreamError::RateLimited { provider, retry_after } => {
                assert_eq!(provider, "openai");
                assert_eq!(retry_after, Some(7));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_mean_unavailable() {
        assert!(matches!(
            failing_post(502, &[], "bad gateway").await,
            StreamError::ProviderUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn client_errors_keep_a_clipped_body() {
        match failing_post(400, &[], &"x".repeat(1000)).await {
            StreamError::ProviderError { code, message, .. } => {
                assert_eq!(code, "400");
                assert_eq!(message.len(), ERROR_BODY_LIMIT + 3);
                assert!(message.ends_with("..."));
            }
            other => panic!("expected ProviderError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_success_is_a_provider_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/gen");
            then.status(200).body("<html>");
        });
        let err = client()
            .post_json::<_, Value>(&server.url("/gen"), &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::ProviderError { ref code, .. } if code == "200"));
    }

    #[tokio::test]
    async fn refused_connection_means_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client()
            .post_json::<_, Value>(&format!("http://{addr}/gen"), &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::ProviderUnavailable { .. }));
    }

    #[test]
    fn clip_never_splits_a_character() {
        let s = "é".repeat(10);
        assert_eq!(clip(&s, 5), "éé...");
        assert_eq!(clip("short", 300), "short");
    }
}
