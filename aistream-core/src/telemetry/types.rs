use serde::{Deserialize, Serialize};

/// Summary of one streaming session, handed to the installed sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionTrace {
    pub connection_id: Option<String>,
    pub request_id: Option<String>,

    /// Generation provider name, e.g. "canned", "openai".
    pub provider: Option<String>,

    /// "completed", "aborted" or "failed".
    pub outcome: Option<String>,

    pub chunks_sent: u32,
    pub chunks_total: u32,

    /// Wall time from request receipt to the terminal state.
    pub latency_ms: Option<u64>,

    pub error_message: Option<String>,
}

impl SessionTrace {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn connection_id(mut self, v: &str) -> Self {
        self.connection_id = Some(v.to_string());
        self
    }
    pub fn request_id(mut self, v: &str) -> Self {
        self.request_id = Some(v.to_string());
        self
    }
    pub fn provider(mut self, v: &str) -> Self {
        self.provider = Some(v.to_string());
        self
    }
    pub fn outcome(mut self, v: &str) -> Self {
        self.outcome = Some(v.to_string());
        self
    }
    pub fn chunks(mut self, sent: u32, total: u32) -> Self {
        self.chunks_sent = sent;
        self.chunks_total = total;
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error_message_opt(mut self, v: Option<&str>) -> Self {
        self.error_message = v.map(|s| s.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_trace_serializes() {
        let trace = SessionTrace::new()
            .connection_id("conn-1")
            .request_id("req-abc")
            .provider("canned")
            .outcome("aborted")
            .chunks(2, 5)
            .latency_ms(42);

        let as_json = serde_json::to_value(&trace).unwrap();
        assert_eq!(as_json["connection_id"], json!("conn-1"));
        assert_eq!(as_json["outcome"], json!("aborted"));
        assert_eq!(as_json["chunks_sent"], json!(2));
        assert_eq!(as_json["chunks_total"], json!(5));
        assert_eq!(as_json["latency_ms"], json!(42));
        assert_eq!(as_json["error_message"], json!(null));
    }
}
