//! Span field names for streaming sessions. Log pipelines match on these.

pub const KEY_CONNECTION_ID: &str = "conn.id";
pub const KEY_REQUEST_ID: &str = "req.id";

pub const KEY_PROVIDER: &str = "session.provider";
pub const KEY_SESSION_OUTCOME: &str = "session.outcome";
pub const KEY_SESSION_CHUNKS: &str = "session.chunks";
pub const KEY_LATENCY_MS: &str = "latency.ms";

pub const KEY_ERROR_MESSAGE: &str = "error.message";
