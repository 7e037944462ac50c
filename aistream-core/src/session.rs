//! Server-side handling of one request, from generation to the terminal event.
//!
//! Contract:
//! - `Generating → Streaming → {Completed | Aborted | Failed}`.
//! - Before every chunk the registry is consulted; a missing connection aborts
//!   the session with no further events, so at most one chunk can follow a
//!   disconnect.
//! - The pacing delay precedes each chunk and is a floor, never a ceiling.
//! - A failed generation emits exactly one `aiError` and no chunks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, field, info, info_span, warn};
use tracing_futures::Instrument;

use crate::chunker::chunk;
use crate::config::StreamingCfg;
use crate::error::StreamError;
use crate::model::{ConnectionId, GENERATION_FAILED_MESSAGE, Request, ServerEvent};
use crate::normalizer::clean_prompt;
use crate::provider::GenerationProvider;
use crate::registry::SessionRegistry;
use crate::telemetry::{
    self, KEY_ERROR_MESSAGE, KEY_LATENCY_MS, KEY_SESSION_CHUNKS, KEY_SESSION_OUTCOME, SessionTrace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Generating,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { chunks: usize },
    Aborted { sent: usize, total: usize },
    Failed { detail: String },
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Aborted { .. } => "aborted",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn chunks_sent(&self) -> usize {
        match self {
            Self::Completed { chunks } => *chunks,
            Self::Aborted { sent, .. } => *sent,
            Self::Failed { .. } => 0,
        }
    }
}

/// Everything a session needs from its surroundings. Cheap to clone; the
/// gateway keeps one and hands a copy to each session.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub provider: Arc<dyn GenerationProvider>,
    pub group_size: usize,
    pub pacing: Duration,
}

impl SessionContext {
    pub fn new(
        registry: Arc<SessionRegistry>,
        provider: Arc<dyn GenerationProvider>,
        cfg: &StreamingCfg,
    ) -> Self {
        Self {
            registry,
            provider,
            group_size: cfg.group_size,
            pacing: cfg.pacing(),
        }
    }
}

pub struct StreamingSession {
    ctx: SessionContext,
    connection: ConnectionId,
    pending: VecDeque<String>,
    state: SessionState,
}

impl StreamingSession {
    pub fn new(ctx: SessionContext, connection: ConnectionId) -> Self {
        Self {
            ctx,
            connection,
            pending: VecDeque::new(),
            state: SessionState::Generating,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the request to a terminal state. Events go out through the
    /// registry handle of the sending connection.
    pub async fn handle(&mut self, request: Request) -> SessionOutcome {
        let span = info_span!(
            "session",
            conn.id = %self.connection,
            req.id = %request.id,
            session.provider = self.ctx.provider.name(),
            session.outcome = field::Empty,
            session.chunks = field::Empty,
            latency.ms = field::Empty,
            error.message = field::Empty,
        );
        let started = Instant::now();
        let outcome = self.run(&request).instrument(span.clone()).await;

        span.record(KEY_SESSION_OUTCOME, outcome.label());
        span.record(KEY_SESSION_CHUNKS, outcome.chunks_sent() as u64);
        let latency_ms = started.elapsed().as_millis() as u64;
        span.record(KEY_LATENCY_MS, latency_ms);

        let total = match &outcome {
            SessionOutcome::Completed { chunks } => *chunks,
            SessionOutcome::Aborted { total, .. } => *total,
            SessionOutcome::Failed { .. } => 0,
        };
        let detail = match &outcome {
            SessionOutcome::Failed { detail } => Some(detail.as_str()),
            _ => None,
        };
        if let Some(detail) = detail {
            span.record(KEY_ERROR_MESSAGE, detail);
        }
        telemetry::emit(
            SessionTrace::new()
                .connection_id(self.connection.as_str())
                .request_id(&request.id)
                .provider(self.ctx.provider.name())
                .outcome(outcome.label())
                .chunks(outcome.chunks_sent() as u32, total as u32)
                .latency_ms(latency_ms)
                .error_message_opt(detail),
        );
        outcome
    }

    async fn run(&mut self, request: &Request) -> SessionOutcome {
        self.state = SessionState::Generating;
        let prompt = clean_prompt(&request.content);
        let generated = if prompt.is_empty() {
            Err(StreamError::Validation("prompt is empty".into()))
        } else {
            self.ctx.provider.generate(&prompt).await
        };

        let text = match generated {
            Ok(g) => g.response,
            Err(e) => {
                self.state = SessionState::Failed;
                let detail = e.to_string();
                error!(error = %detail, "error handling message");
                self.emit(ServerEvent::error(GENERATION_FAILED_MESSAGE, detail.clone()));
                return SessionOutcome::Failed { detail };
            }
        };

        self.state = SessionState::Streaming;
        self.pending = chunk(&text, self.ctx.group_size).into();
        let total = self.pending.len();
        let mut sent = 0;

        while let Some(next) = self.pending.pop_front() {
            let Some(tx) = self.ctx.registry.handle(&self.connection) else {
                self.state = SessionState::Aborted;
                self.pending.clear();
                warn!(sent, total, "client disconnected during response streaming");
                return SessionOutcome::Aborted { sent, total };
            };
            tokio::time::sleep(self.ctx.pacing).await;
            if tx.send(ServerEvent::chunk(next)).is_err() {
                debug!("writer gone before chunk delivery");
            }
            sent += 1;
        }

        if self.emit(ServerEvent::AiResponseComplete) {
            self.state = SessionState::Completed;
            info!(chunks = sent, "response complete");
            SessionOutcome::Completed { chunks: sent }
        } else {
            self.state = SessionState::Aborted;
            debug!(sent, total, "client gone before completion");
            SessionOutcome::Aborted { sent, total }
        }
    }

    /// Send to the connection if it is still live. Returns false when it is not.
    fn emit(&self, event: ServerEvent) -> bool {
        match self.ctx.registry.handle(&self.connection) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("writer gone before event delivery");
                }
                true
            }
            None => {
                debug!("connection not live, dropping event");
                false
            }
        }
    }
}
