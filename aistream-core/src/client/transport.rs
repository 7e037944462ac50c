//! Reconnecting client transport.
//!
//! A driver task owns the socket. It connects, pumps frames in both
//! directions, and on failure backs off per [`ReconnectPolicy`]. After
//! `max_attempts` consecutive failures it raises one error notice and parks
//! until [`TransportManager::reconnect`] or
//! [`TransportManager::reset_connection`] wakes it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info_span, warn};
use tracing_futures::Instrument;

use super::assembler::ResponseAssembler;
use super::backoff::ReconnectPolicy;
use super::notice::{Notice, Notifier, Severity};
use crate::config::ClientCfg;
use crate::error::{CoreResult, StreamError};
use crate::model::{AskPayload, ClientEvent, ServerEvent};

const SOURCE: &str = "TransportManager";
const AI_SOURCE: &str = "AI Service";

const CONNECTED: &str = "Successfully connected to server";
const DISCONNECTED: &str = "Disconnected from server. Attempting to reconnect...";
const EXHAUSTED: &str = "Maximum reconnection attempts reached. Please refresh the page.";
const NOT_CONNECTED: &str = "Not connected to server. Please try again.";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_connected: bool,
    /// Retries made since the initial connect failed.
    pub reconnect_attempts: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reconnect,
    Reset,
}

enum Ended {
    Closed,
    Reset,
    Shutdown,
}

#[derive(Default)]
struct Link {
    // Consecutive failed connects, the initial one included.
    attempts: u32,
    // Some while connected.
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct Shared {
    policy: ReconnectPolicy,
    link: Mutex<Link>,
    assembler: Mutex<ResponseAssembler>,
    status: watch::Sender<bool>,
    responses: broadcast::Sender<String>,
    completions: broadcast::Sender<()>,
    notices: Notifier,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn notify(&self, severity: Severity, message: impl Into<String>) {
        self.notices.publish(Notice::new(severity, SOURCE, message));
    }

    fn publish_text(&self, text: String) {
        let _ = self.responses.send(text);
    }

    fn on_connected(&self, outbound: mpsc::UnboundedSender<String>) {
        {
            let mut link = lock(&self.link);
            link.attempts = 0;
            link.outbound = Some(outbound);
        }
        self.status.send_replace(true);
        self.notify(Severity::Info, CONNECTED);
    }

    fn on_disconnected(&self) {
        lock(&self.link).outbound = None;
        self.status.send_replace(false);
    }

    /// Count one failed connect; returns the running total.
    fn record_failure(&self) -> u32 {
        let mut link = lock(&self.link);
        link.attempts = link.attempts.saturating_add(1);
        link.attempts
    }

    fn clear_attempts(&self) {
        lock(&self.link).attempts = 0;
    }

    fn on_frame(&self, text: &str) {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "ignoring malformed server event");
                return;
            }
        };
        match event {
            ServerEvent::AiResponse(payload) => {
                let snapshot = {
                    let mut asm = lock(&self.assembler);
                    if asm.is_complete() {
                        debug!("chunk outside of a response, dropped");
                        return;
                    }
                    asm.append(&payload.chunk);
                    asm.text().to_string()
                };
                self.publish_text(snapshot);
            }
            ServerEvent::AiResponseComplete => {
                if lock(&self.assembler).finish() {
                    let _ = self.completions.send(());
                }
            }
            ServerEvent::AiError(err) => {
                self.notices.publish(
                    Notice::new(Severity::Error, AI_SOURCE, err.message).with_details(err.error),
                );
                let finished = lock(&self.assembler).fail();
                self.publish_text(String::new());
                if finished {
                    let _ = self.completions.send(());
                }
            }
        }
    }
}

/// Client side of the streaming protocol.
///
/// Must be created inside a tokio runtime. Dropping it stops the driver and
/// closes the socket.
pub struct TransportManager {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
}

impl TransportManager {
    /// Start connecting to `cfg.url`. Notices go to `notices`; subscribe to
    /// it first to see the initial connect.
    pub fn new(cfg: ClientCfg, notices: Notifier) -> Self {
        let (status, _) = watch::channel(false);
        let (responses, _) = broadcast::channel(256);
        let (completions, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            policy: ReconnectPolicy::from_config(&cfg),
            link: Mutex::new(Link::default()),
            assembler: Mutex::new(ResponseAssembler::new()),
            status,
            responses,
            completions,
            notices,
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let span = info_span!("transport", url = %cfg.url);
        let driver = tokio::spawn(
            drive(
                Arc::clone(&shared),
                cfg.url,
                Duration::from_millis(cfg.connect_timeout_ms),
                command_rx,
            )
            .instrument(span),
        );
        Self {
            shared,
            commands,
            driver,
        }
    }

    /// Ask the server. Fails fast while disconnected: the message is dropped,
    /// an error notice is raised and nothing is queued.
    pub fn send_message(&self, message: &str) -> CoreResult<()> {
        let outbound = lock(&self.shared.link).outbound.clone();
        let Some(outbound) = outbound else {
            self.shared.notify(Severity::Error, NOT_CONNECTED);
            return Err(StreamError::TransportUnavailable);
        };
        let frame = serde_json::to_string(&ClientEvent::AskAi(AskPayload {
            message: message.to_string(),
        }))
        .map_err(|e| StreamError::Transport(e.to_string()))?;

        lock(&self.shared.assembler).reset();
        self.shared.publish_text(String::new());
        outbound.send(frame).map_err(|_| {
            self.shared.notify(Severity::Error, NOT_CONNECTED);
            StreamError::TransportUnavailable
        })
    }

    /// Clear the current answer and drop the socket. The server aborts any
    /// in-flight session for it; the driver reconnects straight away.
    pub fn reset_connection(&self) {
        {
            let mut asm = lock(&self.shared.assembler);
            asm.clear();
            asm.finish();
        }
        self.shared.publish_text(String::new());
        let _ = self.commands.send(Command::Reset);
    }

    /// Resume connecting after attempts ran out. No-op while connected.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// Growing answer text, one snapshot per chunk. An empty string marks a
    /// new request or an error.
    pub fn subscribe_responses(&self) -> broadcast::Receiver<String> {
        self.shared.responses.subscribe()
    }

    /// One `()` per finished response, errors included.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<()> {
        self.shared.completions.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    /// Latest connected/disconnected value; never misses the current state.
    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.shared.status.subscribe()
    }

    pub fn current_response(&self) -> String {
        lock(&self.shared.assembler).text().to_string()
    }

    pub fn connection_state(&self) -> ConnectionState {
        let link = lock(&self.shared.link);
        ConnectionState {
            is_connected: link.outbound.is_some(),
            reconnect_attempts: link.attempts.saturating_sub(1),
            max_attempts: self.shared.policy.max_attempts,
        }
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    shared: Arc<Shared>,
    url: String,
    connect_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        let failure = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await
        {
            Ok(Ok((socket, _))) => {
                let (tx, rx) = mpsc::unbounded_channel();
                shared.on_connected(tx);
                let ended = run_connection(&shared, socket, rx, &mut commands).await;
                shared.on_disconnected();
                match ended {
                    Ended::Shutdown => return,
                    Ended::Reset => {
                        shared.notify(Severity::Warning, DISCONNECTED);
                        continue;
                    }
                    Ended::Closed => {
                        shared.notify(Severity::Warning, DISCONNECTED);
                        if wait_or_command(shared.policy.delay_for(1), &mut commands)
                            .await
                            .is_none()
                        {
                            return;
                        }
                        continue;
                    }
                }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {}ms", connect_timeout.as_millis()),
        };

        // Failure n announces retry n; the failure of retry `max` exhausts.
        let attempts = shared.record_failure();
        let max = shared.policy.max_attempts;
        debug!(attempt = attempts, error = %failure, "connect failed");

        if shared.policy.is_exhausted(attempts) {
            shared.notify(Severity::Error, EXHAUSTED);
            // Parked until someone asks for another try.
            match commands.recv().await {
                Some(_) => shared.clear_attempts(),
                None => return,
            }
        } else {
            shared.notify(
                Severity::Warning,
                format!("Connection error. Attempting to reconnect ({attempts}/{max})..."),
            );
            match wait_or_command(shared.policy.delay_for(attempts), &mut commands).await {
                None => return,
                Some(Some(_)) => shared.clear_attempts(),
                Some(None) => {}
            }
        }
    }
}

/// Sleep for `delay` unless a command arrives first.
/// `None` when the manager is gone, `Some(cmd)` otherwise.
async fn wait_or_command(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<Option<Command>> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Some(None),
        cmd = commands.recv() => cmd.map(Some),
    }
}

async fn run_connection(
    shared: &Shared,
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Ended {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.on_frame(text.as_str()),
                Some(Ok(Message::Close(_))) | None => return Ended::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "socket read error");
                    return Ended::Closed;
                }
            },
            frame = outbound.recv() => {
                let Some(frame) = frame else { return Ended::Closed };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    warn!(error = %e, "failed to send frame");
                    return Ended::Closed;
                }
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Reset) => {
                    let _ = sink.close().await;
                    return Ended::Reset;
                }
                Some(Command::Reconnect) => {}
                None => {
                    let _ = sink.close().await;
                    return Ended::Shutdown;
                }
            },
        }
    }
}
