//! Per-session summaries for an embedding application.
//!
//! Nothing is recorded until a sink is installed with [`set_telemetry_sink`].
//! The sink is process-wide and can be set once.

pub mod keys;
#[cfg(test)]
pub mod test_span;
pub mod types;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Receives one [`SessionTrace`] when a session reaches a terminal state.
///
/// Called from whichever runtime worker ran the session, so it must not block.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, trace: SessionTrace);
}

static SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

/// Returns `false` when a sink was already installed.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    SINK.set(sink).is_ok()
}

pub(crate) fn emit(trace: SessionTrace) {
    if !capture_enabled() {
        return;
    }
    if let Some(sink) = SINK.get() {
        sink.record(trace);
    }
}

// The sink is global, so tests opt in per thread to keep parallel tests from
// seeing each other's sessions.
#[cfg(test)]
thread_local! {
    static CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[cfg(test)]
fn capture_enabled() -> bool {
    CAPTURE.with(|c| c.get())
}

#[cfg(not(test))]
fn capture_enabled() -> bool {
    true
}

#[cfg(test)]
pub fn test_set_capture_enabled(enabled: bool) {
    CAPTURE.with(|c| c.set(enabled));
}
