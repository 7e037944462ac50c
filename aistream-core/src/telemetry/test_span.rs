//! Span capture for tests: every span's fields, stringified.
#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::DefaultGuard;
use tracing::Subscriber;
use tracing_core::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::{LookupSpan, Registry};
use tracing_subscriber::Layer;

type Fields = HashMap<String, String>;

#[derive(Default)]
struct Captured {
    spans: Vec<(&'static str, Fields)>,
    // Ids are recycled once a span closes; this always points at the newest.
    by_id: HashMap<Id, usize>,
}

struct Collect<'a>(&'a mut Fields);

impl Visit for Collect<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

struct CaptureLayer(Arc<Mutex<Captured>>);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, _ctx: Context<'_, S>) {
        let mut fields = Fields::new();
        attrs.record(&mut Collect(&mut fields));
        let mut c = self.0.lock().unwrap();
        c.spans.push((attrs.metadata().name(), fields));
        let idx = c.spans.len() - 1;
        c.by_id.insert(id.clone(), idx);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: Context<'_, S>) {
        let mut c = self.0.lock().unwrap();
        if let Some(&idx) = c.by_id.get(id) {
            values.record(&mut Collect(&mut c.spans[idx].1));
        }
    }
}

/// Keeps the capturing subscriber installed on this thread while alive.
pub struct SpanCapture {
    captured: Arc<Mutex<Captured>>,
    _guard: DefaultGuard,
}

impl SpanCapture {
    /// Fields of every span named `name`, in creation order.
    pub fn fields_of(&self, name: &str) -> Vec<Fields> {
        self.captured
            .lock()
            .unwrap()
            .spans
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, f)| f.clone())
            .collect()
    }
}

pub fn install_capture() -> SpanCapture {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let subscriber = Registry::default().with(CaptureLayer(Arc::clone(&captured)));
    SpanCapture {
        captured,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}
