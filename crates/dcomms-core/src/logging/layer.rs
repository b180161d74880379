//! `tracing` layer feeding [`NodeLogWriter`]

use std::fmt::Write as _;
use std::path::Path;

use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::entry::LogRecord;
use super::writer::NodeLogWriter;

/// Writes every event that passes the subscriber's filter to the node's
/// JSON-lines file.
pub struct JsonlLayer {
    writer: NodeLogWriter,
}

impl JsonlLayer {
    pub fn new(log_dir: impl AsRef<Path>, node: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            writer: NodeLogWriter::open(log_dir, node)?,
        })
    }

    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let mut record = LogRecord::now(
            meta.level().as_str().to_lowercase(),
            self.writer.node(),
            meta.target(),
            visitor.message.unwrap_or_default(),
        );
        record.fields = visitor.fields;
        record.span = ctx.event_scope(event).and_then(|scope| {
            let names: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            (!names.is_empty()).then(|| names.join(" > "))
        });

        // Logging must never take the node down
        let _ = self.writer.append(&record);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.message = Some(text);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(buf, "{:?}", value);
        self.put(field, Value::String(buf));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}
