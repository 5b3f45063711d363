//! Custom tracing layer for JSONL output.
//!
//! Produces one JSON object per event on stderr, lifting the correlation
//! fields of enclosing spans (`run_id`, `host_id`, `node`) and the event's
//! own `event`/`stage` fields to the top level.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const REDACTED: &str = "[REDACTED]";

/// Fields whose values never reach the log stream.
fn is_secret_field(name: &str) -> bool {
    matches!(
        name,
        "pass" | "password" | "token" | "secret" | "authorization" | "crumb"
    )
}

/// Correlation fields captured from span attributes.
#[derive(Debug, Clone, Default)]
struct SpanContext {
    run_id: Option<String>,
    host_id: Option<String>,
    node: Option<String>,
}

struct SpanContextVisitor {
    context: SpanContext,
}

impl tracing::field::Visit for SpanContextVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.capture(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.capture(field.name(), format!("{:?}", value));
    }
}

impl SpanContextVisitor {
    fn capture(&mut self, name: &str, value: String) {
        match name {
            "run_id" => self.context.run_id = Some(value),
            "host_id" => self.context.host_id = Some(value),
            "node" => self.context.node = Some(value),
            _ => {}
        }
    }
}

/// Extracts event fields into a JSON map.
struct JsonFieldVisitor {
    fields: Map<String, Value>,
    message: Option<String>,
}

impl JsonFieldVisitor {
    fn new() -> Self {
        JsonFieldVisitor {
            fields: Map::new(),
            message: None,
        }
    }

    fn insert_string(&mut self, name: &str, value: String) {
        if name == "message" {
            self.message = Some(value);
        } else if is_secret_field(name) {
            self.fields.insert(name.to_string(), Value::from(REDACTED));
        } else {
            self.fields.insert(name.to_string(), Value::String(value));
        }
    }
}

impl tracing::field::Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.insert_string(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.insert_string(field.name(), format!("{:?}", value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }
}

/// JSONL tracing layer.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        JsonlLayer {
            writer: Mutex::new(io::stderr()),
        }
    }
}

impl<W: Write> JsonlLayer<W> {
    /// Create a layer with a custom writer (used by tests).
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = SpanContextVisitor {
            context: SpanContext::default(),
        };
        attrs.record(&mut visitor);

        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(visitor.context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut context = SpanContext::default();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(span_ctx) = span.extensions().get::<SpanContext>() {
                    if context.run_id.is_none() {
                        context.run_id.clone_from(&span_ctx.run_id);
                    }
                    if context.host_id.is_none() {
                        context.host_id.clone_from(&span_ctx.host_id);
                    }
                    if context.node.is_none() {
                        context.node.clone_from(&span_ctx.node);
                    }
                }
            }
        }

        let mut visitor = JsonFieldVisitor::new();
        event.record(&mut visitor);

        let mut obj = Map::new();
        obj.insert("ts".to_string(), Value::from(Utc::now().to_rfc3339()));
        obj.insert(
            "level".to_string(),
            Value::from(event.metadata().level().as_str().to_lowercase()),
        );
        obj.insert(
            "target".to_string(),
            Value::from(event.metadata().target()),
        );
        for key in ["event", "stage", "severity"] {
            if let Some(v) = visitor.fields.remove(key) {
                obj.insert(key.to_string(), v);
            }
        }
        if let Some(id) = context.run_id {
            obj.insert("run_id".to_string(), Value::from(id));
        }
        if let Some(id) = context.host_id {
            obj.insert("host_id".to_string(), Value::from(id));
        }
        if let Some(node) = context.node {
            obj.insert("node".to_string(), Value::from(node));
        }
        if let Some(msg) = visitor.message {
            obj.insert("message".to_string(), Value::from(msg));
        }
        if !visitor.fields.is_empty() {
            obj.insert("fields".to_string(), Value::Object(visitor.fields));
        }

        let json = serde_json::to_string(&Value::Object(obj)).unwrap_or_default();
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", json);
        }
    }
}
