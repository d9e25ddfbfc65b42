//! Forwards tracing output to the presentation layer as log events.

use repofleet_core::domain::{Event as FleetEvent, LogLevel};
use std::fmt::{self, Write as _};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Tracing layer that turns log events into [`FleetEvent::LogMessage`].
///
/// Messages are prefixed with the innermost span name, so a line logged by
/// the status poller reads `[status_poller] ...`.
pub struct EventLogLayer {
    tx: mpsc::UnboundedSender<FleetEvent>,
    min_level: LogLevel,
}

impl EventLogLayer {
    pub fn new(tx: mpsc::UnboundedSender<FleetEvent>, min_level: LogLevel) -> Self {
        Self { tx, min_level }
    }
}

impl<S> Layer<S> for EventLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = log_level(event.metadata().level());
        if level < self.min_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let message = match ctx.event_span(event) {
            Some(span) => format!("[{}] {}", span.name(), visitor.finish()),
            None => visitor.finish(),
        };

        // Nobody listening any more is not an error for the logger
        let _ = self.tx.send(FleetEvent::LogMessage { level, message });
    }
}

pub fn log_level(level: &Level) -> LogLevel {
    match *level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warn,
        Level::ERROR => LogLevel::Error,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
