//! Tracing setup for the renderer.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`. Goes to stderr, or to
//!   the event bus as `LogMessageEmitted` when an observer prints the render.
//!
//! - **Script logs (`io/scripts`)**: product artifacts under
//!   `<logs_folder>/<render id>/`. Always written, unaffected by `RUST_LOG`.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as fmt_layer};

use crate::events::{EventSink, RenderEvent};

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `renderer=info`, or `renderer=debug` when
/// `verbose` is set. With a sink, log lines are published as events instead of
/// being written to stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=renderer::io=trace renderer spec.json
/// ```
pub fn init(sink: Option<Arc<dyn EventSink>>, verbose: bool) -> Result<()> {
    let default = if verbose {
        "renderer=debug"
    } else {
        "renderer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    match sink {
        Some(sink) => registry.with(EventLogLayer::new(sink)).try_init(),
        None => registry
            .with(fmt_layer::layer().with_writer(std::io::stderr).compact())
            .try_init(),
    }
    .context("install tracing subscriber")
}

/// Publishes every tracing event as [`RenderEvent::LogMessageEmitted`].
pub struct EventLogLayer {
    sink: Arc<dyn EventSink>,
}

impl EventLogLayer {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for EventLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.sink.publish(RenderEvent::LogMessageEmitted {
            logger: metadata.target().to_string(),
            level: metadata.level().to_string(),
            message: visitor.finish(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }
}

/// `message` field first, other fields appended as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[test]
    fn layer_publishes_log_lines_with_fields() {
        let bus = Arc::new(EventBus::new());
        let rx = bus.attach().expect("attach");
        let subscriber = tracing_subscriber::registry().with(EventLogLayer::new(bus.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "renderer::io::git", rev = "abc", "reverting repository");
        });

        let events: Vec<RenderEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RenderEvent::LogMessageEmitted {
                logger,
                level,
                message,
                timestamp,
            } => {
                assert_eq!(logger, "renderer::io::git");
                assert_eq!(level, "WARN");
                assert_eq!(message, "reverting repository rev=abc");
                assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn field_only_events_keep_their_fields() {
        let mut visitor = MessageVisitor::default();
        visitor.fields.push_str(" exit_code=1");
        assert_eq!(visitor.finish(), "exit_code=1");
    }
}
