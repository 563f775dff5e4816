//! Captured error output used as a health signal
//!
//! The SSH transport has no single "is this forward usable" call, so the
//! health monitor also scans recent error lines for a marker that forwarders
//! emit when the remote side refuses a connection. Lines arrive two ways:
//! forwarders report directly through [`DiagnosticSink::record`], and
//! [`DiagnosticLayer`] copies error events from other crates (russh) out of
//! the tracing pipeline.

use std::collections::VecDeque;
use std::fmt::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Substring present in every "remote side refused" report
pub const REMOTE_SIDE_MARKER: &str = "to remote side of the tunnel";

/// Lines kept before the oldest is dropped
const DEFAULT_CAPACITY: usize = 512;

/// Shared, append-only buffer of recent error lines
#[derive(Clone)]
pub struct DiagnosticSink {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("lines", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Tracing layer feeding error events from other crates into a sink.
///
/// Events from this crate are skipped: forwarders already record their
/// reports directly, and the monitor's own error lines must not be read back.
pub struct DiagnosticLayer {
    sink: DiagnosticSink,
    own_target: &'static str,
}

impl DiagnosticLayer {
    pub fn new(sink: DiagnosticSink) -> Self {
        Self {
            sink,
            own_target: env!("CARGO_CRATE_NAME"),
        }
    }

    /// This crate's root target or one of its modules, not a crate that
    /// merely shares the prefix
    fn is_own_target(&self, target: &str) -> bool {
        target
            .strip_prefix(self.own_target)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    }
}

impl<S: Subscriber> Layer<S> for DiagnosticLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR || self.is_own_target(metadata.target()) {
            return;
        }

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.sink
            .record(format!("{}: {}", metadata.target(), visitor.line));
    }
}

#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.line.insert_str(0, value);
        } else {
            let _ = write!(self.line, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.line.insert_str(0, &format!("{:?}", value));
        } else {
            let _ = write!(self.line, " {}={:?}", field.name(), value);
        }
    }
}
