//! The Work-Coordinator Logging sink (C13): a level-gated structured log
//! persisted by the coordinator itself, distinct from `tracing` output.
//! `tracing` instruments this process's own execution; this sink records
//! events the coordinator wants durable and queryable across instances —
//! the `log_event` SQL function and `wh_log` table in §6.1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::config::SqlLogLevel;
use crate::ids::{EventId, MessageId};

/// One durable log row. Mirrors the parameters of the `log_event` SQL
/// function: `source` identifies the emitting component, `event_id`/
/// `message_id`/`event_type` are optional correlation hooks for tying a log
/// line back to the record it describes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: SqlLogLevel,
    pub source: String,
    pub message: String,
    pub event_id: Option<EventId>,
    pub message_id: Option<MessageId>,
    pub event_type: Option<String>,
    pub metadata: Option<Json>,
    pub logged_at: DateTime<Utc>,
}

/// Durable, level-gated log sink. Implementations persist rows at or above
/// the configured threshold and discard the rest — the gate is applied once
/// here rather than at every call site.
pub trait LogSink: Send + Sync {
    fn log(
        &self,
        level: SqlLogLevel,
        source: &str,
        message: &str,
        event_id: Option<EventId>,
        message_id: Option<MessageId>,
        event_type: Option<&str>,
        metadata: Option<Json>,
    );

    /// All persisted rows, oldest first. Intended for tests and operator
    /// tooling; durable adapters back this with a query against `wh_log`.
    fn records(&self) -> Vec<LogRecord>;
}

/// Reference sink backing tests and the facade crate's default wiring.
pub struct InMemoryLogSink {
    threshold: SqlLogLevel,
    records: parking_lot::Mutex<Vec<LogRecord>>,
}

impl InMemoryLogSink {
    pub fn new(threshold: SqlLogLevel) -> Self {
        Self {
            threshold,
            records: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

impl LogSink for InMemoryLogSink {
    fn log(
        &self,
        level: SqlLogLevel,
        source: &str,
        message: &str,
        event_id: Option<EventId>,
        message_id: Option<MessageId>,
        event_type: Option<&str>,
        metadata: Option<Json>,
    ) {
        if level < self.threshold {
            return;
        }
        self.records.lock().push(LogRecord {
            level,
            source: source.to_string(),
            message: message.to_string(),
            event_id,
            message_id,
            event_type: event_type.map(str::to_string),
            metadata,
            logged_at: Utc::now(),
        });
    }

    fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_below_threshold_are_discarded() {
        let sink = InMemoryLogSink::new(SqlLogLevel::Warning);
        sink.log(SqlLogLevel::Debug, "coordinator", "noisy", None, None, None, None);
        sink.log(SqlLogLevel::Error, "coordinator", "important", None, None, None, None);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "important");
    }
}
