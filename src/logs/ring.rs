use crate::logs::record::{HistoryLogEntry, LiveLogPayload, LogIdSequence, LogLevel, LogRecord};
use std::sync::Arc;
use tracing::trace;

/// Bounded log sequence with batched visibility.
///
/// Ingested lines sit in a pending batch until [`flush`](Self::flush) moves
/// them into the visible sequence, which keeps only the newest `capacity`
/// records.
pub struct LogRingBuffer {
    visible: Arc<Vec<LogRecord>>,
    pending: Vec<LogRecord>,
    capacity: usize,
    ids: LogIdSequence,
}

impl LogRingBuffer {
    pub fn new(capacity: usize, ids: LogIdSequence) -> Self {
        Self {
            visible: Arc::new(Vec::new()),
            pending: Vec::new(),
            capacity,
            ids,
        }
    }

    /// Decode one `/topic/logs` body into the pending batch.
    ///
    /// Undecodable lines are dropped without consuming an id.
    pub fn ingest(&mut self, raw: &str) -> bool {
        let payload = match serde_json::from_str::<LiveLogPayload>(raw) {
            Ok(payload) => payload,
            Err(e) => {
                trace!(error = %e, "Dropping malformed log line");
                return false;
            }
        };
        let Ok(level) = payload.level.parse::<LogLevel>() else {
            trace!(level = %payload.level, "Dropping log line with unknown level");
            return false;
        };

        self.pending.push(LogRecord {
            id: self.ids.next_id(),
            timestamp: payload.timestamp,
            level,
            logger_name: payload.logger_name,
            message: payload.message,
        });
        true
    }

    /// Move the pending batch into the visible sequence.
    ///
    /// Returns the number of records moved.
    pub fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let incoming = std::mem::take(&mut self.pending);
        let moved = incoming.len();

        let total = self.visible.len() + moved;
        let skip = total.saturating_sub(self.capacity);

        let next: Vec<LogRecord> = self
            .visible
            .iter()
            .cloned()
            .chain(incoming)
            .skip(skip)
            .collect();
        self.visible = Arc::new(next);

        moved
    }

    /// Replace the visible sequence with backfilled history.
    ///
    /// Entry `i` of `n` gets id `i - n`, so history sorts before every live
    /// record. Entries with an unknown level are skipped.
    pub fn load_history(&mut self, entries: Vec<HistoryLogEntry>) -> usize {
        let n = entries.len() as i64;
        let skip = entries.len().saturating_sub(self.capacity);

        let records: Vec<LogRecord> = entries
            .into_iter()
            .enumerate()
            .skip(skip)
            .filter_map(|(i, entry)| {
                let level = entry.level.parse::<LogLevel>().ok()?;
                Some(LogRecord {
                    id: i as i64 - n,
                    timestamp: entry.time,
                    level,
                    logger_name: entry.logger_name,
                    message: entry.message,
                })
            })
            .collect();

        let loaded = records.len();
        self.visible = Arc::new(records);
        loaded
    }

    /// Visible records, oldest first
    pub fn records(&self) -> Arc<Vec<LogRecord>> {
        Arc::clone(&self.visible)
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
