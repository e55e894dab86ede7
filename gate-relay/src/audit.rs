//! Rate-limited audit log for wire traffic.
//!
//! [`ThrottledAuditLog::record`] is called from the wire hooks and must never
//! add latency there: it makes one lock-free window check and one channel
//! send. Entries over the per-second cap are shed, not buffered. A separate
//! drain task emits accepted entries, yielding between each one.
//!
//! The cap is a fixed window: at most N entries per whole second counted
//! from when the log was created. The count resets when a new second starts.

use crate::clock::now_millis;
use crate::config::{AuditConfig, AuditLevel};
use gate_types::Direction;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One observed wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// When the message was observed, Unix milliseconds.
    pub timestamp: i64,
    /// Read or write.
    pub direction: Direction,
    /// Bounded, credential-free description of the message.
    pub payload_summary: String,
}

/// Destination for drained audit entries.
pub trait AuditSink: Send + Sync {
    /// Emit one entry.
    fn emit(&self, entry: &AuditLogEntry);
}

/// Sink writing entries as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, entry: &AuditLogEntry) {
        tracing::info!(
            target: "gate_relay::audit",
            "{:?} at {}: {}",
            entry.direction,
            entry.timestamp,
            entry.payload_summary
        );
    }
}

/// At most `limit` admissions per one-second window.
#[derive(Debug)]
struct SecondWindow {
    started: Instant,
    limit: u32,
    // High half: window index in seconds. Low half: admissions in it.
    state: AtomicU64,
}

impl SecondWindow {
    fn new(limit: u32) -> Self {
        Self {
            started: Instant::now(),
            limit: limit.max(1),
            state: AtomicU64::new(0),
        }
    }

    fn try_admit(&self, elapsed: Duration) -> bool {
        let window = elapsed.as_secs() as u32;
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let (seen, count) = ((current >> 32) as u32, current as u32);
            // A caller still in an older window counts against the newer one
            let (window, count) = if window > seen { (window, 0) } else { (seen, count) };
            if count >= self.limit {
                return false;
            }
            let next = (u64::from(window) << 32) | u64::from(count + 1);
            match self.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Producer side of the audit log.
pub struct ThrottledAuditLog {
    window: SecondWindow,
    queue: mpsc::UnboundedSender<AuditLogEntry>,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl std::fmt::Debug for ThrottledAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledAuditLog")
            .field("max_per_second", &self.window.limit)
            .field("accepted", &self.accepted_count())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

/// Consumer side of the audit log; spawn it once.
#[derive(Debug)]
pub struct AuditDrain {
    queue: mpsc::UnboundedReceiver<AuditLogEntry>,
    level: AuditLevel,
}

impl ThrottledAuditLog {
    /// Create the log and its drain.
    pub fn new(config: &AuditConfig) -> (Self, AuditDrain) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Self {
            window: SecondWindow::new(config.max_logs_per_second),
            queue: tx,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        let drain = AuditDrain {
            queue: rx,
            level: config.level,
        };
        (log, drain)
    }

    /// Record a message. Never blocks and never fails.
    pub fn record(&self, direction: Direction, payload_summary: String) {
        self.record_at(self.window.started.elapsed(), direction, payload_summary);
    }

    fn record_at(&self, elapsed: Duration, direction: Direction, payload_summary: String) {
        if !self.window.try_admit(elapsed) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let entry = AuditLogEntry {
            timestamp: now_millis(),
            direction,
            payload_summary,
        };
        if self.queue.send(entry).is_ok() {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            // Drain is gone
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Entries accepted since startup.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Entries shed since startup.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditDrain {
    /// Spawn the drain task. It ends once every producer has been dropped.
    pub fn spawn(self, sink: Arc<dyn AuditSink>) -> tokio::task::JoinHandle<()> {
        let AuditDrain { mut queue, level } = self;
        tokio::spawn(async move {
            let emit = level.emits_entries();
            tracing::debug!("Audit drain started (emitting: {})", emit);

            while let Some(entry) = queue.recv().await {
                if emit {
                    sink.emit(&entry);
                }
                tokio::task::yield_now().await;
            }

            tracing::debug!("Audit drain stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        entries: Mutex<Vec<AuditLogEntry>>,
    }

    impl AuditSink for CollectingSink {
        fn emit(&self, entry: &AuditLogEntry) {
            self.entries.lock().unwrap().push(entry.clone());
        }
    }

    fn config(max: u32, level: AuditLevel) -> AuditConfig {
        AuditConfig {
            max_logs_per_second: max,
            level,
        }
    }

    #[tokio::test]
    async fn burst_is_capped_per_second() {
        let (log, drain) = ThrottledAuditLog::new(&config(10, AuditLevel::Verbose));
        let sink = Arc::new(CollectingSink::default());
        let handle = drain.spawn(sink.clone());

        for i in 0..25 {
            log.record(Direction::Put, format!("PUT users/{i}"));
        }
        assert_eq!(log.accepted_count(), 10);
        assert_eq!(log.dropped_count(), 15);

        drop(log);
        handle.await.unwrap();
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].payload_summary, "PUT users/0");
        assert_eq!(entries[9].payload_summary, "PUT users/9");
    }

    #[test]
    fn cap_holds_across_a_whole_second() {
        let (log, _drain) = ThrottledAuditLog::new(&config(10, AuditLevel::Verbose));

        // 25 entries spread over 950ms
        for i in 0..25u64 {
            log.record_at(
                Duration::from_millis(i * 38),
                Direction::Put,
                format!("PUT users/{i}"),
            );
        }
        assert_eq!(log.accepted_count(), 10);
        assert_eq!(log.dropped_count(), 15);
    }

    #[test]
    fn next_second_resets_the_count() {
        let (log, _drain) = ThrottledAuditLog::new(&config(3, AuditLevel::Verbose));

        for ms in [0, 100, 200, 300, 999] {
            log.record_at(Duration::from_millis(ms), Direction::Put, "PUT a".into());
        }
        assert_eq!(log.accepted_count(), 3);
        assert_eq!(log.dropped_count(), 2);

        for ms in [1000, 1500, 1999, 1999] {
            log.record_at(Duration::from_millis(ms), Direction::Put, "PUT a".into());
        }
        assert_eq!(log.accepted_count(), 6);
        assert_eq!(log.dropped_count(), 3);

        // Stragglers from an earlier second count against the current one
        log.record_at(Duration::from_millis(500), Direction::Put, "PUT a".into());
        assert_eq!(log.dropped_count(), 4);

        log.record_at(Duration::from_millis(5000), Direction::Put, "PUT a".into());
        assert_eq!(log.accepted_count(), 7);
    }

    #[tokio::test]
    async fn quiet_level_counts_but_does_not_emit() {
        let (log, drain) = ThrottledAuditLog::new(&config(10, AuditLevel::Info));
        let sink = Arc::new(CollectingSink::default());
        let handle = drain.spawn(sink.clone());

        for _ in 0..12 {
            log.record(Direction::Get, "GET x".into());
        }
        assert_eq!(log.accepted_count(), 10);
        assert_eq!(log.dropped_count(), 2);

        drop(log);
        handle.await.unwrap();
        assert!(sink.entries.lock().unwrap().is_empty());
    }

    #[test]
    fn record_without_drain_does_not_panic() {
        let (log, drain) = ThrottledAuditLog::new(&config(5, AuditLevel::Debug));
        drop(drain);

        log.record(Direction::Put, "PUT a".into());
        assert_eq!(log.accepted_count(), 0);
        assert_eq!(log.dropped_count(), 1);
    }

    #[test]
    fn entry_serializes_camel_case() {
        let entry = AuditLogEntry {
            timestamp: 1,
            direction: Direction::Put,
            payload_summary: "PUT a".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"payloadSummary\":\"PUT a\""));
        assert!(json.contains("\"direction\":\"PUT\""));
    }
}
