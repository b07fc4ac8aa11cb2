//! Request log — best-effort, non-blocking emission of one record per
//! completed request, via a bounded channel drained by a single writer
//! task so a slow sink never stalls the request path.
//!
//! Follows the same background-task shape as a rate limiter's refill
//! ticker (a single `tokio::spawn` loop owning the only mutable handle to
//! some shared resource), here driving a channel consumer instead.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::cache::entry::now_epoch_secs;

const QUEUE_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
    Bypass,
    #[serde(rename = "-")]
    NotApplicable,
}

#[derive(Clone, Debug, Serialize)]
pub struct RequestLog {
    pub request_id: String,
    pub api_key_id: Option<String>,
    pub route_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub cache_status: CacheStatus,
    pub error_type: Option<String>,
    pub at_epoch_secs: u64,
}

impl RequestLog {
    pub fn now(
        request_id: String,
        api_key_id: Option<String>,
        route_id: Option<String>,
        method: String,
        path: String,
        status: u16,
        latency_ms: u64,
        cache_status: CacheStatus,
        error_type: Option<String>,
    ) -> Self {
        Self {
            request_id,
            api_key_id,
            route_id,
            method,
            path,
            status,
            latency_ms,
            cache_status,
            error_type,
            at_epoch_secs: now_epoch_secs(),
        }
    }
}

/// Handle held by request-handling tasks; cloning is cheap (an mpsc sender).
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<RequestLog>,
    dropped: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl LogSink {
    /// Emits `entry` without blocking. If the writer is falling behind and
    /// the queue is full, the entry is dropped and the drop counter is
    /// incremented — logs are best-effort, never a backpressure source for
    /// the request path.
    pub fn emit(&self, entry: RequestLog) {
        if self.tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Anything that can durably record a [`RequestLog`]; `()` is the
/// discard-everything sink used when no persistence is configured.
pub trait LogWriter: Send + Sync + 'static {
    fn write(&self, entry: &RequestLog);
}

impl LogWriter for () {
    fn write(&self, _entry: &RequestLog) {}
}

/// Spawns the single dedicated writer task and returns the sink handle
/// request-handling tasks use to emit entries.
pub fn spawn(writer: impl LogWriter) -> LogSink {
    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
    let dropped = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));

    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            writer.write(&entry);
        }
    });

    LogSink { tx, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct VecWriter(Mutex<Vec<RequestLog>>);

    impl LogWriter for std::sync::Arc<VecWriter> {
        fn write(&self, entry: &RequestLog) {
            self.0.lock().unwrap().push(entry.clone());
        }
    }

    #[tokio::test]
    async fn emitted_entries_reach_the_writer() {
        let writer = std::sync::Arc::new(VecWriter(Mutex::new(Vec::new())));
        let sink = spawn(writer.clone());

        sink.emit(RequestLog::now(
            "req-1".into(),
            Some("key-1".into()),
            Some("route-1".into()),
            "GET".into(),
            "/v1/items".into(),
            200,
            12,
            CacheStatus::Hit,
            None,
        ));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(writer.0.lock().unwrap().len(), 1);
    }
}
