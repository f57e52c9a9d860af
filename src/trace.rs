/*!
Request traces: a per-request builder owned by the connection thread and a bounded,
mutex-guarded ring buffer shared by all connections.

Traces are diagnostics only; nothing on the request path reads them back.
*/
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::util::id::{trace_id, unix_now_ms};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TraceSpan {
    pub name: String,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub id: String,
    /// Unix epoch milliseconds.
    pub started_at: u128,
    pub method: String,
    pub path: String,
    /// Offsets are milliseconds since `started_at`.
    pub spans: Vec<TraceSpan>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

pub struct TraceBuilder {
    record: TraceRecord,
    t0: Instant,
}

impl TraceBuilder {
    pub fn begin(method: &str, path: &str) -> Self {
        TraceBuilder {
            record: TraceRecord {
                id: trace_id(),
                started_at: unix_now_ms(),
                method: method.to_string(),
                path: path.to_string(),
                spans: Vec::new(),
                success: false,
                error: None,
                metadata: BTreeMap::new(),
            },
            t0: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    fn offset_ms(&self) -> u64 {
        self.t0.elapsed().as_millis() as u64
    }

    pub fn span_start(&mut self, name: &str) {
        let start_ms = self.offset_ms();
        self.record.spans.push(TraceSpan {
            name: name.to_string(),
            start_ms,
            end_ms: None,
        });
    }

    /// Close the most recent open span with this name; unknown names are ignored.
    pub fn span_end(&mut self, name: &str) {
        let now = self.offset_ms();
        if let Some(span) = self
            .record
            .spans
            .iter_mut()
            .rev()
            .find(|s| s.name == name && s.end_ms.is_none())
        {
            span.end_ms = Some(now);
        }
    }

    pub fn meta(&mut self, key: &str, value: impl Into<String>) {
        self.record.metadata.insert(key.to_string(), value.into());
    }

    /// Seal the record; spans still open are closed at the finish time.
    pub fn finish(mut self, success: bool, error: Option<String>) -> TraceRecord {
        let now = self.offset_ms();
        for span in self.record.spans.iter_mut() {
            if span.end_ms.is_none() {
                span.end_ms = Some(now);
            }
        }
        self.record.success = success;
        self.record.error = error;
        self.record
    }
}

/// Fixed-capacity store; the oldest record is evicted first.
#[derive(Debug)]
pub struct TraceStore {
    capacity: usize,
    inner: Mutex<VecDeque<TraceRecord>>,
}

impl TraceStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        TraceStore {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, rec: TraceRecord) {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        while q.len() >= self.capacity {
            q.pop_front();
        }
        q.push_back(rec);
    }

    pub fn get(&self, id: &str) -> Option<TraceRecord> {
        let q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        q.iter().find(|r| r.id == id).cloned()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<TraceRecord> {
        let q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        q.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
