use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

const MAX_LOG_ENTRIES: usize = 10_000;

/// One completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub client: String,
}

impl AccessRecord {
    /// Emit the record as a tracing event, leveled by status.
    pub fn trace(&self) {
        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    request_id = %self.request_id,
                    method = %self.method,
                    path = %self.path,
                    status = self.status,
                    latency_ms = self.latency_ms,
                    client = %self.client,
                    "request completed"
                )
            };
        }
        match self.status {
            500.. => emit!(error),
            400..=499 => emit!(warn),
            _ => emit!(info),
        }
    }
}

/// Access records persisted as JSONL, with a ring buffer of the most recent
/// ones. Without a file nothing is retained.
struct AccessLog {
    entries: VecDeque<AccessRecord>,
    capacity: usize,
    writer: Option<BufWriter<File>>,
}

impl AccessLog {
    fn new(file_path: Option<&Path>, capacity: usize) -> std::io::Result<Self> {
        let Some(file_path) = file_path else {
            return Ok(Self {
                entries: VecDeque::new(),
                capacity,
                writer: None,
            });
        };

        let mut log = Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            writer: None,
        };

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(record) = serde_json::from_str::<AccessRecord>(&line) {
                    log.push(record);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        log.writer = Some(BufWriter::new(file));
        Ok(log)
    }

    fn push(&mut self, record: AccessRecord) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    fn record(&mut self, record: AccessRecord) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let written = serde_json::to_string(&record)
            .map_err(std::io::Error::from)
            .and_then(|json| {
                writeln!(writer, "{json}")?;
                writer.flush()
            });
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to append access log record");
        }
        self.push(record);
    }

    fn recent(&self, limit: usize) -> Vec<AccessRecord> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

/// Shared handle to the access log.
#[derive(Clone)]
pub struct RequestLog(Arc<Mutex<AccessLog>>);

impl RequestLog {
    /// Open the access log. With a path, earlier records are reloaded from
    /// the file and new ones are appended to it. Without one, records only
    /// go to tracing and [`RequestLog::recent`] stays empty.
    pub fn open(file_path: Option<&Path>) -> std::io::Result<Self> {
        Self::with_capacity(file_path, MAX_LOG_ENTRIES)
    }

    pub fn with_capacity(file_path: Option<&Path>, capacity: usize) -> std::io::Result<Self> {
        let log = AccessLog::new(file_path, capacity.max(1))?;
        Ok(Self(Arc::new(Mutex::new(log))))
    }

    pub fn record(&self, record: AccessRecord) {
        record.trace();
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(record);
    }

    /// Most recent records first.
    pub fn recent(&self, limit: usize) -> Vec<AccessRecord> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(limit)
    }
}
