use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

/// One recorded request observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// `<millis>-<random>`, unique within the ring
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Milliseconds spent handling the request
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub rate_limited: bool,
}

/// What the pipeline hands over; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct Observation {
    pub ip: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
    pub rate_limited: bool,
}

/// Query options for [`RequestLog::filter`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub ip: Option<String>,
    pub path_pattern: Option<String>,
    pub status: Option<u16>,
    /// `d` selects statuses in `d*100 ..= d*100+99`
    pub status_range: Option<u16>,
    pub rate_limited: Option<bool>,
    pub limit: Option<usize>,
}

/// Summary statistics over the current buffer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    pub total: usize,
    pub rate_limited: usize,
    /// Counts keyed by status class (`"2xx"`, `"4xx"`, ...)
    pub by_status: HashMap<String, usize>,
    pub avg_duration: f64,
}

/// Bounded ring buffer of recent request observations.
pub struct RequestLog {
    buffer: Mutex<VecDeque<LogEntry>>,
    max_size: usize,
}

impl RequestLog {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
        }
    }

    /// Insert an observation; the oldest entry drops when the ring is full.
    pub fn log(&self, obs: Observation) -> LogEntry {
        let now = Utc::now();
        let entry = LogEntry {
            id: format!(
                "{}-{}",
                now.timestamp_millis(),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            timestamp: now,
            ip: obs.ip,
            method: obs.method,
            path: obs.path,
            status: obs.status,
            duration_ms: obs.duration_ms,
            rate_limited: obs.rate_limited,
        };
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() == self.max_size {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
        entry
    }

    /// The last `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let buffer = self.buffer.lock().unwrap();
        buffer.iter().rev().take(n).cloned().collect()
    }

    /// Filtered entries, newest first; `limit` applies after sorting.
    pub fn filter(&self, opts: &LogFilter) -> Vec<LogEntry> {
        let pattern = opts.path_pattern.as_deref().and_then(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid path pattern");
                None
            }
        });
        let buffer = self.buffer.lock().unwrap();
        let mut matched: Vec<LogEntry> = buffer
            .iter()
            .rev()
            .filter(|entry| {
                if let Some(ip) = &opts.ip
                    && &entry.ip != ip
                {
                    return false;
                }
                if opts.path_pattern.is_some() {
                    match &pattern {
                        Some(re) if re.is_match(&entry.path) => {}
                        _ => return false,
                    }
                }
                if let Some(status) = opts.status
                    && entry.status != status
                {
                    return false;
                }
                if let Some(range) = opts.status_range {
                    let (low, high) = (range * 100, range * 100 + 99);
                    if entry.status < low || entry.status > high {
                        return false;
                    }
                }
                if let Some(rate_limited) = opts.rate_limited
                    && entry.rate_limited != rate_limited
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        if let Some(limit) = opts.limit {
            matched.truncate(limit);
        }
        matched
    }

    pub fn stats(&self) -> LogStats {
        let buffer = self.buffer.lock().unwrap();
        let total = buffer.len();
        let rate_limited = buffer.iter().filter(|e| e.rate_limited).count();
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut duration_sum = 0u64;
        for entry in buffer.iter() {
            *by_status
                .entry(format!("{}xx", entry.status / 100))
                .or_insert(0) += 1;
            duration_sum += entry.duration_ms;
        }
        LogStats {
            total,
            rate_limited,
            by_status,
            avg_duration: if total == 0 {
                0.0
            } else {
                duration_sum as f64 / total as f64
            },
        }
    }

    pub fn clear(&self) {
        self.buffer.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
